//! Peer identity types.
//!
//! - [`Identity`]: the local node's signing key
//! - [`PeerId`]: unique identifier for peers, derived from Ed25519 public keys
//! - [`PeerInfo`]: identifier plus known addresses for a remote node

use chrono::{DateTime, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::P2pError;

/// Unique identifier for a peer in the mesh.
///
/// The bytes are the raw 32-byte Ed25519 public key, displayed as base58.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId {
    bytes: [u8; 32],
}

impl PeerId {
    /// Creates a `PeerId` from an Ed25519 public key.
    #[must_use]
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self {
            bytes: key.to_bytes(),
        }
    }

    /// Creates a `PeerId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Creates a `PeerId` from a byte slice received over the wire.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, P2pError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            P2pError::Protocol(format!("peer id must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self { bytes })
    }

    /// Returns the raw bytes of the peer ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.bytes).into_string())
    }
}

impl FromStr for PeerId {
    type Err = P2pError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| P2pError::Protocol(format!("invalid base58 peer id '{s}': {e}")))?;
        Self::try_from_slice(&bytes)
    }
}

/// The local node's identity.
#[derive(Debug, Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Derives an identity from a fixed secret. Stable across restarts.
    #[must_use]
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }

    /// Returns the stable peer identifier for this identity.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.signing_key.verifying_key())
    }
}

/// A remote node as seen by the core: its identifier and address set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    peer_id: PeerId,
    addresses: Vec<String>,
    last_seen: DateTime<Utc>,
}

impl PeerInfo {
    /// Creates a new `PeerInfo` with the given peer ID and addresses.
    #[must_use]
    pub fn new(peer_id: PeerId, addresses: Vec<String>) -> Self {
        Self {
            peer_id,
            addresses,
            last_seen: Utc::now(),
        }
    }

    /// Returns the peer's unique identifier.
    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Returns the peer's known network addresses.
    #[must_use]
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Returns when the peer was last seen.
    #[must_use]
    pub const fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// Updates the last seen timestamp to now.
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Adds a new address if it doesn't already exist.
    pub fn add_address(&mut self, address: String) {
        if !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_from_public_key_is_deterministic() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        let peer_id_1 = PeerId::from_public_key(&verifying_key);
        let peer_id_2 = PeerId::from_public_key(&verifying_key);

        assert_eq!(peer_id_1, peer_id_2);
    }

    #[test]
    fn identity_from_secret_is_stable() {
        let a = Identity::from_secret([7u8; 32]);
        let b = Identity::from_secret([7u8; 32]);
        assert_eq!(a.peer_id(), b.peer_id());
        assert_ne!(a.peer_id(), Identity::from_secret([8u8; 32]).peer_id());
    }

    #[test]
    fn generated_identities_differ() {
        assert_ne!(Identity::generate().peer_id(), Identity::generate().peer_id());
    }

    #[test]
    fn peer_id_display_is_base58() {
        let displayed = Identity::generate().peer_id().to_string();

        // Base58 alphabet doesn't contain 0, O, I, l
        assert!(!displayed.contains('0'));
        assert!(!displayed.contains('O'));
        assert!(!displayed.contains('I'));
        assert!(!displayed.contains('l'));
        assert!(!displayed.is_empty());
    }

    #[test]
    fn peer_id_parses_its_display_form() {
        let peer_id = Identity::generate().peer_id();
        let parsed: PeerId = peer_id.to_string().parse().unwrap();
        assert_eq!(parsed, peer_id);
    }

    #[test]
    fn peer_id_parse_rejects_garbage() {
        assert!("not-base58-0OIl".parse::<PeerId>().is_err());
        // valid base58 but wrong length
        assert!("abc".parse::<PeerId>().is_err());
    }

    #[test]
    fn try_from_slice_checks_length() {
        assert!(PeerId::try_from_slice(&[1u8; 31]).is_err());
        assert!(PeerId::try_from_slice(&[1u8; 32]).is_ok());
    }

    #[test]
    fn peer_info_creation() {
        let peer_id = Identity::generate().peer_id();
        let info = PeerInfo::new(peer_id, vec!["/ip4/192.168.1.1/tcp/4001".to_string()]);

        assert_eq!(info.peer_id(), peer_id);
        assert_eq!(info.addresses().len(), 1);
    }

    #[test]
    fn peer_info_last_seen_updates() {
        let mut info = PeerInfo::new(Identity::generate().peer_id(), vec![]);
        let original_last_seen = info.last_seen();

        std::thread::sleep(std::time::Duration::from_millis(10));
        info.touch();

        assert!(info.last_seen() > original_last_seen);
    }

    #[test]
    fn peer_info_add_address() {
        let mut info = PeerInfo::new(Identity::generate().peer_id(), vec![]);
        assert!(info.addresses().is_empty());

        info.add_address("/ip4/10.0.0.1/tcp/9000".to_string());
        assert_eq!(info.addresses().len(), 1);

        // Adding duplicate should not increase count
        info.add_address("/ip4/10.0.0.1/tcp/9000".to_string());
        assert_eq!(info.addresses().len(), 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn peer_id_from_bytes_roundtrip_prop(bytes in prop::array::uniform32(any::<u8>())) {
                let peer_id = PeerId::from_bytes(bytes);
                prop_assert_eq!(*peer_id.as_bytes(), bytes);
            }

            #[test]
            fn peer_id_display_parse_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
                let peer_id = PeerId::from_bytes(bytes);
                let parsed: PeerId = peer_id.to_string().parse().unwrap();
                prop_assert_eq!(parsed, peer_id);
            }
        }
    }
}
