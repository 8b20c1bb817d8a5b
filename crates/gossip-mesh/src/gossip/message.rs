//! Gossip message types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::P2pError;
use crate::protocol::PeerId;

/// Unique identifier for a gossip message.
///
/// Used by the substrate for deduplication and by telemetry to correlate a
/// broadcast with its receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    bytes: [u8; 16],
}

impl MessageId {
    /// Creates a new random message ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: Uuid::new_v4().into_bytes(),
        }
    }

    /// Creates a message ID from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Creates a message ID from a wire slice.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, P2pError> {
        let bytes: [u8; 16] = bytes.try_into().map_err(|_| {
            P2pError::Protocol(format!("message id must be 16 bytes, got {}", bytes.len()))
        })?;
        Ok(Self { bytes })
    }

    /// Returns the raw bytes of the message ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.bytes).hyphenated())
    }
}

/// Payload published on the broadcast topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Identifier chosen by the originating node.
    pub msg_id: String,
}

impl BroadcastMessage {
    /// Creates a broadcast message with the given id.
    #[must_use]
    pub fn new(msg_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
        }
    }

    /// Serializes to the JSON payload carried on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, P2pError> {
        serde_json::to_vec(self)
            .map_err(|e| P2pError::Protocol(format!("failed to serialize broadcast message: {e}")))
    }

    /// Parses a wire payload; empty ids are refused.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, P2pError> {
        let msg: Self = serde_json::from_slice(bytes).map_err(|e| {
            P2pError::Protocol(format!("failed to deserialize broadcast message: {e}"))
        })?;
        if msg.msg_id.is_empty() {
            return Err(P2pError::Protocol("broadcast message has empty msg_id".to_string()));
        }
        Ok(msg)
    }
}

/// A published payload as it travels through the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The node that originally published the payload.
    pub origin: PeerId,
    /// Unique id assigned at origination.
    pub message_id: MessageId,
    /// Topic the payload was published on.
    pub topic: String,
    /// Opaque payload bytes.
    pub data: Bytes,
}

impl Envelope {
    /// Creates a new envelope.
    #[must_use]
    pub fn new(
        origin: PeerId,
        message_id: MessageId,
        topic: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            origin,
            message_id,
            topic: topic.into(),
            data: data.into(),
        }
    }
}

/// A message handed up by the substrate to a local subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// The envelope as received.
    pub envelope: Envelope,
    /// The direct neighbor that relayed it (equals the origin for one hop,
    /// and the local peer for locally published messages).
    pub received_from: PeerId,
}

impl InboundMessage {
    /// Returns the originating peer.
    #[must_use]
    pub const fn origin(&self) -> PeerId {
        self.envelope.origin
    }

    /// Returns the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.envelope.topic
    }

    /// Returns the payload.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.envelope.data
    }
}
