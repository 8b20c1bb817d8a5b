//! Frames exchanged between TCP substrate peers.

use bytes::Bytes;
use prost::Message;

use crate::error::P2pError;
use crate::gossip::{Envelope, MessageId};
use crate::protocol::PeerId;

/// Current wire protocol version.
pub const WIRE_VERSION: u32 = 1;

/// Frame type constants for wire encoding.
mod frame_kinds {
    pub const HELLO: u32 = 1;
    pub const PUBLISH: u32 = 2;
}

/// Prost-encoded frame.
#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(uint32, tag = "1")]
    kind: u32,
    #[prost(uint32, tag = "2")]
    version: u32,
    /// Sender on hello, origin on publish.
    #[prost(bytes = "vec", tag = "3")]
    peer_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    message_id: Vec<u8>,
    #[prost(string, tag = "5")]
    topic: String,
    #[prost(bytes = "bytes", tag = "6")]
    data: Bytes,
    #[prost(string, tag = "7")]
    listen_addr: String,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// First frame on every connection, in both directions.
    Hello {
        /// The sender's identifier.
        peer_id: PeerId,
        /// Where the sender accepts connections.
        listen_addr: String,
    },
    /// A gossip envelope.
    Publish(Envelope),
}

impl Frame {
    /// Encodes the frame.
    #[must_use]
    pub fn encode_wire(&self) -> Bytes {
        let wire = match self {
            Self::Hello {
                peer_id,
                listen_addr,
            } => WireFrame {
                kind: frame_kinds::HELLO,
                version: WIRE_VERSION,
                peer_id: peer_id.as_bytes().to_vec(),
                listen_addr: listen_addr.clone(),
                ..WireFrame::default()
            },
            Self::Publish(envelope) => WireFrame {
                kind: frame_kinds::PUBLISH,
                version: WIRE_VERSION,
                peer_id: envelope.origin.as_bytes().to_vec(),
                message_id: envelope.message_id.as_bytes().to_vec(),
                topic: envelope.topic.clone(),
                data: envelope.data.clone(),
                listen_addr: String::new(),
            },
        };
        Bytes::from(wire.encode_to_vec())
    }

    /// Decodes a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed or the version is unsupported.
    pub fn decode_wire(bytes: &[u8]) -> Result<Self, P2pError> {
        let wire = WireFrame::decode(bytes)
            .map_err(|e| P2pError::Protocol(format!("failed to decode frame: {e}")))?;

        // version 0 is what prost yields for an omitted field
        if wire.version == 0 || wire.version > WIRE_VERSION {
            return Err(P2pError::Protocol(format!(
                "unsupported wire version: {} (supported: 1..={})",
                wire.version, WIRE_VERSION
            )));
        }

        let peer_id = PeerId::try_from_slice(&wire.peer_id)?;
        match wire.kind {
            frame_kinds::HELLO => Ok(Self::Hello {
                peer_id,
                listen_addr: wire.listen_addr,
            }),
            frame_kinds::PUBLISH => Ok(Self::Publish(Envelope {
                origin: peer_id,
                message_id: MessageId::try_from_slice(&wire.message_id)?,
                topic: wire.topic,
                data: wire.data,
            })),
            other => Err(P2pError::Protocol(format!("unknown frame kind {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Identity;
    use test_case::test_case;

    #[test]
    fn hello_roundtrip() {
        let frame = Frame::Hello {
            peer_id: Identity::generate().peer_id(),
            listen_addr: "/ip4/127.0.0.1/tcp/4001".to_string(),
        };
        assert_eq!(Frame::decode_wire(&frame.encode_wire()).unwrap(), frame);
    }

    #[test]
    fn publish_roundtrip() {
        let envelope = Envelope::new(
            Identity::generate().peer_id(),
            MessageId::new(),
            "metrics",
            vec![9u8, 8, 7],
        );
        let frame = Frame::Publish(envelope);
        assert_eq!(Frame::decode_wire(&frame.encode_wire()).unwrap(), frame);
    }

    #[test_case(WIRE_VERSION + 1 ; "future version")]
    #[test_case(0 ; "missing version")]
    fn unsupported_version_is_rejected(version: u32) {
        let wire = WireFrame {
            kind: frame_kinds::HELLO,
            version,
            peer_id: vec![0u8; 32],
            ..WireFrame::default()
        };
        let err = Frame::decode_wire(&wire.encode_to_vec()).unwrap_err();
        assert!(err.to_string().contains("unsupported wire version"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let wire = WireFrame {
            kind: 99,
            version: WIRE_VERSION,
            peer_id: vec![0u8; 32],
            ..WireFrame::default()
        };
        assert!(Frame::decode_wire(&wire.encode_to_vec()).is_err());
    }

    #[test]
    fn short_ids_are_rejected() {
        let wire = WireFrame {
            kind: frame_kinds::PUBLISH,
            version: WIRE_VERSION,
            peer_id: vec![0u8; 32],
            message_id: vec![1u8; 4],
            ..WireFrame::default()
        };
        assert!(Frame::decode_wire(&wire.encode_to_vec()).is_err());
    }
}
