//! Error types for gossip-mesh.

use thiserror::Error;

use crate::runtime::NodeState;

/// Errors that can occur in mesh operations.
///
/// None of these are fatal to a running node: connect and publish failures
/// are logged and the node carries on.
#[derive(Debug, Error)]
pub enum P2pError {
    /// Connecting to a peer address failed.
    #[error("connect to {addr} failed: {reason}")]
    Connect {
        /// The address we tried to reach.
        addr: String,
        /// Why it failed.
        reason: String,
    },

    /// Handing a payload to the pub/sub substrate failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Wire protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The topic has not been joined on this node.
    #[error("topic not joined: {0}")]
    UnknownTopic(String),

    /// The topic was already joined.
    #[error("topic already joined: {0}")]
    TopicAlreadyJoined(String),

    /// The node is not in a state that accepts the operation.
    #[error("node is not running (state: {state:?})")]
    NotRunning {
        /// Current node state.
        state: NodeState,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a subscription stopped yielding messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The shared shutdown signal fired.
    #[error("cancelled")]
    Cancelled,
    /// The substrate closed the stream.
    #[error("end of stream")]
    Closed,
}
