//! # gossip-mesh
//!
//! Gossip propagation and telemetry for a partially connected peer mesh.
//!
//! This crate provides:
//!
//! - A compact binary codec for metric batches
//! - Per-topic validators that prune invalid traffic from the mesh
//! - A flood propagation engine with self-message suppression
//! - JSON-lines lifecycle events for offline propagation analysis
//! - A node runtime driving subscription, generation and broadcast tasks
//! - Bootstrap wiring over a bounded neighbor window
//!
//! ## Core Types
//!
//! - [`MetricBatch`]: hostname plus ordered [`MetricRecord`]s
//! - [`Validator`]: Accept/Reject gate for a topic
//! - [`GossipEngine`]: publish and dispatch over a [`PubSub`] substrate
//! - [`TelemetryLogger`]: the stdout event stream
//! - [`NodeRuntime`]: one running peer
//! - [`MemoryNetwork`] and [`TcpTransport`]: in-tree substrates

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod error;
pub mod gossip;
pub mod metrics;
pub mod protocol;
pub mod runtime;
pub mod stats;
pub mod telemetry;
pub mod transport;
pub mod validator;

pub use bootstrap::{
    BootstrapNode, BootstrapReport, DEFAULT_WINDOW_AFTER, DEFAULT_WINDOW_BEFORE, PeerAddr,
    connect_all, neighbor_window,
};
pub use error::{P2pError, SubscriptionError};
pub use gossip::{
    BROADCAST_TOPIC, BroadcastMessage, Dispatch, Envelope, GossipEngine, Handler, InboundMessage,
    METRICS_TOPIC, MessageId, TopicBinding, TopicRegistry,
};
pub use metrics::{DecodeError, MetricBatch, MetricGenerator, MetricRecord};
pub use protocol::{Identity, PeerId, PeerInfo};
pub use runtime::{
    BroadcastAck, BroadcastHandler, MetricsHandler, NodeRuntime, NodeState, RuntimeConfig,
};
pub use stats::NodeStats;
pub use telemetry::{Event, EventCapture, EventKind, TelemetryLogger};
pub use transport::{
    MemoryNetwork, MemoryTransport, PubSub, SeenCacheConfig, Subscription, TcpTransport,
};
pub use validator::{
    AcceptAll, BatchPolicy, BroadcastValidator, MetricsValidator, ValidationResult, Validator,
};
