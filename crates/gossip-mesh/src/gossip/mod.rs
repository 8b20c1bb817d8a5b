//! Gossip layer: envelopes, topic bindings and the propagation engine.
//!
//! ## Architecture
//!
//! - [`Envelope`]: a payload with its origin, id and topic
//! - [`TopicRegistry`]: topic name to validator/handler binding
//! - [`GossipEngine`]: publish, validate, suppress own traffic, dispatch

mod engine;
mod message;
mod topic;

pub use engine::{Dispatch, GossipEngine};
pub use message::{BroadcastMessage, Envelope, InboundMessage, MessageId};
pub use topic::{BROADCAST_TOPIC, Handler, METRICS_TOPIC, TopicBinding, TopicRegistry};
