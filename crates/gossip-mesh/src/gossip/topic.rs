//! Topic names and the per-topic validator/handler registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::P2pError;
use crate::gossip::InboundMessage;
use crate::validator::Validator;

/// Topic carrying encoded [`MetricBatch`](crate::metrics::MetricBatch)es.
pub const METRICS_TOPIC: &str = "metrics";

/// Topic carrying [`BroadcastMessage`](crate::gossip::BroadcastMessage)s.
pub const BROADCAST_TOPIC: &str = "/test/1";

/// Receives accepted messages for one topic.
///
/// Called from the subscription task; must not block.
pub trait Handler: Send + Sync + fmt::Debug {
    /// Handles one validated message that did not originate locally.
    fn handle(&self, message: &InboundMessage);
}

/// The validator and handler bound to a topic at join time.
#[derive(Debug, Clone)]
pub struct TopicBinding {
    /// Gate applied before the handler.
    pub validator: Arc<dyn Validator>,
    /// Receiver of accepted messages.
    pub handler: Arc<dyn Handler>,
}

/// Mapping from topic name to its binding. At most one binding per topic.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    bindings: HashMap<String, TopicBinding>,
}

impl TopicRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::TopicAlreadyJoined`] if the topic is already bound.
    pub fn bind(&mut self, topic: &str, binding: TopicBinding) -> Result<(), P2pError> {
        if self.bindings.contains_key(topic) {
            return Err(P2pError::TopicAlreadyJoined(topic.to_string()));
        }
        self.bindings.insert(topic.to_string(), binding);
        Ok(())
    }

    /// Removes a binding, returning it.
    pub fn unbind(&mut self, topic: &str) -> Option<TopicBinding> {
        self.bindings.remove(topic)
    }

    /// Looks up a binding.
    #[must_use]
    pub fn get(&self, topic: &str) -> Option<&TopicBinding> {
        self.bindings.get(topic)
    }

    /// Bound topic names, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.bindings.keys().cloned().collect();
        topics.sort();
        topics
    }
}
