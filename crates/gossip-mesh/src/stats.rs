//! Per-node counters, exported in Prometheus text format.

use std::sync::Arc;

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

/// Counters describing what one node has done since start.
///
/// Cheap to clone; all clones share the same counters.
#[derive(Clone)]
pub struct NodeStats {
    registry: Arc<RwLock<Registry>>,
    published: Counter,
    publish_failures: Counter,
    delivered: Counter,
    rejected: Counter,
    self_suppressed: Counter,
    connect_failures: Counter,
}

impl std::fmt::Debug for NodeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeStats")
            .field("published", &self.published.get())
            .field("publish_failures", &self.publish_failures.get())
            .field("delivered", &self.delivered.get())
            .field("rejected", &self.rejected.get())
            .field("self_suppressed", &self.self_suppressed.get())
            .field("connect_failures", &self.connect_failures.get())
            .finish_non_exhaustive()
    }
}

impl Default for NodeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStats {
    /// Creates a fresh set of counters.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("gossip_mesh");

        let published = Counter::default();
        registry.register(
            "messages_published",
            "Messages handed to the substrate by this node",
            published.clone(),
        );
        let publish_failures = Counter::default();
        registry.register(
            "publish_failures",
            "Publishes refused by the substrate",
            publish_failures.clone(),
        );
        let delivered = Counter::default();
        registry.register(
            "messages_delivered",
            "Inbound messages dispatched to a topic handler",
            delivered.clone(),
        );
        let rejected = Counter::default();
        registry.register(
            "messages_rejected",
            "Inbound messages refused by a topic validator",
            rejected.clone(),
        );
        let self_suppressed = Counter::default();
        registry.register(
            "messages_self_suppressed",
            "Inbound messages dropped because this node originated them",
            self_suppressed.clone(),
        );
        let connect_failures = Counter::default();
        registry.register(
            "connect_failures",
            "Failed outbound connection attempts",
            connect_failures.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            published,
            publish_failures,
            delivered,
            rejected,
            self_suppressed,
            connect_failures,
        }
    }

    pub(crate) fn record_published(&self) {
        self.published.inc();
    }

    pub(crate) fn record_publish_failure(&self) {
        self.publish_failures.inc();
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.inc();
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.inc();
    }

    pub(crate) fn record_self_suppressed(&self) {
        self.self_suppressed.inc();
    }

    pub(crate) fn record_connect_failure(&self) {
        self.connect_failures.inc();
    }

    /// Messages published.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.get()
    }

    /// Publishes that failed.
    #[must_use]
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.get()
    }

    /// Messages handed to a handler.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.get()
    }

    /// Messages a validator refused.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.get()
    }

    /// Own messages that came back and were dropped.
    #[must_use]
    pub fn self_suppressed(&self) -> u64 {
        self.self_suppressed.get()
    }

    /// Failed connects.
    #[must_use]
    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.get()
    }

    /// Encodes all counters in Prometheus text format.
    #[must_use]
    pub fn encode_prometheus(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            tracing::error!("failed to encode node stats");
            return String::new();
        }
        buffer
    }

    /// Content-Type for [`NodeStats::encode_prometheus`] output.
    #[must_use]
    pub const fn content_type() -> &'static str {
        "text/plain; version=0.0.4; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let stats = NodeStats::new();
        let other = stats.clone();
        other.record_published();
        other.record_rejected();
        assert_eq!(stats.published(), 1);
        assert_eq!(stats.rejected(), 1);
        assert_eq!(stats.delivered(), 0);
    }

    #[test]
    fn prometheus_output_has_prefixed_counters() {
        let stats = NodeStats::new();
        stats.record_delivered();
        stats.record_delivered();
        stats.record_connect_failure();

        let text = stats.encode_prometheus();
        assert!(text.contains("gossip_mesh_messages_delivered_total 2"));
        assert!(text.contains("gossip_mesh_connect_failures_total 1"));
        assert!(text.contains("# TYPE gossip_mesh_messages_published counter"));
        assert!(text.ends_with("# EOF\n"));
    }
}
