//! Flood propagation engine.
//!
//! The engine sits between a [`PubSub`] substrate and the per-topic
//! handlers. Outbound, it wraps payloads in envelopes and publishes them.
//! Inbound, it runs every message through the topic validator and drops
//! messages this node originated before any handler sees them. Message-id
//! deduplication is left to the substrate.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::topic::{Handler, TopicBinding, TopicRegistry};
use super::{Envelope, InboundMessage, MessageId};
use crate::error::{P2pError, SubscriptionError};
use crate::protocol::PeerId;
use crate::stats::NodeStats;
use crate::transport::{PubSub, Subscription};
use crate::validator::{ValidationResult, Validator};

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Passed validation and reached the handler.
    Delivered,
    /// Originated by this node; dropped.
    SelfOrigin,
    /// Refused by the topic validator; dropped.
    Rejected,
    /// No binding for the topic; dropped.
    UnknownTopic,
}

/// Gossip engine for one node.
pub struct GossipEngine {
    transport: Arc<dyn PubSub>,
    local_peer_id: PeerId,
    registry: RwLock<TopicRegistry>,
    stats: NodeStats,
}

impl std::fmt::Debug for GossipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipEngine")
            .field("local_peer_id", &self.local_peer_id)
            .field("topics", &self.registry.read().topics())
            .finish_non_exhaustive()
    }
}

impl GossipEngine {
    /// Creates an engine on top of `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn PubSub>, stats: NodeStats) -> Self {
        Self {
            local_peer_id: transport.local_peer_id(),
            transport,
            registry: RwLock::new(TopicRegistry::new()),
            stats,
        }
    }

    /// This node's identifier.
    #[must_use]
    pub const fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// The underlying substrate.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn PubSub> {
        &self.transport
    }

    /// Shared counters.
    #[must_use]
    pub const fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Joins `topic`, attaching `validator` to both the substrate gate and
    /// local dispatch, and returns the subscription to drive.
    ///
    /// # Errors
    ///
    /// Fails if the topic is already joined or the substrate refuses it.
    pub fn join(
        &self,
        topic: &str,
        validator: Arc<dyn Validator>,
        handler: Arc<dyn Handler>,
    ) -> Result<Subscription, P2pError> {
        self.registry.write().bind(
            topic,
            TopicBinding {
                validator: Arc::clone(&validator),
                handler,
            },
        )?;

        let joined = self
            .transport
            .join(topic, validator)
            .and_then(|()| self.transport.subscribe(topic));
        if joined.is_err() {
            self.registry.write().unbind(topic);
        }
        let subscription = joined?;
        debug!(topic, "joined topic");
        Ok(subscription)
    }

    /// Publishes `data` on `topic` under a fresh message id.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::Publish`] or [`P2pError::UnknownTopic`] if the
    /// substrate refuses the message.
    pub async fn publish(
        &self,
        topic: &str,
        data: impl Into<Bytes>,
    ) -> Result<MessageId, P2pError> {
        let id = MessageId::new();
        self.publish_with_id(topic, id, data).await?;
        Ok(id)
    }

    /// Publishes `data` on `topic` under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Same as [`GossipEngine::publish`].
    pub async fn publish_with_id(
        &self,
        topic: &str,
        id: MessageId,
        data: impl Into<Bytes>,
    ) -> Result<(), P2pError> {
        let envelope = Envelope::new(self.local_peer_id, id, topic, data);
        match self.transport.publish(envelope).await {
            Ok(()) => {
                self.stats.record_published();
                trace!(topic, message_id = %id, "published");
                Ok(())
            }
            Err(e) => {
                self.stats.record_publish_failure();
                Err(e)
            }
        }
    }

    /// Runs the validator bound to `topic`. Unbound topics are rejected.
    #[must_use]
    pub fn validate(&self, topic: &str, data: &[u8]) -> ValidationResult {
        self.registry
            .read()
            .get(topic)
            .map_or(ValidationResult::Reject, |b| b.validator.validate(topic, data))
    }

    /// Routes one inbound message: validator first, then self-origin check,
    /// then the handler.
    pub fn dispatch(&self, message: &InboundMessage) -> Dispatch {
        let Some(binding) = self.registry.read().get(message.topic()).cloned() else {
            trace!(topic = message.topic(), "no binding for topic");
            return Dispatch::UnknownTopic;
        };

        if !binding
            .validator
            .validate(message.topic(), message.data())
            .is_accept()
        {
            self.stats.record_rejected();
            debug!(
                topic = message.topic(),
                origin = %message.origin(),
                "rejected inbound message"
            );
            return Dispatch::Rejected;
        }

        if message.origin() == self.local_peer_id {
            self.stats.record_self_suppressed();
            trace!(topic = message.topic(), message_id = %message.envelope.message_id, "own message");
            return Dispatch::SelfOrigin;
        }

        binding.handler.handle(message);
        self.stats.record_delivered();
        Dispatch::Delivered
    }

    /// Drives `subscription` until `cancel` fires or the substrate closes it.
    ///
    /// Returns the error that ended the loop; it is never retried.
    pub async fn run_subscription(
        &self,
        mut subscription: Subscription,
        cancel: CancellationToken,
    ) -> SubscriptionError {
        loop {
            match subscription.next(&cancel).await {
                Ok(message) => {
                    self.dispatch(&message);
                }
                Err(e) => {
                    match e {
                        SubscriptionError::Cancelled => {
                            debug!(topic = subscription.topic(), "subscription cancelled");
                        }
                        SubscriptionError::Closed => {
                            warn!(topic = subscription.topic(), "subscription closed by substrate");
                        }
                    }
                    return e;
                }
            }
        }
    }
}
