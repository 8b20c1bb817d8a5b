//! Flood routing shared by the in-tree substrates.
//!
//! Holds the joined topics with their validators and local subscribers, and
//! the seen cache. Link layers ask it what to do with each envelope and then
//! do the actual sending.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::seen::{SeenCache, SeenCacheConfig};
use super::{SUBSCRIPTION_BUFFER, Subscription};
use crate::error::P2pError;
use crate::gossip::{Envelope, InboundMessage};
use crate::protocol::PeerId;
use crate::validator::Validator;

/// What the link layer should do with an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// Already handled once; drop silently.
    Duplicate,
    /// Topic not joined here; drop.
    NotJoined,
    /// Validator refused it; drop without forwarding.
    Rejected,
    /// Delivered locally; forward to the other neighbors.
    Forward,
}

#[derive(Debug)]
struct TopicState {
    validator: Arc<dyn Validator>,
    subscribers: Vec<mpsc::Sender<InboundMessage>>,
}

#[derive(Debug)]
pub(crate) struct FloodRouter {
    local_peer_id: PeerId,
    seen: Mutex<SeenCache>,
    topics: RwLock<HashMap<String, TopicState>>,
}

impl FloodRouter {
    pub(crate) fn new(local_peer_id: PeerId, seen: SeenCacheConfig) -> Self {
        Self {
            local_peer_id,
            seen: Mutex::new(SeenCache::new(seen)),
            topics: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) const fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    pub(crate) fn join(&self, topic: &str, validator: Arc<dyn Validator>) -> Result<(), P2pError> {
        let mut topics = self.topics.write();
        if topics.contains_key(topic) {
            return Err(P2pError::TopicAlreadyJoined(topic.to_string()));
        }
        topics.insert(
            topic.to_string(),
            TopicState {
                validator,
                subscribers: Vec::new(),
            },
        );
        Ok(())
    }

    pub(crate) fn subscribe(&self, topic: &str) -> Result<Subscription, P2pError> {
        let mut topics = self.topics.write();
        let state = topics
            .get_mut(topic)
            .ok_or_else(|| P2pError::UnknownTopic(topic.to_string()))?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        state.subscribers.push(tx);
        Ok(Subscription::new(topic, rx))
    }

    /// Accept path for a locally published envelope. Subject to the same
    /// validator as remote traffic, and echoed to local subscribers.
    pub(crate) fn route_local(&self, envelope: &Envelope) -> Result<(), P2pError> {
        {
            let topics = self.topics.read();
            let state = topics
                .get(&envelope.topic)
                .ok_or_else(|| P2pError::UnknownTopic(envelope.topic.clone()))?;
            if !state.validator.validate(&envelope.topic, &envelope.data).is_accept() {
                return Err(P2pError::Publish(format!(
                    "payload rejected by local validator for topic {}",
                    envelope.topic
                )));
            }
        }

        if !self.seen.lock().insert(envelope.message_id) {
            return Err(P2pError::Publish(format!(
                "duplicate message id {}",
                envelope.message_id
            )));
        }

        self.deliver(envelope, self.local_peer_id);
        Ok(())
    }

    /// Accept path for an envelope relayed by neighbor `from`.
    pub(crate) fn route_inbound(&self, from: PeerId, envelope: &Envelope) -> Route {
        if self.seen.lock().contains(&envelope.message_id) {
            return Route::Duplicate;
        }

        {
            let topics = self.topics.read();
            let Some(state) = topics.get(&envelope.topic) else {
                return Route::NotJoined;
            };
            if !state.validator.validate(&envelope.topic, &envelope.data).is_accept() {
                debug!(
                    topic = %envelope.topic,
                    from = %from,
                    message_id = %envelope.message_id,
                    "dropping rejected message"
                );
                return Route::Rejected;
            }
        }

        // Two neighbors may race the same id past the check above.
        if !self.seen.lock().insert(envelope.message_id) {
            return Route::Duplicate;
        }

        self.deliver(envelope, from);
        Route::Forward
    }

    /// Neighbors that should receive a forwarded copy.
    pub(crate) fn forward_targets(
        &self,
        neighbors: impl IntoIterator<Item = PeerId>,
        from: PeerId,
        origin: PeerId,
    ) -> Vec<PeerId> {
        neighbors
            .into_iter()
            .filter(|p| *p != from && *p != origin && *p != self.local_peer_id)
            .collect()
    }

    /// Drops every subscriber so pending `next` calls observe end-of-stream.
    pub(crate) fn close(&self) {
        for state in self.topics.write().values_mut() {
            state.subscribers.clear();
        }
    }

    fn deliver(&self, envelope: &Envelope, received_from: PeerId) {
        let mut topics = self.topics.write();
        let Some(state) = topics.get_mut(&envelope.topic) else {
            return;
        };
        state.subscribers.retain(|tx| !tx.is_closed());
        for tx in &state.subscribers {
            let message = InboundMessage {
                envelope: envelope.clone(),
                received_from,
            };
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(message) {
                warn!(topic = %envelope.topic, "subscriber queue full, dropping message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gossip::MessageId;
    use crate::protocol::Identity;
    use crate::validator::{AcceptAll, BroadcastValidator};

    fn router() -> FloodRouter {
        FloodRouter::new(Identity::generate().peer_id(), SeenCacheConfig::default())
    }

    fn envelope(origin: PeerId, topic: &str, data: &[u8]) -> Envelope {
        Envelope::new(origin, MessageId::new(), topic, data.to_vec())
    }

    #[test]
    fn join_twice_fails() {
        let r = router();
        r.join("t", Arc::new(AcceptAll)).unwrap();
        assert!(matches!(
            r.join("t", Arc::new(AcceptAll)),
            Err(P2pError::TopicAlreadyJoined(_))
        ));
    }

    #[test]
    fn subscribe_requires_join() {
        assert!(matches!(router().subscribe("nope"), Err(P2pError::UnknownTopic(_))));
    }

    #[test]
    fn inbound_is_delivered_once() {
        let r = router();
        r.join("t", Arc::new(AcceptAll)).unwrap();
        let mut sub = r.subscribe("t").unwrap();
        let from = Identity::generate().peer_id();
        let env = envelope(from, "t", b"x");

        assert_eq!(r.route_inbound(from, &env), Route::Forward);
        assert_eq!(r.route_inbound(from, &env), Route::Duplicate);

        let delivered = sub.try_next().unwrap();
        assert_eq!(delivered.envelope, env);
        assert_eq!(delivered.received_from, from);
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn rejected_inbound_is_neither_delivered_nor_remembered() {
        let r = router();
        r.join("/test/1", Arc::new(BroadcastValidator)).unwrap();
        let mut sub = r.subscribe("/test/1").unwrap();
        let from = Identity::generate().peer_id();
        let env = envelope(from, "/test/1", b"not json");

        assert_eq!(r.route_inbound(from, &env), Route::Rejected);
        assert!(sub.try_next().is_none());
        assert!(!r.seen.lock().contains(&env.message_id));
    }

    #[test]
    fn unjoined_topic_is_dropped() {
        let r = router();
        let from = Identity::generate().peer_id();
        assert_eq!(r.route_inbound(from, &envelope(from, "x", b"")), Route::NotJoined);
    }

    #[test]
    fn local_publish_echoes_to_local_subscribers() {
        let r = router();
        r.join("t", Arc::new(AcceptAll)).unwrap();
        let mut sub = r.subscribe("t").unwrap();
        let env = envelope(r.local_peer_id(), "t", b"hello");

        r.route_local(&env).unwrap();
        let echoed = sub.try_next().unwrap();
        assert_eq!(echoed.origin(), r.local_peer_id());

        // the echo must not loop back in from a neighbor
        let neighbor = Identity::generate().peer_id();
        assert_eq!(r.route_inbound(neighbor, &env), Route::Duplicate);
    }

    #[test]
    fn local_publish_is_validated() {
        let r = router();
        r.join("/test/1", Arc::new(BroadcastValidator)).unwrap();
        let env = envelope(r.local_peer_id(), "/test/1", b"nope");
        assert!(matches!(r.route_local(&env), Err(P2pError::Publish(_))));
    }

    #[test]
    fn forward_targets_skip_sender_origin_and_self() {
        let r = router();
        let a = Identity::generate().peer_id();
        let b = Identity::generate().peer_id();
        let c = Identity::generate().peer_id();
        let targets = r.forward_targets(vec![a, b, c, r.local_peer_id()], a, b);
        assert_eq!(targets, vec![c]);
    }

    #[test]
    fn close_ends_subscriptions() {
        let r = router();
        r.join("t", Arc::new(AcceptAll)).unwrap();
        let mut sub = r.subscribe("t").unwrap();
        r.close();
        assert!(sub.is_closed());
    }
}
