//! In-process substrate.
//!
//! Every node lives in one [`MemoryNetwork`]. Forwarding is synchronous: a
//! publish returns only after the flood has reached every node it can reach,
//! which makes propagation tests deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::flood::{FloodRouter, Route};
use super::seen::SeenCacheConfig;
use super::{BoxFuture, PubSub, Subscription};
use crate::bootstrap::PeerAddr;
use crate::error::P2pError;
use crate::gossip::Envelope;
use crate::protocol::{Identity, PeerId};
use crate::validator::Validator;

#[derive(Debug, Default)]
struct NetworkInner {
    next_slot: u64,
    nodes: HashMap<u64, Weak<MemoryNode>>,
}

/// A shared in-process network that [`MemoryTransport`]s attach to.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new node and returns its transport. The node listens on
    /// `/memory/<slot>`.
    #[must_use]
    pub fn listen(&self, identity: &Identity) -> MemoryTransport {
        let mut inner = self.inner.lock();
        let slot = inner.next_slot;
        inner.next_slot += 1;

        let node = Arc::new(MemoryNode {
            router: FloodRouter::new(identity.peer_id(), SeenCacheConfig::default()),
            slot,
            neighbors: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        inner.nodes.insert(slot, Arc::downgrade(&node));
        debug!(slot, peer_id = %identity.peer_id(), "memory node attached");

        MemoryTransport {
            node,
            network: self.clone(),
        }
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner
            .lock()
            .nodes
            .values()
            .filter(|n| n.strong_count() > 0)
            .count()
    }

    /// Hands `envelope` to `target` as though neighbor `from` had relayed it.
    ///
    /// Bypasses the sender's own accept path, so it can carry payloads a
    /// well-behaved node would never publish. Returns whether the target
    /// accepted the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::Connect`] if no live node has id `target`.
    pub fn inject(
        &self,
        target: &PeerId,
        from: PeerId,
        envelope: Envelope,
    ) -> Result<bool, P2pError> {
        let node = self.find(target).ok_or_else(|| P2pError::Connect {
            addr: target.to_string(),
            reason: "no such node on this network".to_string(),
        })?;
        Ok(node.receive(from, &envelope) == Route::Forward)
    }

    fn node_at(&self, slot: u64) -> Option<Arc<MemoryNode>> {
        self.inner.lock().nodes.get(&slot).and_then(Weak::upgrade)
    }

    fn find(&self, peer_id: &PeerId) -> Option<Arc<MemoryNode>> {
        self.inner
            .lock()
            .nodes
            .values()
            .filter_map(Weak::upgrade)
            .find(|n| n.router.local_peer_id() == *peer_id)
    }

    fn detach(&self, slot: u64) {
        self.inner.lock().nodes.remove(&slot);
    }
}

#[derive(Debug)]
struct MemoryNode {
    router: FloodRouter,
    slot: u64,
    neighbors: RwLock<HashMap<PeerId, Weak<MemoryNode>>>,
    closed: AtomicBool,
}

impl MemoryNode {
    fn peer_id(&self) -> PeerId {
        self.router.local_peer_id()
    }

    fn receive(&self, from: PeerId, envelope: &Envelope) -> Route {
        if self.closed.load(Ordering::Acquire) {
            return Route::NotJoined;
        }
        let route = self.router.route_inbound(from, envelope);
        trace!(slot = self.slot, ?route, message_id = %envelope.message_id, "memory frame");
        if route == Route::Forward {
            self.forward(from, envelope);
        }
        route
    }

    fn forward(&self, from: PeerId, envelope: &Envelope) {
        // Collect targets first; no lock is held while recursing.
        let targets: Vec<Arc<Self>> = {
            let neighbors = self.neighbors.read();
            self.router
                .forward_targets(neighbors.keys().copied(), from, envelope.origin)
                .into_iter()
                .filter_map(|p| neighbors.get(&p).and_then(Weak::upgrade))
                .collect()
        };
        for target in targets {
            target.receive(self.peer_id(), envelope);
        }
    }

    fn link(self: &Arc<Self>, other: &Arc<Self>) {
        self.neighbors
            .write()
            .insert(other.peer_id(), Arc::downgrade(other));
        other
            .neighbors
            .write()
            .insert(self.peer_id(), Arc::downgrade(self));
    }
}

/// One node's handle onto a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryTransport {
    node: Arc<MemoryNode>,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// The address other nodes connect to.
    #[must_use]
    pub fn addr(&self) -> PeerAddr {
        PeerAddr::Memory {
            slot: self.node.slot,
        }
    }

    /// Returns whether [`PubSub::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.node.closed.load(Ordering::Acquire)
    }
}

impl PubSub for MemoryTransport {
    fn local_peer_id(&self) -> PeerId {
        self.node.peer_id()
    }

    fn listen_addrs(&self) -> Vec<String> {
        vec![self.addr().to_string()]
    }

    fn neighbors(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .node
            .neighbors
            .read()
            .iter()
            .filter(|(_, n)| {
                n.upgrade()
                    .is_some_and(|n| !n.closed.load(Ordering::Acquire))
            })
            .map(|(p, _)| *p)
            .collect();
        peers.sort();
        peers
    }

    fn connect<'a>(&'a self, addr: &'a PeerAddr) -> BoxFuture<'a, Result<PeerId, P2pError>> {
        Box::pin(async move {
            let refuse = |reason: &str| P2pError::Connect {
                addr: addr.to_string(),
                reason: reason.to_string(),
            };

            if self.is_closed() {
                return Err(refuse("transport closed"));
            }
            let PeerAddr::Memory { slot } = addr else {
                return Err(refuse("memory transport cannot dial tcp addresses"));
            };
            if *slot == self.node.slot {
                return Err(refuse("cannot connect to self"));
            }
            let other = self
                .network
                .node_at(*slot)
                .ok_or_else(|| refuse("no node listening"))?;
            if other.closed.load(Ordering::Acquire) {
                return Err(refuse("peer closed"));
            }

            self.node.link(&other);
            debug!(from = self.node.slot, to = slot, "memory nodes linked");
            Ok(other.peer_id())
        })
    }

    fn join(&self, topic: &str, validator: Arc<dyn Validator>) -> Result<(), P2pError> {
        self.node.router.join(topic, validator)
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription, P2pError> {
        self.node.router.subscribe(topic)
    }

    fn publish<'a>(&'a self, envelope: Envelope) -> BoxFuture<'a, Result<(), P2pError>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(P2pError::Publish("transport closed".to_string()));
            }
            self.node.router.route_local(&envelope)?;
            self.node.forward(self.node.peer_id(), &envelope);
            Ok(())
        })
    }

    fn close(&self) {
        if self.node.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.network.detach(self.node.slot);
        self.node.neighbors.write().clear();
        self.node.router.close();
        debug!(slot = self.node.slot, "memory node closed");
    }
}
