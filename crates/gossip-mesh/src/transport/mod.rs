//! Pub/sub substrate boundary.
//!
//! The gossip engine depends only on the [`PubSub`] trait: listen, identify,
//! connect, join a topic with a validator, subscribe, publish. Deduplication
//! of message ids is the substrate's job. Two substrates ship in-tree:
//!
//! - [`MemoryNetwork`]: in-process mesh with synchronous flooding
//! - [`TcpTransport`]: length-delimited frames over TCP

mod flood;
mod memory;
mod seen;
mod tcp;
mod wire;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use seen::SeenCacheConfig;
pub use tcp::TcpTransport;
pub use wire::{Frame, WIRE_VERSION};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::PeerAddr;
use crate::error::{P2pError, SubscriptionError};
use crate::gossip::{Envelope, InboundMessage};
use crate::protocol::PeerId;
use crate::validator::Validator;

/// Capacity of each local subscription queue.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The pub/sub substrate a node publishes through.
///
/// Implementations flood accepted messages to their direct neighbors, never
/// hand the same message id to a subscriber twice, and run the topic's
/// validator before delivering or forwarding anything.
pub trait PubSub: Send + Sync {
    /// Returns the stable identifier of this node.
    fn local_peer_id(&self) -> PeerId;

    /// Returns the addresses other nodes can connect to.
    fn listen_addrs(&self) -> Vec<String>;

    /// Returns the currently connected neighbors.
    fn neighbors(&self) -> Vec<PeerId>;

    /// Opens a connection to a peer and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::Connect`] on unreachable or unsupported addresses.
    fn connect<'a>(&'a self, addr: &'a PeerAddr) -> BoxFuture<'a, Result<PeerId, P2pError>>;

    /// Joins a topic, attaching the validator that gates it.
    fn join(&self, topic: &str, validator: Arc<dyn Validator>) -> Result<(), P2pError>;

    /// Subscribes to a joined topic.
    fn subscribe(&self, topic: &str) -> Result<Subscription, P2pError>;

    /// Publishes an envelope to the mesh.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::Publish`] if the local accept path refuses it.
    fn publish<'a>(&'a self, envelope: Envelope) -> BoxFuture<'a, Result<(), P2pError>>;

    /// Closes the substrate; subscriptions observe end-of-stream.
    fn close(&self);
}

/// Stream of accepted messages for one topic.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<InboundMessage>,
}

impl Subscription {
    pub(crate) fn new(topic: &str, rx: mpsc::Receiver<InboundMessage>) -> Self {
        Self {
            topic: topic.to_string(),
            rx,
        }
    }

    /// Returns the subscribed topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next message.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::Cancelled`] once `cancel` fires,
    /// [`SubscriptionError::Closed`] once the substrate is gone.
    pub async fn next(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<InboundMessage, SubscriptionError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SubscriptionError::Cancelled),
            msg = self.rx.recv() => msg.ok_or(SubscriptionError::Closed),
        }
    }

    /// Returns a queued message without waiting.
    pub fn try_next(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }

    /// Returns true once the substrate has dropped this subscription.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}
