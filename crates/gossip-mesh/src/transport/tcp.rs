//! TCP substrate: length-delimited [`Frame`]s over plain TCP.
//!
//! Each connection starts with a hello exchange carrying both peer ids. After
//! that a writer task drains a bounded per-peer queue and a reader task feeds
//! publish frames into the flood router.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::flood::{FloodRouter, Route};
use super::seen::SeenCacheConfig;
use super::wire::Frame;
use super::{BoxFuture, PubSub, Subscription};
use crate::bootstrap::PeerAddr;
use crate::error::P2pError;
use crate::gossip::Envelope;
use crate::protocol::{Identity, PeerId, PeerInfo};
use crate::validator::Validator;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Outbound frames queued per peer before new ones are dropped.
const PEER_QUEUE: usize = 256;

/// How long an accepted connection has to send its hello.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

#[derive(Debug)]
struct PeerLink {
    conn: u64,
    tx: mpsc::Sender<Bytes>,
    info: PeerInfo,
}

#[derive(Debug)]
struct TcpInner {
    router: FloodRouter,
    local_addr: SocketAddr,
    peers: RwLock<HashMap<PeerId, PeerLink>>,
    next_conn: AtomicU64,
    writers: AtomicUsize,
    cancel: CancellationToken,
}

/// TCP implementation of [`PubSub`].
#[derive(Debug, Clone)]
pub struct TcpTransport {
    inner: Arc<TcpInner>,
}

impl TcpTransport {
    /// Binds a listener and starts accepting connections.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::Io`] if the address cannot be bound.
    pub async fn bind(identity: &Identity, addr: SocketAddr) -> Result<Self, P2pError> {
        Self::bind_with(identity, addr, SeenCacheConfig::default()).await
    }

    /// Like [`TcpTransport::bind`], with an explicit seen cache.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::Io`] if the address cannot be bound.
    pub async fn bind_with(
        identity: &Identity,
        addr: SocketAddr,
        seen: SeenCacheConfig,
    ) -> Result<Self, P2pError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let inner = Arc::new(TcpInner {
            router: FloodRouter::new(identity.peer_id(), seen),
            local_addr,
            peers: RwLock::new(HashMap::new()),
            next_conn: AtomicU64::new(0),
            writers: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        });

        info!(%local_addr, peer_id = %identity.peer_id(), "tcp transport listening");
        tokio::spawn(accept_loop(Arc::clone(&inner), listener));
        Ok(Self { inner })
    }

    /// The bound socket address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// A dialable address for this node, including its peer id.
    #[must_use]
    pub fn addr(&self) -> PeerAddr {
        PeerAddr::Tcp {
            host: self.inner.local_addr.ip().to_string(),
            port: self.inner.local_addr.port(),
            peer_id: Some(self.inner.router.local_peer_id()),
        }
    }

    /// Connected peers with their advertised addresses.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner
            .peers
            .read()
            .values()
            .map(|l| l.info.clone())
            .collect()
    }

    /// Writer tasks still running, one per live outbound queue.
    #[must_use]
    pub fn active_writers(&self) -> usize {
        self.inner.writers.load(Ordering::Acquire)
    }
}

impl TcpInner {
    fn hello(&self) -> Bytes {
        Frame::Hello {
            peer_id: self.router.local_peer_id(),
            listen_addr: self.advertised_addr(),
        }
        .encode_wire()
    }

    fn advertised_addr(&self) -> String {
        let proto = if self.local_addr.is_ipv6() { "ip6" } else { "ip4" };
        format!(
            "/{proto}/{}/tcp/{}/p2p/{}",
            self.local_addr.ip(),
            self.local_addr.port(),
            self.router.local_peer_id()
        )
    }

    /// Registers a handshaken connection and spawns its reader and writer.
    ///
    /// A newer connection to the same peer replaces the older link. The
    /// link owns the only sender, so the replaced writer stops once its
    /// queue drains.
    fn attach(self: &Arc<Self>, peer_id: PeerId, listen_addr: String, framed: FramedStream) {
        let (mut sink, stream) = framed.split();
        let (tx, mut rx) = mpsc::channel::<Bytes>(PEER_QUEUE);
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);

        {
            let mut peers = self.peers.write();
            let info = match peers.remove(&peer_id) {
                Some(old) => {
                    debug!(%peer_id, conn, replaced = old.conn, "replacing existing connection");
                    let mut info = old.info;
                    info.add_address(listen_addr);
                    info.touch();
                    info
                }
                None => PeerInfo::new(peer_id, vec![listen_addr]),
            };
            peers.insert(peer_id, PeerLink { conn, tx, info });
        }

        let inner = Arc::clone(self);
        inner.writers.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    debug!(%peer_id, conn, error = %e, "write failed");
                    break;
                }
            }
            inner.writers.fetch_sub(1, Ordering::AcqRel);
        });

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.read_loop(peer_id, stream).await;
            let mut peers = inner.peers.write();
            if peers.get(&peer_id).is_some_and(|l| l.conn == conn) {
                peers.remove(&peer_id);
            }
            debug!(%peer_id, conn, "peer disconnected");
        });
    }

    async fn read_loop(&self, peer_id: PeerId, mut stream: SplitStream<FramedStream>) {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                next = stream.next() => next,
            };
            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    debug!(%peer_id, error = %e, "read failed");
                    return;
                }
                None => return,
            };

            match Frame::decode_wire(&bytes) {
                Ok(Frame::Publish(envelope)) => {
                    if let Some(link) = self.peers.write().get_mut(&peer_id) {
                        link.info.touch();
                    }
                    self.receive(peer_id, &envelope);
                }
                Ok(Frame::Hello { .. }) => {
                    debug!(%peer_id, "ignoring repeated hello");
                }
                Err(e) => {
                    warn!(%peer_id, error = %e, "dropping undecodable frame");
                }
            }
        }
    }

    fn receive(&self, from: PeerId, envelope: &Envelope) {
        if self.router.route_inbound(from, envelope) == Route::Forward {
            self.forward(from, envelope);
        }
    }

    fn forward(&self, from: PeerId, envelope: &Envelope) {
        let frame = Frame::Publish(envelope.clone()).encode_wire();
        let peers = self.peers.read();
        for target in self
            .router
            .forward_targets(peers.keys().copied(), from, envelope.origin)
        {
            let Some(link) = peers.get(&target) else {
                continue;
            };
            if let Err(mpsc::error::TrySendError::Full(_)) = link.tx.try_send(frame.clone()) {
                warn!(peer_id = %target, "peer queue full, dropping frame");
            }
        }
    }
}

async fn accept_loop(inner: Arc<TcpInner>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    match tokio::time::timeout(HANDSHAKE_TIMEOUT, accept_handshake(&inner, stream))
                        .await
                    {
                        Ok(Ok((peer_id, listen_addr, framed))) => {
                            debug!(%peer_id, %remote, "inbound peer connected");
                            inner.attach(peer_id, listen_addr, framed);
                        }
                        Ok(Err(e)) => debug!(%remote, error = %e, "inbound handshake failed"),
                        Err(_) => debug!(%remote, "inbound handshake timed out"),
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

async fn accept_handshake(
    inner: &TcpInner,
    stream: TcpStream,
) -> Result<(PeerId, String, FramedStream), P2pError> {
    let mut framed = framed(stream);
    let (peer_id, listen_addr) = read_hello(&mut framed).await?;
    if peer_id == inner.router.local_peer_id() {
        return Err(P2pError::Protocol("peer presented our own id".to_string()));
    }
    framed.send(inner.hello()).await?;
    Ok((peer_id, listen_addr, framed))
}

async fn read_hello(framed: &mut FramedStream) -> Result<(PeerId, String), P2pError> {
    let bytes = framed
        .next()
        .await
        .ok_or_else(|| P2pError::Protocol("connection closed during handshake".to_string()))??;
    match Frame::decode_wire(&bytes)? {
        Frame::Hello {
            peer_id,
            listen_addr,
        } => Ok((peer_id, listen_addr)),
        Frame::Publish(_) => Err(P2pError::Protocol("expected hello frame".to_string())),
    }
}

fn framed(stream: TcpStream) -> FramedStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec();
    Framed::new(stream, codec)
}

impl PubSub for TcpTransport {
    fn local_peer_id(&self) -> PeerId {
        self.inner.router.local_peer_id()
    }

    fn listen_addrs(&self) -> Vec<String> {
        vec![self.inner.advertised_addr()]
    }

    fn neighbors(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.peers.read().keys().copied().collect();
        peers.sort();
        peers
    }

    fn connect<'a>(&'a self, addr: &'a PeerAddr) -> BoxFuture<'a, Result<PeerId, P2pError>> {
        Box::pin(async move {
            let refuse = |reason: String| P2pError::Connect {
                addr: addr.to_string(),
                reason,
            };

            if self.inner.cancel.is_cancelled() {
                return Err(refuse("transport closed".to_string()));
            }
            let PeerAddr::Tcp {
                host,
                port,
                peer_id: expected,
            } = addr
            else {
                return Err(refuse("tcp transport cannot dial memory addresses".to_string()));
            };

            let stream = TcpStream::connect((host.as_str(), *port))
                .await
                .map_err(|e| refuse(e.to_string()))?;
            let mut framed = framed(stream);
            framed
                .send(self.inner.hello())
                .await
                .map_err(|e| refuse(e.to_string()))?;
            let (peer_id, listen_addr) = read_hello(&mut framed)
                .await
                .map_err(|e| refuse(e.to_string()))?;

            if peer_id == self.local_peer_id() {
                return Err(refuse("cannot connect to self".to_string()));
            }
            if let Some(expected) = expected {
                if *expected != peer_id {
                    return Err(refuse(format!("expected peer {expected}, found {peer_id}")));
                }
            }

            self.inner.attach(peer_id, listen_addr, framed);
            info!(%peer_id, %addr, "connected to peer");
            Ok(peer_id)
        })
    }

    fn join(&self, topic: &str, validator: Arc<dyn Validator>) -> Result<(), P2pError> {
        self.inner.router.join(topic, validator)
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription, P2pError> {
        self.inner.router.subscribe(topic)
    }

    fn publish<'a>(&'a self, envelope: Envelope) -> BoxFuture<'a, Result<(), P2pError>> {
        Box::pin(async move {
            if self.inner.cancel.is_cancelled() {
                return Err(P2pError::Publish("transport closed".to_string()));
            }
            self.inner.router.route_local(&envelope)?;
            self.inner
                .forward(self.inner.router.local_peer_id(), &envelope);
            Ok(())
        })
    }

    fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.peers.write().clear();
        self.inner.router.close();
    }
}
