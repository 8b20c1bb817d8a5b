//! Initial mesh wiring: peer addresses, the neighbor window, and the
//! connect-once bootstrap procedure.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::P2pError;
use crate::protocol::PeerId;
use crate::stats::NodeStats;
use crate::transport::PubSub;

/// Peers before a node's own index that it dials.
pub const DEFAULT_WINDOW_BEFORE: usize = 1;
/// Peers after a node's own index that it dials.
pub const DEFAULT_WINDOW_AFTER: usize = 2;

/// A dialable peer address.
///
/// Accepted forms:
///
/// - `host:port` (`[v6]:port` for IPv6)
/// - `/ip4/<ip>/tcp/<port>`, `/ip6/...`, `/dns4/<name>/tcp/<port>`, each
///   optionally followed by `/p2p/<peer id>`
/// - `/memory/<slot>` for the in-process substrate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    /// A TCP endpoint, optionally pinned to an expected peer id.
    Tcp {
        /// Host name or IP literal.
        host: String,
        /// TCP port.
        port: u16,
        /// Identity the remote must present, if known.
        peer_id: Option<PeerId>,
    },
    /// A node on a [`MemoryNetwork`](crate::transport::MemoryNetwork).
    Memory {
        /// Slot assigned at listen time.
        slot: u64,
    },
}

impl PeerAddr {
    /// The expected peer id, if the address carries one.
    #[must_use]
    pub const fn peer_id(&self) -> Option<PeerId> {
        match self {
            Self::Tcp { peer_id, .. } => *peer_id,
            Self::Memory { .. } => None,
        }
    }

    fn parse_multiaddr(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.trim_end_matches('/').split('/').skip(1).collect();
        match parts.as_slice() {
            ["memory", slot] => slot
                .parse()
                .map(|slot| Self::Memory { slot })
                .map_err(|e| format!("bad memory slot: {e}")),
            [proto, host, "tcp", port, rest @ ..] => {
                if !matches!(*proto, "ip4" | "ip6" | "dns" | "dns4" | "dns6") {
                    return Err(format!("unsupported protocol /{proto}"));
                }
                if proto.starts_with("ip") && host.parse::<IpAddr>().is_err() {
                    return Err(format!("invalid ip literal {host}"));
                }
                let port = port.parse().map_err(|e| format!("bad port: {e}"))?;
                let peer_id = match rest {
                    [] => None,
                    ["p2p", id] => Some(id.parse::<PeerId>().map_err(|e| e.to_string())?),
                    _ => return Err("unexpected trailing components".to_string()),
                };
                Ok(Self::Tcp {
                    host: (*host).to_string(),
                    port,
                    peer_id,
                })
            }
            _ => Err("unrecognised multiaddr".to_string()),
        }
    }

    fn parse_host_port(s: &str) -> Result<Self, String> {
        let (host, port) = s.rsplit_once(':').ok_or("missing port")?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err("missing host".to_string());
        }
        let port = port.parse().map_err(|e| format!("bad port: {e}"))?;
        Ok(Self::Tcp {
            host: host.to_string(),
            port,
            peer_id: None,
        })
    }
}

impl FromStr for PeerAddr {
    type Err = P2pError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = if s.starts_with('/') {
            Self::parse_multiaddr(s)
        } else {
            Self::parse_host_port(s)
        };
        parsed.map_err(|reason| P2pError::Connect {
            addr: s.to_string(),
            reason: format!("invalid address: {reason}"),
        })
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp {
                host,
                port,
                peer_id,
            } => {
                let proto = match host.parse::<IpAddr>() {
                    Ok(IpAddr::V4(_)) => "ip4",
                    Ok(IpAddr::V6(_)) => "ip6",
                    Err(_) => "dns4",
                };
                write!(f, "/{proto}/{host}/tcp/{port}")?;
                if let Some(id) = peer_id {
                    write!(f, "/p2p/{id}")?;
                }
                Ok(())
            }
            Self::Memory { slot } => write!(f, "/memory/{slot}"),
        }
    }
}

/// The peers node `index` dials: offsets `-before..=+after` in `peers`,
/// clamped to the list and excluding `index` itself.
#[must_use]
pub fn neighbor_window<T>(index: usize, peers: &[T], before: usize, after: usize) -> Vec<&T> {
    if peers.is_empty() || index >= peers.len() {
        return Vec::new();
    }
    let start = index.saturating_sub(before);
    let end = index.saturating_add(after).min(peers.len() - 1);
    (start..=end)
        .filter(|i| *i != index)
        .map(|i| &peers[i])
        .collect()
}

/// A configured bootstrap address and what happened when we dialed it.
#[derive(Debug, Clone)]
pub struct BootstrapNode {
    address: String,
    peer_id: Option<PeerId>,
    last_connected: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl BootstrapNode {
    /// Creates an undialed bootstrap node.
    #[must_use]
    pub const fn new(address: String) -> Self {
        Self {
            address,
            peer_id: None,
            last_connected: None,
            last_error: None,
        }
    }

    /// The configured address string.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the last dial succeeded.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.peer_id.is_some()
    }

    /// Identity presented by the remote, once connected.
    #[must_use]
    pub const fn peer_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    /// When the node was last connected, if ever.
    #[must_use]
    pub const fn last_connected(&self) -> Option<DateTime<Utc>> {
        self.last_connected
    }

    /// Why the last dial failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn mark_connected(&mut self, peer_id: PeerId) {
        self.peer_id = Some(peer_id);
        self.last_connected = Some(Utc::now());
        self.last_error = None;
    }

    fn mark_failed(&mut self, error: &P2pError) {
        self.peer_id = None;
        self.last_error = Some(error.to_string());
    }
}

/// Outcome of [`connect_all`].
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    nodes: Vec<BootstrapNode>,
}

impl BootstrapReport {
    /// Every address that was dialed, in input order.
    #[must_use]
    pub fn nodes(&self) -> &[BootstrapNode] {
        &self.nodes
    }

    /// Number of successful connects.
    #[must_use]
    pub fn connected(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_connected()).count()
    }

    /// Number of failed connects.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.nodes.len() - self.connected()
    }

    /// True when no address was given: the node is a mesh seed.
    #[must_use]
    pub fn is_seed(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Dials every non-empty address once. Failures are logged and counted,
/// never retried and never fatal.
pub async fn connect_all<S: AsRef<str>>(
    transport: &dyn PubSub,
    addrs: &[S],
    stats: &NodeStats,
) -> BootstrapReport {
    let mut report = BootstrapReport::default();

    for raw in addrs.iter().map(|a| a.as_ref().trim()) {
        if raw.is_empty() {
            continue;
        }
        let mut node = BootstrapNode::new(raw.to_string());

        let result = match raw.parse::<PeerAddr>() {
            Ok(addr) => transport.connect(&addr).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(peer_id) => {
                info!(addr = raw, %peer_id, "connected to bootstrap peer");
                node.mark_connected(peer_id);
            }
            Err(e) => {
                warn!(addr = raw, error = %e, "bootstrap connection failed");
                stats.record_connect_failure();
                node.mark_failed(&e);
            }
        }
        report.nodes.push(node);
    }

    if report.is_seed() {
        info!("no bootstrap peers; acting as mesh seed");
    }
    report
}
