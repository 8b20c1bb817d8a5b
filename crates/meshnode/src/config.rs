//! Node configuration from command-line flags and `MESHNODE_*` variables.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use gossip_mesh::{RuntimeConfig, SeenCacheConfig};

use crate::error::NodeError;

/// Longest accepted metric generation period.
pub const MAX_METRICS_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Startup configuration for one mesh node.
#[derive(Debug, Clone, Parser)]
#[command(name = "meshnode")]
#[command(about = "Gossip mesh node")]
#[command(version)]
pub struct NodeConfig {
    /// Address to listen on for peer connections
    #[arg(long, env = "MESHNODE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for peer connections (0 picks a free port)
    #[arg(long, env = "MESHNODE_PORT", default_value_t = 4001)]
    pub port: u16,

    /// Port for the HTTP trigger endpoint
    #[arg(long, env = "MESHNODE_API_PORT", default_value_t = 8000)]
    pub api_port: u16,

    /// Peer to dial at startup; repeat for several. Empty means act as seed
    #[arg(
        long = "bootstrap-peer",
        env = "MESHNODE_BOOTSTRAP_PEER",
        value_delimiter = ','
    )]
    pub bootstrap_peer: Vec<String>,

    /// Metric generation period in milliseconds (0 disables generation)
    #[arg(long, env = "MESHNODE_METRICS_INTERVAL_MS", default_value_t = 0)]
    pub metrics_interval_ms: u64,

    /// Seed for synthetic metric generation
    #[arg(long, env = "MESHNODE_SEED")]
    pub seed: Option<u64>,

    /// Hostname stamped on metric batches (defaults to the system hostname)
    #[arg(long, env = "MESHNODE_HOSTNAME")]
    pub hostname: Option<String>,

    /// Seen-cache capacity: message ids remembered for deduplication
    #[arg(long, env = "MESHNODE_SEEN_CACHE_CAPACITY", default_value_t = 10_000)]
    pub seen_cache_capacity: usize,

    /// Seconds a message id stays in the seen cache
    #[arg(long, env = "MESHNODE_SEEN_CACHE_TTL_SECS", default_value_t = 120)]
    pub seen_cache_ttl_secs: u64,

    /// Print the peer id as the first stdout line
    #[arg(long, env = "MESHNODE_PRINT_PEER_ID")]
    pub print_peer_id: bool,
}

impl NodeConfig {
    /// Loose sanity checks before anything binds.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.host.trim().is_empty() {
            return Err(NodeError::Config("host cannot be empty".to_string()));
        }

        if self.host.trim().parse::<IpAddr>().is_err() {
            return Err(NodeError::Config(format!(
                "host must be an IP address, got '{}'",
                self.host
            )));
        }

        if self.api_port == 0 {
            return Err(NodeError::Config("api_port cannot be 0".to_string()));
        }

        if self.port != 0 && self.port == self.api_port {
            return Err(NodeError::Config(format!(
                "port and api_port must differ (both {})",
                self.port
            )));
        }

        if self.seen_cache_capacity == 0 || self.seen_cache_ttl_secs == 0 {
            return Err(NodeError::Config(
                "seen cache capacity and ttl must be positive".to_string(),
            ));
        }

        // batches without a hostname fail decoding, including our own
        if self.hostname.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err(NodeError::Config("hostname cannot be empty".to_string()));
        }

        if self.metrics_interval_ms > MAX_METRICS_INTERVAL_MS {
            return Err(NodeError::Config(format!(
                "metrics_interval_ms cannot exceed {MAX_METRICS_INTERVAL_MS}"
            )));
        }

        Ok(())
    }

    fn ip(&self) -> Result<IpAddr, NodeError> {
        self.host
            .trim()
            .parse()
            .map_err(|e| NodeError::Config(format!("invalid host '{}': {e}", self.host)))
    }

    /// Where the peer listener binds.
    pub fn p2p_addr(&self) -> Result<SocketAddr, NodeError> {
        Ok(SocketAddr::new(self.ip()?, self.port))
    }

    /// Where the HTTP trigger binds.
    pub fn api_addr(&self) -> Result<SocketAddr, NodeError> {
        Ok(SocketAddr::new(self.ip()?, self.api_port))
    }

    /// Bootstrap addresses with blanks removed.
    #[must_use]
    pub fn bootstrap_peers(&self) -> Vec<String> {
        self.bootstrap_peer
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Deduplication window for the peer substrate.
    #[must_use]
    pub fn seen_cache(&self) -> SeenCacheConfig {
        SeenCacheConfig::default()
            .with_capacity(self.seen_cache_capacity)
            .with_ttl(Duration::from_secs(self.seen_cache_ttl_secs))
    }

    /// Library runtime settings derived from this configuration.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        let hostname = self
            .hostname
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map_or_else(system_hostname, str::to_string);
        let mut config = RuntimeConfig::default()
            .with_hostname(hostname)
            .with_metrics_interval(Duration::from_millis(self.metrics_interval_ms));
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        config
    }
}

fn system_hostname() -> String {
    hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
