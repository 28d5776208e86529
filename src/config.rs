use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ConfigError;

/// Retry schedule for the shard-manager notification.
///
/// The delay before attempt `n + 1` is `initial_backoff * 2^(n - 1)`, capped at
/// `max_backoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub listen_addr: SocketAddr,
    pub peers: Vec<PeerConfig>,
    pub shard_manager_url: String,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub notify_retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerConfig {
    pub addr: String, // host:port format, supports both IP and hostnames
}

impl PeerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

pub const DEFAULT_SHARD_MANAGER_URL: &str = "http://localhost:4000/move-shards";

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node1".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            peers: Vec::new(),
            shard_manager_url: DEFAULT_SHARD_MANAGER_URL.to_string(),
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            rpc_timeout_ms: 75,
            notify_retry: RetryPolicy::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            node_id: node_id.into(),
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, addr: impl Into<String>) -> Self {
        self.peers.push(PeerConfig::new(addr));
        self
    }

    pub fn with_shard_manager_url(mut self, url: impl Into<String>) -> Self {
        self.shard_manager_url = url.into();
        self
    }

    /// Number of voting members, this node included.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Reject any configuration that would leave the node with an ambiguous
    /// identity or a timer setup that cannot elect a stable leader.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_node_id(&self.node_id)?;

        if self.listen_addr.port() == 0 {
            return Err(ConfigError::InvalidPort(0));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            validate_peer_addr(&peer.addr)?;
            if !seen.insert(peer.addr.as_str()) {
                return Err(ConfigError::DuplicatePeer(peer.addr.clone()));
            }
        }

        validate_shard_manager_url(&self.shard_manager_url)?;

        if self.election_timeout_min_ms == 0
            || self.election_timeout_min_ms > self.election_timeout_max_ms
        {
            return Err(ConfigError::InvalidElectionTimeout {
                min_ms: self.election_timeout_min_ms,
                max_ms: self.election_timeout_max_ms,
            });
        }
        if self.heartbeat_interval_ms == 0
            || self.heartbeat_interval_ms >= self.election_timeout_min_ms
        {
            return Err(ConfigError::InvalidHeartbeatInterval {
                interval_ms: self.heartbeat_interval_ms,
                election_min_ms: self.election_timeout_min_ms,
            });
        }
        if self.rpc_timeout_ms == 0 {
            return Err(ConfigError::InvalidRpcTimeout);
        }
        if self.notify_retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy);
        }

        Ok(())
    }
}

fn validate_node_id(node_id: &str) -> Result<(), ConfigError> {
    if node_id.trim().is_empty() {
        return Err(ConfigError::MissingNodeId);
    }
    if node_id.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidNodeId(node_id.to_string()));
    }
    Ok(())
}

fn validate_peer_addr(addr: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidPeerAddress(addr.to_string());

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.contains(char::is_whitespace) || host.contains('/') {
        return Err(invalid());
    }
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(()),
        _ => Err(invalid()),
    }
}

fn validate_shard_manager_url(url: &str) -> Result<(), ConfigError> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        _ => Err(ConfigError::InvalidShardManagerUrl(url.to_string())),
    }
}

/// Parse a comma-separated `host:port` peer list.
///
/// Blank entries are skipped; any malformed entry fails the whole list so a
/// node never starts with a partial view of its cluster.
pub fn parse_peers(peers_str: &str) -> Result<Vec<PeerConfig>, ConfigError> {
    let mut peers = Vec::new();
    for entry in peers_str.split(',') {
        let addr = entry.trim();
        if addr.is_empty() {
            continue;
        }
        let addr = addr
            .strip_prefix("http://")
            .unwrap_or(addr)
            .trim_end_matches('/');
        validate_peer_addr(addr)?;
        peers.push(PeerConfig::new(addr));
    }
    Ok(peers)
}
