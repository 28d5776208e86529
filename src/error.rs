use thiserror::Error;

/// Startup configuration problems. All of these are fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("node id is missing")]
    MissingNodeId,

    #[error("invalid node id {0:?}: must not contain whitespace")]
    InvalidNodeId(String),

    #[error("invalid port {0}")]
    InvalidPort(u16),

    #[error("malformed peer address {0:?}, expected host:port")]
    InvalidPeerAddress(String),

    #[error("peer {0} listed more than once")]
    DuplicatePeer(String),

    #[error("invalid shard manager url {0:?}")]
    InvalidShardManagerUrl(String),

    #[error("invalid election timeout range {min_ms}..={max_ms} ms")]
    InvalidElectionTimeout { min_ms: u64, max_ms: u64 },

    #[error("heartbeat interval {interval_ms} ms must be below the election timeout floor {election_min_ms} ms")]
    InvalidHeartbeatInterval { interval_ms: u64, election_min_ms: u64 },

    #[error("rpc timeout must be greater than zero")]
    InvalidRpcTimeout,

    #[error("notification retry policy needs at least one attempt")]
    InvalidRetryPolicy,
}

/// Failure of a single peer RPC. Callers treat it as a withheld response.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("peer {peer} answered with status {status}")]
    BadStatus { peer: String, status: u16 },
}

/// Failure of one shard-manager notification attempt.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("shard manager request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("shard manager answered with status {0}")]
    Status(u16),
}

#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Raft node has stopped")]
    NodeStopped,
}

pub type Result<T> = std::result::Result<T, ElectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = TransportError::PeerUnreachable {
            peer: "10.0.0.2:3000".to_string(),
            reason: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.2:3000"));
        assert!(msg.contains("connection refused"));

        let err: ElectionError = ConfigError::DuplicatePeer("b:1".to_string()).into();
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[tokio::test]
    async fn client_setup_failure_is_not_a_peer_error() {
        let e = reqwest::Client::new()
            .get("not a url")
            .send()
            .await
            .unwrap_err();
        let err: ElectionError = e.into();
        assert!(matches!(err, ElectionError::HttpClient(_)));
        assert!(err.to_string().starts_with("Failed to build HTTP client"));
    }
}
