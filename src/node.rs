use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::notifier::ShardManagerNotifier;
use crate::raft::{RaftHandle, RaftNode};
use crate::server;
use crate::transport::HttpTransport;

/// Main node that wires configuration, peer transport, shard notifier, the
/// election loop and the HTTP server together.
pub struct Node {
    pub config: NodeConfig,
    raft_node: RaftNode<HttpTransport, ShardManagerNotifier>,
    handle: RaftHandle,
}

impl Node {
    /// Validate `config` and build every component. Nothing is bound or
    /// spawned until `run`.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;

        let transport = HttpTransport::new(config.rpc_timeout())?;
        let notifier = ShardManagerNotifier::new(
            config.shard_manager_url.clone(),
            config.notify_retry.clone(),
        )?;
        let (raft_node, handle) =
            RaftNode::new(config.clone(), Arc::new(transport), Arc::new(notifier));

        Ok(Self {
            config,
            raft_node,
            handle,
        })
    }

    pub fn handle(&self) -> RaftHandle {
        self.handle.clone()
    }

    /// Bind the configured address and run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Run the node on an already bound listener.
    ///
    /// The election loop runs on its own task; the HTTP server runs on this
    /// one. Cancelling `shutdown` stops both.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        tracing::info!(
            node_id = %self.config.node_id,
            listen_addr = %listener.local_addr()?,
            peers = ?self.config.peers.iter().map(|p| p.addr.as_str()).collect::<Vec<_>>(),
            shard_manager_url = %self.config.shard_manager_url,
            "Starting node"
        );

        let raft_task = tokio::spawn(self.raft_node.run(shutdown.clone()));

        let served = server::serve(listener, self.handle, shutdown.clone()).await;

        // Make sure the election loop stops even if the server failed on its own.
        shutdown.cancel();
        if let Err(e) = raft_task.await {
            tracing::error!(error = %e, "Raft task terminated abnormally");
        }

        served?;
        Ok(())
    }
}
