use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use raft_elect::config::{parse_peers, NodeConfig, RetryPolicy, DEFAULT_SHARD_MANAGER_URL};
use raft_elect::node::Node;
use raft_elect::server::{StatusResponse, STATUS_PATH};
use raft_elect::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "raft-elect")]
#[command(version)]
#[command(about = "Raft leader election that triggers shard rebalancing on leadership change")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start an election node
    Server(ServerArgs),

    /// Print the status of a running node
    Status {
        /// Node address (host:port)
        #[arg(long, short = 'a', default_value = "127.0.0.1:3000")]
        addr: String,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Node ID (unique identifier for this node)
    #[arg(long, env = "NODE_ID")]
    node_id: String,

    /// Port to listen on for peer RPCs and status
    #[arg(long, env = "PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Peer addresses (comma-separated, format: "host:port")
    /// Example: "127.0.0.1:3001,127.0.0.1:3002"
    #[arg(long, env = "PEERS", default_value = "")]
    peers: String,

    /// Endpoint notified with {newLeaderId, term} when this node becomes leader
    #[arg(long, env = "SHARD_MANAGER_URL", default_value = DEFAULT_SHARD_MANAGER_URL)]
    shard_manager_url: String,

    // === Timing ===
    #[arg(long, default_value = "150")]
    election_timeout_min_ms: u64,

    #[arg(long, default_value = "300")]
    election_timeout_max_ms: u64,

    #[arg(long, default_value = "50")]
    heartbeat_interval_ms: u64,

    /// Per-RPC timeout (defaults to half the election timeout floor)
    #[arg(long)]
    rpc_timeout_ms: Option<u64>,

    // === Shard manager retries ===
    #[arg(long, default_value = "4")]
    notify_max_attempts: u32,

    #[arg(long, default_value = "100")]
    notify_initial_backoff_ms: u64,

    #[arg(long, default_value = "2000")]
    notify_max_backoff_ms: u64,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

impl ServerArgs {
    fn into_config(self) -> Result<NodeConfig, Box<dyn std::error::Error>> {
        let peers = parse_peers(&self.peers)?;
        let rpc_timeout_ms = self
            .rpc_timeout_ms
            .unwrap_or(self.election_timeout_min_ms / 2);

        Ok(NodeConfig {
            node_id: self.node_id,
            listen_addr: SocketAddr::new(self.host, self.port),
            peers,
            shard_manager_url: self.shard_manager_url,
            election_timeout_min_ms: self.election_timeout_min_ms,
            election_timeout_max_ms: self.election_timeout_max_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            rpc_timeout_ms,
            notify_retry: RetryPolicy {
                max_attempts: self.notify_max_attempts,
                initial_backoff: Duration::from_millis(self.notify_initial_backoff_ms),
                max_backoff: Duration::from_millis(self.notify_max_backoff_ms),
            },
        })
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = args.into_config()?;
    let node = match Node::new(config) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    let shutdown = install_shutdown_handler()?;
    node.run(shutdown).await?;

    tracing::info!("Node stopped");
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_status(
    addr: &str,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("http://{}{}", addr.trim_start_matches("http://"), STATUS_PATH);
    let response = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json::<StatusResponse>()
        .await?;

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Table => {
            let leader = match (&response.leader_id, response.leader_term) {
                (Some(id), Some(term)) => format!("{} (term {})", id, term),
                _ => "unknown".to_string(),
            };
            println!("Node Status");
            println!("{}", "=".repeat(40));
            println!("Node:      {}", response.node_id);
            println!("Role:      {}", response.role);
            println!("Term:      {}", response.current_term);
            println!(
                "Voted For: {}",
                response.voted_for.as_deref().unwrap_or("-")
            );
            println!("Leader:    {}", leader);
            println!("Elections: {}", response.elections_started);
            println!("Won:       {}", response.leadership_acquisitions);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Status { addr, output } => {
            handle_status(&addr, &output).await?;
        }
    }

    Ok(())
}
