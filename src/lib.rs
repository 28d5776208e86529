pub mod config;
pub mod error;
pub mod node;
pub mod notifier;
pub mod raft;
pub mod server;
pub mod shutdown;
pub mod transport;
