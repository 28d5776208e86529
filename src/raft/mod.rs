pub mod node;
pub mod rpc;
pub mod state;
pub mod timer;

pub use node::{RaftHandle, RaftMessage, RaftNode, RaftStatus};
pub use rpc::{HeartbeatRequest, HeartbeatResponse, VoteRequest, VoteResponse};
pub use state::{LeaderInfo, RaftRole, RaftState};
