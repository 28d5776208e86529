use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::{ElectionError, Result, TransportError};
use crate::notifier::LeadershipNotifier;
use crate::raft::rpc::{
    handle_heartbeat, handle_request_vote, HeartbeatRequest, HeartbeatResponse, VoteRequest,
    VoteResponse,
};
use crate::raft::state::{LeaderInfo, RaftRole, RaftState, VoteOutcome};
use crate::raft::timer::{schedule_election_timeout, schedule_heartbeat, TimerHandle};
use crate::transport::PeerTransport;

const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// Message types for the Raft node event loop
#[derive(Debug)]
pub enum RaftMessage {
    /// Inbound RequestVote RPC
    RequestVote {
        req: VoteRequest,
        response_tx: oneshot::Sender<VoteResponse>,
    },
    /// Inbound Heartbeat RPC
    Heartbeat {
        req: HeartbeatRequest,
        response_tx: oneshot::Sender<HeartbeatResponse>,
    },
    /// Outcome of a RequestVote we sent while campaigning for `election_term`
    VoteReply {
        peer: String,
        election_term: u64,
        result: std::result::Result<VoteResponse, TransportError>,
    },
    /// Outcome of a Heartbeat we sent as leader
    HeartbeatReply {
        peer: String,
        result: std::result::Result<HeartbeatResponse, TransportError>,
    },
    ElectionTimeout {
        timer_id: u64,
    },
    HeartbeatTick {
        timer_id: u64,
    },
    /// Start an election now, as if the election timer had fired
    Campaign,
}

/// Point-in-time view of a node, published after every processed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaftStatus {
    pub node_id: String,
    pub role: RaftRole,
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub leader: Option<LeaderInfo>,
    pub elections_started: u64,
    pub leadership_acquisitions: u64,
}

impl RaftStatus {
    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader.as_ref().map(|l| l.leader_id.as_str())
    }
}

/// Cloneable handle used by the RPC server, the supervisor and tests to talk
/// to a running `RaftNode`.
#[derive(Debug, Clone)]
pub struct RaftHandle {
    node_id: String,
    message_tx: mpsc::Sender<RaftMessage>,
    status_rx: watch::Receiver<RaftStatus>,
}

impl RaftHandle {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub async fn request_vote(&self, req: VoteRequest) -> Result<VoteResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(RaftMessage::RequestVote { req, response_tx })
            .await?;
        response_rx.await.map_err(|_| ElectionError::NodeStopped)
    }

    pub async fn heartbeat(&self, req: HeartbeatRequest) -> Result<HeartbeatResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(RaftMessage::Heartbeat { req, response_tx })
            .await?;
        response_rx.await.map_err(|_| ElectionError::NodeStopped)
    }

    /// Ask the node to start an election immediately. Ignored by a leader.
    pub async fn campaign(&self) -> Result<()> {
        self.send(RaftMessage::Campaign).await
    }

    pub fn status(&self) -> RaftStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RaftStatus> {
        self.status_rx.clone()
    }

    /// False once the event loop has exited.
    pub fn is_running(&self) -> bool {
        !self.message_tx.is_closed()
    }

    async fn send(&self, msg: RaftMessage) -> Result<()> {
        self.message_tx
            .send(msg)
            .await
            .map_err(|_| ElectionError::NodeStopped)
    }
}

/// The election state machine.
///
/// A single task runs `run` and is the only owner of `RaftState`; every RPC,
/// reply and timer event is serialized through one channel. Outbound RPCs run
/// on spawned tasks that hold no state and report back through the same
/// channel.
pub struct RaftNode<T, N> {
    config: NodeConfig,
    state: RaftState,
    transport: Arc<T>,
    notifier: Arc<N>,
    message_tx: mpsc::Sender<RaftMessage>,
    message_rx: mpsc::Receiver<RaftMessage>,
    status_tx: watch::Sender<RaftStatus>,
    election_timer: Option<TimerHandle>,
    heartbeat_timer: Option<TimerHandle>,
    elections_started: u64,
    leadership_acquisitions: u64,
}

impl<T: PeerTransport, N: LeadershipNotifier> RaftNode<T, N> {
    pub fn new(config: NodeConfig, transport: Arc<T>, notifier: Arc<N>) -> (Self, RaftHandle) {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let state = RaftState::new(config.node_id.clone(), config.cluster_size());

        let initial = RaftStatus {
            node_id: config.node_id.clone(),
            role: state.role,
            current_term: state.current_term,
            voted_for: None,
            leader: None,
            elections_started: 0,
            leadership_acquisitions: 0,
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let handle = RaftHandle {
            node_id: config.node_id.clone(),
            message_tx: message_tx.clone(),
            status_rx,
        };

        let node = Self {
            config,
            state,
            transport,
            notifier,
            message_tx,
            message_rx,
            status_tx,
            election_timer: None,
            heartbeat_timer: None,
            elections_started: 0,
            leadership_acquisitions: 0,
        };

        (node, handle)
    }

    /// Run the Raft node main loop until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            node_id = %self.state.node_id,
            cluster_size = self.state.cluster_size,
            "Raft node started as follower"
        );
        self.reset_election_timer();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(node_id = %self.state.node_id, "Raft node shutting down");
                    break;
                }
                msg = self.message_rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle_message(msg);
                    self.publish_status();
                }
            }
        }

        self.cancel_election_timer();
        self.cancel_heartbeat_timer();
    }

    fn handle_message(&mut self, msg: RaftMessage) {
        match msg {
            RaftMessage::RequestVote { req, response_tx } => {
                let prev_role = self.state.role;
                let response = handle_request_vote(&mut self.state, &req);
                self.after_role_change(prev_role);
                if response.vote_granted {
                    self.reset_election_timer();
                }
                // Publish first so the caller observes the state it was answered from.
                self.publish_status();
                let _ = response_tx.send(response);
            }
            RaftMessage::Heartbeat { req, response_tx } => {
                let prev_role = self.state.role;
                let response = handle_heartbeat(&mut self.state, &req);
                self.after_role_change(prev_role);
                if response.ack {
                    self.reset_election_timer();
                }
                self.publish_status();
                let _ = response_tx.send(response);
            }
            RaftMessage::VoteReply {
                peer,
                election_term,
                result,
            } => self.handle_vote_reply(peer, election_term, result),
            RaftMessage::HeartbeatReply { peer, result } => {
                self.handle_heartbeat_reply(peer, result)
            }
            RaftMessage::ElectionTimeout { timer_id } => {
                if self.election_timer.as_ref().map(TimerHandle::id) != Some(timer_id) {
                    tracing::trace!(timer_id, "Ignoring cancelled election timer");
                    return;
                }
                self.election_timer = None;
                if self.state.is_leader() {
                    return;
                }
                if self.state.role == RaftRole::Candidate {
                    tracing::info!(
                        node_id = %self.state.node_id,
                        term = self.state.current_term,
                        votes = self.state.votes_received.len(),
                        needed = self.state.majority(),
                        "Election timed out without majority, retrying"
                    );
                }
                self.start_election();
            }
            RaftMessage::HeartbeatTick { timer_id } => {
                if self.heartbeat_timer.as_ref().map(TimerHandle::id) != Some(timer_id) {
                    tracing::trace!(timer_id, "Ignoring cancelled heartbeat timer");
                    return;
                }
                if self.state.is_leader() {
                    self.send_heartbeats();
                }
            }
            RaftMessage::Campaign => {
                if !self.state.is_leader() {
                    self.start_election();
                }
            }
        }
    }

    /// Start a new election
    fn start_election(&mut self) {
        let term = self.state.become_candidate();
        self.elections_started += 1;
        self.reset_election_timer();

        tracing::info!(node_id = %self.state.node_id, term, "Starting election");

        if self.state.has_majority() {
            self.become_leader();
            return;
        }

        let req = VoteRequest {
            candidate_id: self.state.node_id.clone(),
            term,
        };

        for peer in &self.config.peers {
            let transport = self.transport.clone();
            let req = req.clone();
            self.spawn_rpc(
                peer.addr.clone(),
                move |peer| async move { transport.request_vote(&peer, req).await },
                move |peer, result| RaftMessage::VoteReply {
                    peer,
                    election_term: term,
                    result,
                },
            );
        }
    }

    fn handle_vote_reply(
        &mut self,
        peer: String,
        election_term: u64,
        result: std::result::Result<VoteResponse, TransportError>,
    ) {
        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(peer = %peer, term = election_term, error = %e, "Vote request failed");
                return;
            }
        };

        let prev_role = self.state.role;
        match self
            .state
            .record_vote(&peer, election_term, resp.term, resp.vote_granted)
        {
            VoteOutcome::Won => self.become_leader(),
            VoteOutcome::SteppedDown => {
                tracing::info!(
                    node_id = %self.state.node_id,
                    peer = %peer,
                    term = resp.term,
                    "Vote reply carried a higher term, stepping down"
                );
                self.after_role_change(prev_role);
            }
            VoteOutcome::Counted => {
                tracing::debug!(
                    node_id = %self.state.node_id,
                    peer = %peer,
                    term = election_term,
                    votes = self.state.votes_received.len(),
                    needed = self.state.majority(),
                    "Received vote"
                );
            }
            VoteOutcome::Rejected => {
                tracing::debug!(peer = %peer, term = election_term, "Vote withheld");
            }
            VoteOutcome::Ignored => {
                tracing::debug!(
                    peer = %peer,
                    election_term,
                    current_term = self.state.current_term,
                    "Discarding vote reply for an election no longer running"
                );
            }
        }
    }

    fn become_leader(&mut self) {
        self.state.become_leader();
        self.leadership_acquisitions += 1;
        let term = self.state.current_term;

        self.cancel_election_timer();
        self.cancel_heartbeat_timer();
        self.heartbeat_timer = Some(schedule_heartbeat(
            self.config.heartbeat_interval_ms,
            self.message_tx.clone(),
            |timer_id| RaftMessage::HeartbeatTick { timer_id },
        ));

        tracing::info!(
            node_id = %self.state.node_id,
            term,
            acquisitions = self.leadership_acquisitions,
            "Became leader"
        );

        self.send_heartbeats();
        self.notifier
            .notify_leadership_change(&self.state.node_id, term);
    }

    /// Send heartbeats to all followers (leader only)
    fn send_heartbeats(&self) {
        let req = HeartbeatRequest {
            leader_id: self.state.node_id.clone(),
            term: self.state.current_term,
        };

        for peer in &self.config.peers {
            let transport = self.transport.clone();
            let req = req.clone();
            self.spawn_rpc(
                peer.addr.clone(),
                move |peer| async move { transport.send_heartbeat(&peer, req).await },
                |peer, result| RaftMessage::HeartbeatReply { peer, result },
            );
        }
    }

    fn handle_heartbeat_reply(
        &mut self,
        peer: String,
        result: std::result::Result<HeartbeatResponse, TransportError>,
    ) {
        match result {
            Ok(resp) => {
                let prev_role = self.state.role;
                if self.state.observe_term(resp.term) {
                    tracing::info!(
                        node_id = %self.state.node_id,
                        peer = %peer,
                        term = resp.term,
                        "Heartbeat reply carried a higher term, stepping down"
                    );
                    self.after_role_change(prev_role);
                }
            }
            Err(e) => {
                tracing::trace!(peer = %peer, error = %e, "Heartbeat failed");
            }
        }
    }

    /// Keep timers consistent with the role after a handler may have changed it.
    fn after_role_change(&mut self, prev_role: RaftRole) {
        if prev_role == self.state.role {
            return;
        }
        tracing::info!(
            node_id = %self.state.node_id,
            from = %prev_role,
            to = %self.state.role,
            term = self.state.current_term,
            "Role changed"
        );
        if prev_role == RaftRole::Leader {
            self.cancel_heartbeat_timer();
            self.reset_election_timer();
        }
    }

    /// Run one outbound RPC off the event loop, bounded by the rpc timeout,
    /// and feed its outcome back in as a message.
    fn spawn_rpc<R, F, Fut, M>(&self, peer: String, call: F, into_message: M)
    where
        R: Send + 'static,
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<R, TransportError>> + Send + 'static,
        M: FnOnce(String, std::result::Result<R, TransportError>) -> RaftMessage + Send + 'static,
    {
        let tx = self.message_tx.clone();
        let rpc_timeout: Duration = self.config.rpc_timeout();

        tokio::spawn(async move {
            let result = match timeout(rpc_timeout, call(peer.clone())).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::PeerUnreachable {
                    peer: peer.clone(),
                    reason: "rpc timed out".to_string(),
                }),
            };
            let _ = tx.send(into_message(peer, result)).await;
        });
    }

    fn reset_election_timer(&mut self) {
        self.cancel_election_timer();
        self.election_timer = Some(schedule_election_timeout(
            self.config.election_timeout_min_ms,
            self.config.election_timeout_max_ms,
            self.message_tx.clone(),
            |timer_id| RaftMessage::ElectionTimeout { timer_id },
        ));
    }

    fn cancel_election_timer(&mut self) {
        if let Some(timer) = self.election_timer.take() {
            timer.cancel();
        }
    }

    fn cancel_heartbeat_timer(&mut self) {
        if let Some(timer) = self.heartbeat_timer.take() {
            timer.cancel();
        }
    }

    fn publish_status(&self) {
        let status = RaftStatus {
            node_id: self.state.node_id.clone(),
            role: self.state.role,
            current_term: self.state.current_term,
            voted_for: self.state.voted_for.clone(),
            leader: self.state.leader.clone(),
            elections_started: self.elections_started,
            leadership_acquisitions: self.leadership_acquisitions,
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
