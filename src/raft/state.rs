use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Raft node role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

/// Last leader this node has accepted heartbeats from (or itself, while leading).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub term: u64,
    pub leader_id: String,
}

/// Outcome of counting one vote reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Reply belongs to an election this node is no longer running.
    Ignored,
    /// Reply carried a higher term; the node is now a follower.
    SteppedDown,
    /// Vote withheld by the peer.
    Rejected,
    /// Vote counted, no majority yet.
    Counted,
    /// Vote counted and it completed a majority. The caller must call
    /// `become_leader`.
    Won,
}

/// Election state held in memory for the lifetime of the process.
///
/// # Election Safety
/// At most one leader can be elected in a given term. Enforced by:
/// - Each node votes for at most one candidate per term (`voted_for`)
/// - `voted_for` is only cleared when `current_term` advances
/// - A candidate must collect a strict majority of the fixed cluster
///
/// # Term Monotonicity
/// `current_term` only ever moves forward: `observe_term` ignores lower terms
/// and `become_candidate` increments.
#[derive(Debug, Clone)]
pub struct RaftState {
    pub node_id: String,
    pub cluster_size: usize,

    pub current_term: u64,
    pub voted_for: Option<String>,
    pub role: RaftRole,

    // Known leader (if any)
    pub leader: Option<LeaderInfo>,

    // Voters that granted us their vote in `current_term` (candidates only)
    pub votes_received: HashSet<String>,
}

impl RaftState {
    pub fn new(node_id: impl Into<String>, cluster_size: usize) -> Self {
        Self {
            node_id: node_id.into(),
            cluster_size: cluster_size.max(1),
            current_term: 0,
            voted_for: None,
            role: RaftRole::Follower,
            leader: None,
            votes_received: HashSet::new(),
        }
    }

    /// Votes needed to win: a strict majority of the cluster, self included.
    pub fn majority(&self) -> usize {
        self.cluster_size / 2 + 1
    }

    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader.as_ref().map(|l| l.leader_id.as_str())
    }

    /// Adopt `term` if it is newer than ours, returning to follower and
    /// clearing the vote record. Returns true when the term advanced.
    pub fn observe_term(&mut self, term: u64) -> bool {
        if term > self.current_term {
            self.become_follower(term);
            true
        } else {
            false
        }
    }

    /// Transition to follower state
    pub fn become_follower(&mut self, term: u64) {
        debug_assert!(term >= self.current_term, "term must never regress");
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            // Whoever leads the new term is not known yet
            self.leader = None;
        }
        self.role = RaftRole::Follower;
        self.votes_received.clear();
    }

    /// Transition to candidate state: new term, vote for self.
    /// Returns the term being campaigned on.
    pub fn become_candidate(&mut self) -> u64 {
        self.role = RaftRole::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.node_id.clone());
        self.votes_received.clear();
        self.votes_received.insert(self.node_id.clone()); // Vote for self
        self.leader = None;
        self.current_term
    }

    /// Whether the self-vote alone already wins (single-node cluster).
    pub fn has_majority(&self) -> bool {
        self.role == RaftRole::Candidate && self.votes_received.len() >= self.majority()
    }

    /// Count a RequestVote reply from `voter` for an election run in
    /// `election_term`.
    pub fn record_vote(
        &mut self,
        voter: &str,
        election_term: u64,
        reply_term: u64,
        granted: bool,
    ) -> VoteOutcome {
        if self.observe_term(reply_term) {
            return VoteOutcome::SteppedDown;
        }
        if self.role != RaftRole::Candidate || election_term != self.current_term {
            return VoteOutcome::Ignored;
        }
        if !granted {
            return VoteOutcome::Rejected;
        }

        self.votes_received.insert(voter.to_string());
        if self.votes_received.len() >= self.majority() {
            VoteOutcome::Won
        } else {
            VoteOutcome::Counted
        }
    }

    /// Transition to leader state
    pub fn become_leader(&mut self) {
        debug_assert_eq!(self.role, RaftRole::Candidate);
        self.role = RaftRole::Leader;
        self.votes_received.clear();
        self.leader = Some(LeaderInfo {
            term: self.current_term,
            leader_id: self.node_id.clone(),
        });
    }
}
