use serde::{Deserialize, Serialize};

use crate::raft::state::{LeaderInfo, RaftRole, RaftState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub candidate_id: String,
    pub term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub leader_id: String,
    pub term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub term: u64,
    pub ack: bool,
}

/// Handle RequestVote RPC
///
/// Only a request carrying a newer term can win the vote, and the first one
/// to arrive in that term does. Every request at or below our term is
/// rejected, whoever sent it.
pub fn handle_request_vote(state: &mut RaftState, req: &VoteRequest) -> VoteResponse {
    let vote_granted = if req.term < state.current_term {
        tracing::debug!(
            node_id = %state.node_id,
            candidate = %req.candidate_id,
            term = req.term,
            current_term = state.current_term,
            "Dropping stale RequestVote"
        );
        false
    } else if req.term > state.current_term {
        // Newer term: adopt it, which also clears any previous vote
        state.become_follower(req.term);
        state.voted_for = Some(req.candidate_id.clone());
        true
    } else {
        // A competing candidate in our own term ends our candidacy
        if state.role == RaftRole::Candidate && req.candidate_id != state.node_id {
            state.become_follower(req.term);
        }
        false
    };

    tracing::debug!(
        node_id = %state.node_id,
        candidate = %req.candidate_id,
        term = req.term,
        granted = vote_granted,
        "RequestVote response"
    );

    VoteResponse {
        term: state.current_term,
        vote_granted,
    }
}

/// Handle Heartbeat RPC
pub fn handle_heartbeat(state: &mut RaftState, req: &HeartbeatRequest) -> HeartbeatResponse {
    // Reject if request term is less than our current term
    if req.term < state.current_term {
        tracing::debug!(
            node_id = %state.node_id,
            leader = %req.leader_id,
            term = req.term,
            current_term = state.current_term,
            "Dropping stale Heartbeat"
        );
        return HeartbeatResponse {
            term: state.current_term,
            ack: false,
        };
    }

    if req.term > state.current_term {
        state.become_follower(req.term);
    } else if state.role == RaftRole::Leader {
        tracing::warn!(
            node_id = %state.node_id,
            leader = %req.leader_id,
            term = req.term,
            "Heartbeat from another leader in our own term, rejecting"
        );
        return HeartbeatResponse {
            term: state.current_term,
            ack: false,
        };
    } else if state.role == RaftRole::Candidate {
        state.become_follower(req.term);
    }

    state.leader = Some(LeaderInfo {
        term: req.term,
        leader_id: req.leader_id.clone(),
    });

    HeartbeatResponse {
        term: state.current_term,
        ack: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(candidate: &str, term: u64) -> VoteRequest {
        VoteRequest {
            candidate_id: candidate.to_string(),
            term,
        }
    }

    fn heartbeat(leader: &str, term: u64) -> HeartbeatRequest {
        HeartbeatRequest {
            leader_id: leader.to_string(),
            term,
        }
    }

    #[test]
    fn wire_format_is_camel_case() {
        let json = serde_json::to_value(vote("a", 3)).unwrap();
        assert_eq!(json, serde_json::json!({"candidateId": "a", "term": 3}));

        let resp: VoteResponse =
            serde_json::from_str(r#"{"term": 3, "voteGranted": true}"#).unwrap();
        assert!(resp.vote_granted);

        let json = serde_json::to_value(heartbeat("a", 2)).unwrap();
        assert_eq!(json, serde_json::json!({"leaderId": "a", "term": 2}));
    }

    #[test]
    fn repeated_vote_request_in_same_term_is_rejected() {
        let mut state = RaftState::new("b", 3);
        let first = handle_request_vote(&mut state, &vote("a", 1));
        let second = handle_request_vote(&mut state, &vote("a", 1));
        assert!(first.vote_granted);
        assert!(!second.vote_granted);
        assert_eq!(second.term, 1);
        assert_eq!(state.voted_for.as_deref(), Some("a"));
    }

    #[test]
    fn leader_rejects_equal_term_vote_request() {
        let mut state = RaftState::new("a", 3);
        let term = state.become_candidate();
        state.record_vote("b", term, term, true);
        state.become_leader();

        let resp = handle_request_vote(&mut state, &vote("c", term));
        assert!(!resp.vote_granted);
        assert!(state.is_leader());
    }

    #[test]
    fn equal_term_vote_without_prior_vote_is_rejected() {
        let mut state = RaftState::new("b", 3);
        state.current_term = 4;

        let resp = handle_request_vote(&mut state, &vote("a", 4));
        assert!(!resp.vote_granted);
        assert_eq!(state.voted_for, None);
    }

    #[test]
    fn candidate_steps_down_on_equal_term_vote_request() {
        let mut state = RaftState::new("b", 3);
        state.become_candidate();

        let resp = handle_request_vote(&mut state, &vote("c", 1));
        assert!(!resp.vote_granted);
        assert_eq!(state.role, RaftRole::Follower);
        assert_eq!(state.current_term, 1);
        assert_eq!(state.voted_for.as_deref(), Some("b"));
    }

    #[test]
    fn leader_rejects_equal_term_heartbeat() {
        let mut state = RaftState::new("a", 3);
        let term = state.become_candidate();
        state.record_vote("b", term, term, true);
        state.become_leader();

        let resp = handle_heartbeat(&mut state, &heartbeat("c", term));
        assert!(!resp.ack);
        assert!(state.is_leader());
        assert_eq!(state.leader_id(), Some("a"));
    }

    #[test]
    fn candidate_accepts_equal_term_heartbeat() {
        let mut state = RaftState::new("b", 3);
        let term = state.become_candidate();

        let resp = handle_heartbeat(&mut state, &heartbeat("a", term));
        assert!(resp.ack);
        assert_eq!(state.role, RaftRole::Follower);
        assert_eq!(state.leader_id(), Some("a"));
    }
}
