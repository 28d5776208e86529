use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::ElectionError;
use crate::raft::{
    HeartbeatRequest, HeartbeatResponse, RaftHandle, RaftRole, RaftStatus, VoteRequest,
    VoteResponse,
};
use crate::transport::{HEARTBEAT_PATH, VOTE_PATH};

pub const STATUS_PATH: &str = "/status";

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub node_id: String,
    pub role: RaftRole,
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub leader_id: Option<String>,
    pub leader_term: Option<u64>,
    pub elections_started: u64,
    pub leadership_acquisitions: u64,
}

impl From<RaftStatus> for StatusResponse {
    fn from(status: RaftStatus) -> Self {
        let (leader_id, leader_term) = match status.leader {
            Some(info) => (Some(info.leader_id), Some(info.term)),
            None => (None, None),
        };
        Self {
            node_id: status.node_id,
            role: status.role,
            current_term: status.current_term,
            voted_for: status.voted_for,
            leader_id,
            leader_term,
            elections_started: status.elections_started,
            leadership_acquisitions: status.leadership_acquisitions,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(ElectionError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            ElectionError::NodeStopped => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<ElectionError> for ApiError {
    fn from(e: ElectionError) -> Self {
        Self(e)
    }
}

/// Routes for the peer RPC surface plus the status endpoint.
pub fn router(handle: RaftHandle) -> Router {
    Router::new()
        .route(VOTE_PATH, post(vote_handler))
        .route(HEARTBEAT_PATH, post(heartbeat_handler))
        .route(STATUS_PATH, get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(handle)
}

/// Serve `router(handle)` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    handle: RaftHandle,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(node_id = %handle.node_id(), addr = %addr, "HTTP server listening");

    axum::serve(listener, router(handle))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn vote_handler(
    State(handle): State<RaftHandle>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, ApiError> {
    Ok(Json(handle.request_vote(req).await?))
}

async fn heartbeat_handler(
    State(handle): State<RaftHandle>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    Ok(Json(handle.heartbeat(req).await?))
}

async fn status_handler(
    State(handle): State<RaftHandle>,
) -> Result<Json<StatusResponse>, ApiError> {
    if !handle.is_running() {
        return Err(ElectionError::NodeStopped.into());
    }
    Ok(Json(handle.status().into()))
}
