use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::TransportError;
use crate::raft::rpc::{HeartbeatRequest, HeartbeatResponse, VoteRequest, VoteResponse};

pub const VOTE_PATH: &str = "/vote";
pub const HEARTBEAT_PATH: &str = "/heartbeat";

/// Carries the two peer RPCs. Each call is tried once; retrying is left to
/// the next timer tick of the caller.
pub trait PeerTransport: Send + Sync + 'static {
    fn request_vote(
        &self,
        peer: &str,
        req: VoteRequest,
    ) -> impl Future<Output = Result<VoteResponse, TransportError>> + Send;

    fn send_heartbeat(
        &self,
        peer: &str,
        req: HeartbeatRequest,
    ) -> impl Future<Output = Result<HeartbeatResponse, TransportError>> + Send;
}

/// JSON over HTTP, one POST per RPC.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn post<Req, Resp>(&self, peer: &str, path: &str, body: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("http://{peer}{path}");
        let unreachable = |e: reqwest::Error| TransportError::PeerUnreachable {
            peer: peer.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::BadStatus {
                peer: peer.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<Resp>().await.map_err(unreachable)
    }
}

impl PeerTransport for HttpTransport {
    async fn request_vote(
        &self,
        peer: &str,
        req: VoteRequest,
    ) -> Result<VoteResponse, TransportError> {
        self.post(peer, VOTE_PATH, &req).await
    }

    async fn send_heartbeat(
        &self,
        peer: &str,
        req: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, TransportError> {
        self.post(peer, HEARTBEAT_PATH, &req).await
    }
}
