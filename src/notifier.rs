use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RetryPolicy;
use crate::error::NotifyError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Body posted to the shard manager when this node acquires leadership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardMoveRequest {
    pub new_leader_id: String,
    pub term: u64,
}

/// Receives one call per leadership acquisition.
///
/// Implementations must return immediately; any I/O happens on a detached
/// task so the election loop is never delayed.
pub trait LeadershipNotifier: Send + Sync + 'static {
    fn notify_leadership_change(&self, new_leader_id: &str, term: u64);
}

/// Posts `ShardMoveRequest` to the shard manager, retrying with bounded
/// exponential backoff.
#[derive(Debug, Clone)]
pub struct ShardManagerNotifier {
    client: reqwest::Client,
    url: String,
    retry: RetryPolicy,
}

impl ShardManagerNotifier {
    pub fn new(url: impl Into<String>, retry: RetryPolicy) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            retry,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post_once(&self, body: &ShardMoveRequest) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }

    /// Deliver one notification, returning the number of attempts used on
    /// success or the last error once the attempt budget is spent.
    pub async fn post_with_retry(&self, body: ShardMoveRequest) -> Result<u32, NotifyError> {
        let mut attempt = 1;
        loop {
            match self.post_once(&body).await {
                Ok(()) => {
                    tracing::info!(
                        url = %self.url,
                        leader = %body.new_leader_id,
                        term = body.term,
                        attempt,
                        "Shard manager notified of leadership change"
                    );
                    return Ok(attempt);
                }
                Err(e) if attempt >= self.retry.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.retry.backoff_after(attempt);
                    tracing::warn!(
                        url = %self.url,
                        term = body.term,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Shard manager notification failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl LeadershipNotifier for ShardManagerNotifier {
    fn notify_leadership_change(&self, new_leader_id: &str, term: u64) {
        let notifier = self.clone();
        let body = ShardMoveRequest {
            new_leader_id: new_leader_id.to_string(),
            term,
        };

        tokio::spawn(async move {
            if let Err(e) = notifier.post_with_retry(body.clone()).await {
                tracing::error!(
                    url = %notifier.url,
                    leader = %body.new_leader_id,
                    term = body.term,
                    attempts = notifier.retry.max_attempts,
                    error = %e,
                    "Giving up on shard manager notification"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

    use super::*;

    #[derive(Clone, Default)]
    struct StubShardManager {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
        received: Arc<Mutex<Vec<ShardMoveRequest>>>,
    }

    async fn move_shards(
        State(stub): State<StubShardManager>,
        Json(body): Json<ShardMoveRequest>,
    ) -> StatusCode {
        let n = stub.calls.fetch_add(1, Ordering::SeqCst);
        if n < stub.fail_first {
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
        stub.received.lock().unwrap().push(body);
        StatusCode::OK
    }

    async fn spawn_stub(stub: StubShardManager) -> String {
        let app = Router::new()
            .route("/move-shards", post(move_shards))
            .with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/move-shards")
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        }
    }

    #[test]
    fn shard_move_request_wire_format() {
        let body = ShardMoveRequest {
            new_leader_id: "A".to_string(),
            term: 1,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"newLeaderId": "A", "term": 1})
        );
    }

    #[tokio::test]
    async fn post_with_retry_recovers_after_failures() {
        let stub = StubShardManager {
            fail_first: 2,
            ..Default::default()
        };
        let url = spawn_stub(stub.clone()).await;
        let notifier = ShardManagerNotifier::new(url, fast_retry(4)).unwrap();

        let attempts = notifier
            .post_with_retry(ShardMoveRequest {
                new_leader_id: "A".to_string(),
                term: 3,
            })
            .await
            .unwrap();

        assert_eq!(attempts, 3);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            stub.received.lock().unwrap().as_slice(),
            &[ShardMoveRequest {
                new_leader_id: "A".to_string(),
                term: 3
            }]
        );
    }

    #[tokio::test]
    async fn post_with_retry_gives_up_after_budget() {
        let stub = StubShardManager {
            fail_first: usize::MAX,
            ..Default::default()
        };
        let url = spawn_stub(stub.clone()).await;
        let notifier = ShardManagerNotifier::new(url, fast_retry(3)).unwrap();

        let err = notifier
            .post_with_retry(ShardMoveRequest {
                new_leader_id: "A".to_string(),
                term: 1,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, NotifyError::Status(500)));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn connection_refused_is_retried_then_abandoned() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier =
            ShardManagerNotifier::new(format!("http://{addr}/move-shards"), fast_retry(2))
                .unwrap();
        let err = notifier
            .post_with_retry(ShardMoveRequest {
                new_leader_id: "A".to_string(),
                term: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Request(_)));
    }

    #[tokio::test]
    async fn slow_shard_manager_hits_request_timeout() {
        async fn hang() -> StatusCode {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StatusCode::OK
        }
        let app = Router::new().route("/move-shards", post(hang));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let notifier =
            ShardManagerNotifier::new(format!("http://{addr}/move-shards"), fast_retry(1))
                .unwrap();
        let started = tokio::time::Instant::now();
        let err = notifier
            .post_with_retry(ShardMoveRequest {
                new_leader_id: "A".to_string(),
                term: 1,
            })
            .await
            .unwrap_err();

        assert!(started.elapsed() < REQUEST_TIMEOUT + Duration::from_secs(2));
        match err {
            NotifyError::Request(e) => assert!(e.is_timeout(), "expected timeout, got {e}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn notify_returns_immediately_and_delivers_in_background() {
        let stub = StubShardManager::default();
        let url = spawn_stub(stub.clone()).await;
        let notifier = ShardManagerNotifier::new(url, fast_retry(3)).unwrap();

        notifier.notify_leadership_change("B", 2);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while stub.received.lock().unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "notification never arrived");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stub.received.lock().unwrap()[0].new_leader_id, "B");
    }
}
