//! End-to-end tests: real nodes talking HTTP on localhost, reporting to a stub
//! shard manager.


use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use raft_elect::config::{NodeConfig, RetryPolicy};
use raft_elect::node::Node;
use raft_elect::notifier::ShardMoveRequest;
use raft_elect::raft::RaftRole;
use raft_elect::server::StatusResponse;
use test_harness::wait_for;

#[derive(Clone, Default)]
struct ShardManagerStub {
    received: Arc<Mutex<Vec<ShardMoveRequest>>>,
}

async fn move_shards(
    State(stub): State<ShardManagerStub>,
    Json(body): Json<ShardMoveRequest>,
) -> StatusCode {
    stub.received.lock().unwrap().push(body);
    StatusCode::OK
}

async fn spawn_shard_manager() -> (ShardManagerStub, String) {
    let stub = ShardManagerStub::default();
    let app = Router::new()
        .route("/move-shards", post(move_shards))
        .with_state(stub.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (stub, format!("http://{addr}/move-shards"))
}

struct HttpCluster {
    addrs: Vec<(String, SocketAddr)>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<raft_elect::error::Result<()>>>,
    client: reqwest::Client,
}

impl HttpCluster {
    async fn start(ids: &[&str], shard_manager_url: &str) -> Self {
        let mut listeners = Vec::new();
        for id in ids {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            listeners.push((id.to_string(), addr, listener));
        }
        let addrs: Vec<(String, SocketAddr)> = listeners
            .iter()
            .map(|(id, addr, _)| (id.clone(), *addr))
            .collect();

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();
        for (id, addr, listener) in listeners {
            let mut config = NodeConfig::new(id.clone(), addr)
                .with_shard_manager_url(shard_manager_url);
            for (peer_id, peer_addr) in &addrs {
                if *peer_id != id {
                    config = config.with_peer(peer_addr.to_string());
                }
            }
            config.election_timeout_min_ms = 100;
            config.election_timeout_max_ms = 200;
            config.heartbeat_interval_ms = 30;
            config.rpc_timeout_ms = 50;
            config.notify_retry = RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(80),
            };

            let node = Node::new(config).expect("valid config");
            tasks.push(tokio::spawn(
                node.run_with_listener(listener, shutdown.clone()),
            ));
        }

        Self {
            addrs,
            shutdown,
            tasks,
            client: reqwest::Client::new(),
        }
    }

    async fn status(&self, addr: SocketAddr) -> Option<StatusResponse> {
        self.client
            .get(format!("http://{addr}/status"))
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()
    }

    async fn statuses(&self) -> Vec<StatusResponse> {
        let mut out = Vec::new();
        for (_, addr) in &self.addrs {
            if let Some(status) = self.status(*addr).await {
                out.push(status);
            }
        }
        out
    }

    /// Wait until all nodes agree on one leader and return its status.
    async fn wait_for_stable_leader(&self, timeout: Duration) -> Option<StatusResponse> {
        let agreed = wait_for(
            || async {
                let statuses = self.statuses().await;
                statuses.len() == self.addrs.len()
                    && statuses.iter().filter(|s| s.role == RaftRole::Leader).count() == 1
                    && statuses
                        .windows(2)
                        .all(|w| w[0].leader_id.is_some() && w[0].leader_id == w[1].leader_id)
            },
            timeout,
            Duration::from_millis(20),
        )
        .await;
        if !agreed {
            return None;
        }
        self.statuses()
            .await
            .into_iter()
            .find(|s| s.role == RaftRole::Leader)
    }

    async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let result = tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .expect("node should stop promptly")
                .expect("node task panicked");
            assert!(result.is_ok(), "node exited with error: {result:?}");
        }
    }
}

#[tokio::test]
async fn test_http_cluster_elects_leader_and_notifies_shard_manager() {
    let (stub, url) = spawn_shard_manager().await;
    let cluster = HttpCluster::start(&["A", "B", "C"], &url).await;

    let leader = cluster
        .wait_for_stable_leader(Duration::from_secs(5))
        .await
        .expect("cluster should elect a leader over HTTP");
    assert_eq!(leader.leader_id.as_deref(), Some(leader.node_id.as_str()));
    assert_eq!(leader.leader_term, Some(leader.current_term));

    let expected = ShardMoveRequest {
        new_leader_id: leader.node_id.clone(),
        term: leader.current_term,
    };
    let delivered = wait_for(
        || async { stub.received.lock().unwrap().contains(&expected) },
        Duration::from_secs(2),
        Duration::from_millis(10),
    )
    .await;
    assert!(delivered, "shard manager never heard about {expected:?}");

    // One POST per acquisition across the whole cluster.
    let acquisitions: u64 = cluster
        .statuses()
        .await
        .iter()
        .map(|s| s.leadership_acquisitions)
        .sum();
    assert_eq!(stub.received.lock().unwrap().len() as u64, acquisitions);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_single_http_node_survives_unreachable_shard_manager() {
    // Nothing listens here; the notification is retried and abandoned.
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_url = format!("http://{}/move-shards", reserved.local_addr().unwrap());
    drop(reserved);

    let cluster = HttpCluster::start(&["solo"], &dead_url).await;
    let leader = cluster
        .wait_for_stable_leader(Duration::from_secs(3))
        .await
        .expect("single node leads");
    assert_eq!(leader.node_id, "solo");

    // Still leading after the retry budget is spent.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = cluster.status(cluster.addrs[0].1).await.unwrap();
    assert_eq!(status.role, RaftRole::Leader);
    assert_eq!(status.current_term, leader.current_term);

    cluster.shutdown().await;
}
