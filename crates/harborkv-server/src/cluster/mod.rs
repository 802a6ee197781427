use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::ServerError;
use crate::server::conn::{execute_command, ConnState};
use crate::server::Server;

/// Default time budget for a replicated apply to commit.
pub const REPLICATION_TIMEOUT: Duration = Duration::from_millis(500);

/// The consensus layer, treated as an opaque collaborator. `apply` orders a
/// command across the quorum and resolves with its wire reply; committed
/// entries come back through the replay queue (see `spawn_replay_worker`),
/// never through a nested call.
#[async_trait]
pub trait Replicator: Send + Sync {
    fn is_leader(&self) -> bool;
    fn has_joined_cluster(&self) -> bool;
    async fn apply(&self, argv: &[String], timeout: Duration) -> Result<Bytes, ServerError>;
    async fn apply_delete_key(&self, key: &str, timeout: Duration) -> Result<(), ServerError>;
}

/// The gossip membership layer, also opaque. Forwarding is used by
/// followers configured with `forward_command`.
#[async_trait]
pub trait Membership: Send + Sync {
    fn members(&self) -> Vec<String>;
    async fn forward_to_leader(&self, frame: Bytes) -> Result<(), ServerError>;
}

/// A committed log entry handed back by the replicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApplyRequest {
    Command {
        server_id: String,
        connection_id: u64,
        argv: Vec<String>,
    },
    DeleteKey {
        server_id: String,
        key: String,
    },
}

/// Drain committed entries and re-enter the local handler path with
/// `replay = true`, so replicated writes are neither re-queued to the AOF
/// nor re-authorized.
pub fn spawn_replay_worker(
    server: Arc<Server>,
    mut rx: mpsc::Receiver<ApplyRequest>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(req) = rx.recv().await {
            match req {
                ApplyRequest::Command { argv, .. } => {
                    let mut conn = ConnState::detached();
                    let outcome = execute_command(&server, &mut conn, &argv, None, true).await;
                    if let Err(e) = outcome {
                        tracing::warn!(error = %e, "replayed command failed");
                    }
                }
                ApplyRequest::DeleteKey { key, .. } => {
                    if let Err(e) = server.keyspace.delete_key(&key).await {
                        tracing::debug!(key, error = %e, "replicated delete skipped");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::conn::Reply;
    use harborkv_proto::Resp;
    use parking_lot::Mutex;
    use tokio::time::sleep;

    struct FakeReplicator {
        leader: bool,
        applied: Mutex<Vec<Vec<String>>>,
    }

    impl FakeReplicator {
        fn new(leader: bool) -> Arc<Self> {
            Arc::new(Self {
                leader,
                applied: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Replicator for FakeReplicator {
        fn is_leader(&self) -> bool {
            self.leader
        }
        fn has_joined_cluster(&self) -> bool {
            true
        }
        async fn apply(
            &self,
            argv: &[String],
            _timeout: Duration,
        ) -> Result<Bytes, ServerError> {
            self.applied.lock().push(argv.to_vec());
            Ok(Bytes::from_static(b"+OK\r\n"))
        }
        async fn apply_delete_key(
            &self,
            _key: &str,
            _timeout: Duration,
        ) -> Result<(), ServerError> {
            Ok(())
        }
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    async fn cluster_server(replicator: Arc<FakeReplicator>) -> Arc<Server> {
        let cfg = Config {
            in_memory: true,
            ..Config::default()
        };
        let server = Server::build_with(cfg, Some(replicator as Arc<dyn Replicator>), None)
            .await
            .unwrap();
        server.acl.register_connection(0);
        server
    }

    #[tokio::test]
    async fn leader_routes_sync_commands_through_the_replicator() {
        let replicator = FakeReplicator::new(true);
        let server = cluster_server(replicator.clone()).await;
        let mut conn = ConnState::detached();

        let reply = execute_command(&server, &mut conn, &argv(&["SET", "k", "v"]), None, false)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Raw(b) if b.as_ref() == b"+OK\r\n"));
        assert_eq!(replicator.applied.lock().len(), 1);
        // Not applied locally yet; that happens via the committed-entry
        // replay path.
        assert!(!server.keyspace.key_exists("k").await);
    }

    #[tokio::test]
    async fn follower_without_forwarding_refuses_writes_but_serves_reads() {
        let server = cluster_server(FakeReplicator::new(false)).await;
        let mut conn = ConnState::detached();

        let err = execute_command(&server, &mut conn, &argv(&["SET", "k", "v"]), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotLeader));

        let reply = execute_command(&server, &mut conn, &argv(&["GET", "k"]), None, false)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Value(Resp::Null)));
    }

    #[tokio::test]
    async fn replay_worker_applies_committed_entries_locally() {
        let server = cluster_server(FakeReplicator::new(true)).await;
        let (tx, rx) = mpsc::channel(8);
        let _worker = spawn_replay_worker(server.clone(), rx);

        tx.send(ApplyRequest::Command {
            server_id: "node-1".to_string(),
            connection_id: 7,
            argv: argv(&["SET", "k", "v"]),
        })
        .await
        .unwrap();
        sleep(Duration::from_millis(100)).await;
        assert!(server.keyspace.key_exists("k").await);

        tx.send(ApplyRequest::DeleteKey {
            server_id: "node-1".to_string(),
            key: "k".to_string(),
        })
        .await
        .unwrap();
        sleep(Duration::from_millis(100)).await;
        assert!(!server.keyspace.key_exists("k").await);
    }
}
