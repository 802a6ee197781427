pub mod conn;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::acl::Acl;
use crate::cluster::{Membership, Replicator};
use crate::commands::{self, registry::CommandRegistry};
use crate::config::Config;
use crate::metrics::Metrics;
use crate::persistence::{aof, AofHandle, Snapshotter};
use crate::pubsub::PubSub;
use crate::store::{expiry, Keyspace};

const AOF_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared server state handed to every connection task and worker.
pub struct Server {
    pub cfg: Config,
    pub metrics: Arc<Metrics>,
    pub keyspace: Arc<Keyspace>,
    pub acl: Arc<Acl>,
    pub pubsub: Arc<PubSub>,
    pub registry: CommandRegistry,
    pub aof: Option<AofHandle>,
    pub snapshotter: Option<Arc<Snapshotter>>,
    pub replicator: Option<Arc<dyn Replicator>>,
    pub membership: Option<Arc<dyn Membership>>,
    next_conn_id: AtomicU64,
    kill_switches: DashMap<u64, mpsc::Sender<()>>,
}

impl Server {
    /// Standalone build; the consensus and membership transports are
    /// external collaborators plugged in through `build_with`.
    pub async fn build(cfg: Config) -> anyhow::Result<Arc<Self>> {
        Self::build_with(cfg, None, None).await
    }

    pub async fn build_with(
        cfg: Config,
        replicator: Option<Arc<dyn Replicator>>,
        membership: Option<Arc<dyn Membership>>,
    ) -> anyhow::Result<Arc<Self>> {
        if (cfg.bootstrap_cluster || cfg.join_addr.is_some()) && replicator.is_none() {
            tracing::warn!(
                "cluster options set but no consensus transport is linked in; running standalone"
            );
        }

        let metrics = Arc::new(Metrics::new());
        let keyspace = Arc::new(Keyspace::new(&cfg, metrics.clone(), replicator.clone()));
        let acl = Arc::new(Acl::new(&cfg)?);
        let pubsub = Arc::new(PubSub::new(cfg.pubsub_capacity, metrics.clone()));
        let registry = commands::build_registry();

        let (aof_handle, snapshotter) = if cfg.in_memory {
            (None, None)
        } else {
            let aof_handle = AofHandle::spawn(&cfg, metrics.clone()).await?;
            let snapshotter = Arc::new(Snapshotter::new(&cfg, keyspace.clone(), metrics.clone()));
            (Some(aof_handle), Some(snapshotter))
        };

        let server = Arc::new(Server {
            cfg,
            metrics,
            keyspace,
            acl,
            pubsub,
            registry,
            aof: aof_handle,
            snapshotter,
            replicator,
            membership,
            next_conn_id: AtomicU64::new(0),
            kill_switches: DashMap::new(),
        });

        if server.cfg.restore_aof {
            aof::restore(&server).await?;
        } else if server.cfg.restore_snapshot {
            if let Some(snapshotter) = &server.snapshotter {
                snapshotter.restore().await?;
            }
        }

        Ok(server)
    }

    pub fn allocate_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn register_kill_switch(&self, conn_id: u64, tx: mpsc::Sender<()>) {
        self.kill_switches.insert(conn_id, tx);
    }

    pub fn remove_kill_switch(&self, conn_id: u64) {
        self.kill_switches.remove(&conn_id);
    }

    /// Ask the given connections to close (used when their user is deleted).
    pub async fn kill_connections(&self, conn_ids: &[u64]) {
        for conn_id in conn_ids {
            if let Some(tx) = self.kill_switches.get(conn_id) {
                let _ = tx.try_send(());
            }
        }
    }

    /// Expiry sweeper, snapshot ticker and AOF size maintenance.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![expiry::spawn_sweeper(self.keyspace.clone())];
        if let Some(snapshotter) = &self.snapshotter {
            handles.push(snapshotter.clone().spawn_ticker());
        }
        if let Some(aof_handle) = &self.aof {
            let aof_handle = aof_handle.clone();
            let keyspace = self.keyspace.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    sleep(AOF_MAINTENANCE_INTERVAL).await;
                    if aof_handle.needs_rewrite() {
                        if let Err(e) = aof_handle.rewrite(&keyspace).await {
                            tracing::warn!(error = %e, "size-triggered aof rewrite failed");
                        }
                    }
                }
            }));
        }
        handles
    }

    /// Accept loop on a pre-bound listener (tests bind their own ephemeral
    /// port). Returns on ctrl-c.
    pub async fn listen(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        self.spawn_background();
        if self.cfg.tls || self.cfg.mtls {
            tracing::warn!("tls termination is handled by the external endpoint layer");
        }

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = conn::handle_connection(stream, server).await {
                                tracing::debug!(%addr, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
            }
        }
    }
}

pub async fn run(cfg: Config) -> anyhow::Result<()> {
    let addr = cfg.listen_addr();
    let server = Server::build(cfg).await?;
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "harborkv listening");
    server.listen(listener).await
}
