use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration};

use crate::config::{AofSyncStrategy, Config};
use crate::errors::ServerError;
use crate::metrics::Metrics;
use crate::persistence::snapshot::SnapshotObject;
use crate::store::{KeyEntry, Keyspace};
use crate::time::now_ms;

/// Log size past which the background maintenance loop rewrites.
pub const REWRITE_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;

enum AofMsg {
    Append(Bytes),
    Truncate(oneshot::Sender<std::io::Result<()>>),
}

/// Producer side of the append-only log. The single writer task owns the
/// file, so on-disk ordering equals acceptance order.
#[derive(Clone)]
pub struct AofHandle {
    tx: mpsc::Sender<AofMsg>,
    aof_dir: PathBuf,
    rewrite_flag: Arc<AtomicBool>,
    log_size: Arc<AtomicU64>,
    metrics: Arc<Metrics>,
}

impl AofHandle {
    pub async fn spawn(cfg: &Config, metrics: Arc<Metrics>) -> anyhow::Result<AofHandle> {
        let aof_dir = Path::new(&cfg.data_dir).join("aof");
        tokio::fs::create_dir_all(&aof_dir).await?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(aof_dir.join("log.aof"))
            .await?;
        let log_size = Arc::new(AtomicU64::new(file.metadata().await?.len()));

        let (tx, rx) = mpsc::channel(cfg.aof_queue_capacity);
        let handle = AofHandle {
            tx,
            aof_dir,
            rewrite_flag: Arc::new(AtomicBool::new(false)),
            log_size: log_size.clone(),
            metrics: metrics.clone(),
        };
        tokio::spawn(run_writer(
            rx,
            file,
            cfg.aof_sync_strategy,
            metrics,
            log_size,
        ));
        Ok(handle)
    }

    /// Queue one accepted request frame. Suspends on backpressure when the
    /// queue is full.
    pub async fn append(&self, frame: Bytes) {
        if self.tx.send(AofMsg::Append(frame)).await.is_err() {
            self.metrics.inc_aof_errors();
            tracing::error!("aof writer is gone, dropping frame");
        }
    }

    pub fn rewrite_in_progress(&self) -> bool {
        self.rewrite_flag.load(Ordering::SeqCst)
    }

    pub fn needs_rewrite(&self) -> bool {
        self.log_size.load(Ordering::Relaxed) > REWRITE_THRESHOLD_BYTES
            && !self.rewrite_in_progress()
    }

    /// Compact: deep-copy the keyspace into `aof/snapshot.bin`, then
    /// truncate the log.
    pub async fn rewrite(&self, keyspace: &Arc<Keyspace>) -> Result<(), ServerError> {
        if self.rewrite_flag.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AofRewriteInProgress);
        }
        let result = self.rewrite_inner(keyspace).await;
        self.rewrite_flag.store(false, Ordering::SeqCst);
        if result.is_err() {
            self.metrics.inc_aof_errors();
        }
        result
    }

    async fn rewrite_inner(&self, keyspace: &Arc<Keyspace>) -> Result<(), ServerError> {
        let state: BTreeMap<String, KeyEntry> = keyspace.get_state().await.into_iter().collect();
        let object = SnapshotObject {
            state,
            latest_snapshot_millis: now_ms() as i64,
        };
        let json = serde_json::to_vec(&object)
            .map_err(|e| ServerError::Value(format!("aof snapshot encoding failed: {e}")))?;
        tokio::fs::write(self.aof_dir.join("snapshot.bin"), &json).await?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(AofMsg::Truncate(ack_tx))
            .await
            .map_err(|_| ServerError::Value("aof writer is gone".into()))?;
        ack_rx
            .await
            .map_err(|_| ServerError::Value("aof writer dropped the truncate ack".into()))??;
        tracing::info!("aof rewritten");
        Ok(())
    }
}

async fn run_writer(
    mut rx: mpsc::Receiver<AofMsg>,
    mut file: File,
    strategy: AofSyncStrategy,
    metrics: Arc<Metrics>,
    log_size: Arc<AtomicU64>,
) {
    let mut dirty = false;
    let mut tick = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(AofMsg::Append(frame)) => {
                    match file.write_all(&frame).await {
                        Ok(()) => {
                            log_size.fetch_add(frame.len() as u64, Ordering::Relaxed);
                            metrics.inc_aof_appends();
                            dirty = true;
                            if strategy == AofSyncStrategy::Always {
                                if let Err(e) = file.sync_data().await {
                                    metrics.inc_aof_errors();
                                    tracing::error!(error = %e, "aof fsync failed");
                                }
                                dirty = false;
                            }
                        }
                        Err(e) => {
                            metrics.inc_aof_errors();
                            tracing::error!(error = %e, "aof append failed");
                        }
                    }
                }
                Some(AofMsg::Truncate(ack)) => {
                    let result = truncate(&mut file).await;
                    if result.is_ok() {
                        log_size.store(0, Ordering::Relaxed);
                        dirty = false;
                    }
                    let _ = ack.send(result);
                }
                None => {
                    // Server shutdown: flush what we have.
                    if dirty {
                        let _ = file.sync_data().await;
                    }
                    return;
                }
            },
            _ = tick.tick() => {
                if dirty && strategy == AofSyncStrategy::EverySec {
                    if let Err(e) = file.sync_data().await {
                        metrics.inc_aof_errors();
                        tracing::error!(error = %e, "aof fsync failed");
                    }
                    dirty = false;
                }
            }
        }
    }
}

async fn truncate(file: &mut File) -> std::io::Result<()> {
    file.set_len(0).await?;
    file.seek(std::io::SeekFrom::Start(0)).await?;
    file.sync_data().await
}

/// Startup restore: load `aof/snapshot.bin` when present, then replay the
/// trailing log through the dispatcher with `replay = true`.
pub async fn restore(server: &Arc<crate::server::Server>) -> anyhow::Result<()> {
    use crate::server::conn::{execute_command, ConnState};

    let aof_dir = Path::new(&server.cfg.data_dir).join("aof");
    let snapshot_path = aof_dir.join("snapshot.bin");
    if let Ok(raw) = tokio::fs::read(&snapshot_path).await {
        let object: SnapshotObject = serde_json::from_slice(&raw)?;
        let count = object.state.len();
        server
            .keyspace
            .load_state(object.state.into_iter().collect());
        tracing::info!(keys = count, "restored aof snapshot");
    }

    let log_path = aof_dir.join("log.aof");
    let Ok(raw) = tokio::fs::read(&log_path).await else {
        return Ok(());
    };
    let frames = harborkv_proto::decode_all(&raw)?;
    let total = frames.len();
    let mut conn = ConnState::detached();
    for frame in frames {
        let argv = harborkv_proto::argv_from_resp(&frame)?;
        if let Err(e) = execute_command(server, &mut conn, &argv, None, true).await {
            tracing::warn!(command = %argv[0], error = %e, "aof replay: command failed");
        }
    }
    tracing::info!(frames = total, "replayed append-only log");
    Ok(())
}
