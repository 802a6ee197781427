use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::config::Config;
use crate::errors::ServerError;
use crate::metrics::Metrics;
use crate::store::{KeyEntry, Keyspace};
use crate::time::now_ms;

/// Keys are serialized in sorted order so an unchanged store produces the
/// same bytes, letting the manifest hash short-circuit no-op snapshots.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotObject {
    pub state: BTreeMap<String, KeyEntry>,
    pub latest_snapshot_millis: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub latest_snapshot_millis: i64,
    pub latest_snapshot_hash: String,
}

/// Periodic deep-copy of the keyspace to `snapshots/<millis>/state.bin`
/// plus a manifest recording the latest timestamp and MD5.
pub struct Snapshotter {
    snapshots_dir: PathBuf,
    keyspace: Arc<Keyspace>,
    metrics: Arc<Metrics>,
    interval: Duration,
    threshold: u64,
    in_progress: AtomicBool,
    latest_millis: AtomicI64,
}

impl Snapshotter {
    pub fn new(cfg: &Config, keyspace: Arc<Keyspace>, metrics: Arc<Metrics>) -> Self {
        Self {
            snapshots_dir: Path::new(&cfg.data_dir).join("snapshots"),
            keyspace,
            metrics,
            interval: Duration::from_secs(cfg.snapshot_interval_secs.max(1)),
            threshold: cfg.snapshot_threshold,
            in_progress: AtomicBool::new(false),
            latest_millis: AtomicI64::new(0),
        }
    }

    pub fn last_save_millis(&self) -> i64 {
        self.latest_millis.load(Ordering::Relaxed)
    }

    fn manifest_path(&self) -> PathBuf {
        self.snapshots_dir.join("manifest.bin")
    }

    async fn read_manifest(&self) -> Option<Manifest> {
        let raw = tokio::fs::read(self.manifest_path()).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Take a snapshot now. Returns `false` when skipped because the state
    /// hash matches the manifest.
    pub async fn take_snapshot(&self) -> Result<bool, ServerError> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(ServerError::SnapshotInProgress);
        }
        let result = self.snapshot_inner().await;
        self.in_progress.store(false, Ordering::SeqCst);
        if result.is_err() {
            self.metrics.inc_snapshot_errors();
        }
        result
    }

    async fn snapshot_inner(&self) -> Result<bool, ServerError> {
        let state: BTreeMap<String, KeyEntry> =
            self.keyspace.get_state().await.into_iter().collect();
        let millis = now_ms() as i64;
        // Hash the state alone so identical keyspaces short-circuit no
        // matter when the snapshot runs.
        let state_json = serde_json::to_vec(&state)
            .map_err(|e| ServerError::Value(format!("snapshot encoding failed: {e}")))?;
        let hash = hex::encode(Md5::digest(&state_json));
        let object = SnapshotObject {
            state,
            latest_snapshot_millis: millis,
        };
        let json = serde_json::to_vec(&object)
            .map_err(|e| ServerError::Value(format!("snapshot encoding failed: {e}")))?;

        if let Some(manifest) = self.read_manifest().await {
            if manifest.latest_snapshot_hash == hash {
                self.keyspace.reset_changes();
                tracing::debug!("snapshot skipped, state unchanged");
                return Ok(false);
            }
        }

        let dir = self.snapshots_dir.join(millis.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join("state.bin"), &json).await?;
        let manifest = Manifest {
            latest_snapshot_millis: millis,
            latest_snapshot_hash: hash,
        };
        let manifest_json = serde_json::to_vec(&manifest)
            .map_err(|e| ServerError::Value(format!("manifest encoding failed: {e}")))?;
        tokio::fs::write(self.manifest_path(), manifest_json).await?;

        self.latest_millis.store(millis, Ordering::Relaxed);
        self.keyspace.reset_changes();
        self.metrics.inc_snapshots();
        tracing::info!(millis, "snapshot written");
        Ok(true)
    }

    /// Load the snapshot the manifest points at, if any.
    pub async fn restore(&self) -> anyhow::Result<bool> {
        let Some(manifest) = self.read_manifest().await else {
            return Ok(false);
        };
        let path = self
            .snapshots_dir
            .join(manifest.latest_snapshot_millis.to_string())
            .join("state.bin");
        let raw = tokio::fs::read(&path).await?;
        let object: SnapshotObject = serde_json::from_slice(&raw)?;
        let count = object.state.len();
        self.keyspace.load_state(object.state.into_iter().collect());
        self.latest_millis
            .store(manifest.latest_snapshot_millis, Ordering::Relaxed);
        tracing::info!(keys = count, "restored snapshot");
        Ok(true)
    }

    /// Every `SnapshotInterval`, snapshot when enough changes accumulated.
    pub fn spawn_ticker(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                sleep(self.interval).await;
                if self.keyspace.changes() < self.threshold {
                    continue;
                }
                match self.take_snapshot().await {
                    Ok(_) => {}
                    Err(ServerError::SnapshotInProgress) => {}
                    Err(e) => tracing::warn!(error = %e, "periodic snapshot failed"),
                }
            }
        })
    }
}
