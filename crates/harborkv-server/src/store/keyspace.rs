use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::time::{sleep, Instant};

use crate::cluster::Replicator;
use crate::config::{Config, EvictionPolicy};
use crate::errors::ServerError;
use crate::metrics::Metrics;
use crate::store::entry::{entry_size_bytes, KeyEntry, Value};
use crate::store::eviction::EvictionIndex;
use crate::time::now_ms;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(5);
const COPY_POLL_INTERVAL: Duration = Duration::from_millis(5);
const REPLICATED_DELETE_TIMEOUT: Duration = Duration::from_millis(500);

const WRITE_LOCKED: u32 = u32::MAX;

/// Per-key read/write lock with non-blocking acquire primitives. The state
/// word is a reader count, with `u32::MAX` reserved for the writer.
#[derive(Default)]
pub struct KeyLock {
    state: AtomicU32,
}

impl KeyLock {
    fn try_write(&self) -> bool {
        self.state
            .compare_exchange(0, WRITE_LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn try_read(&self) -> bool {
        let mut cur = self.state.load(Ordering::Relaxed);
        loop {
            if cur >= WRITE_LOCKED - 1 {
                return false;
            }
            match self.state.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    fn unlock_write(&self) {
        self.state.store(0, Ordering::Release);
    }

    fn unlock_read(&self) {
        self.state.fetch_sub(1, Ordering::Release);
    }
}

/// The authoritative in-memory keyspace.
///
/// Invariants:
/// - a key is present in `store` iff its `KeyLock` exists in `locks`;
/// - a key is listed in `keys_with_expiry` iff its entry carries an expiry;
/// - key creation is serialized by `key_creation_lock`, lookups are not.
pub struct Keyspace {
    store: DashMap<String, KeyEntry>,
    locks: DashMap<String, Arc<KeyLock>>,
    key_creation_lock: Mutex<()>,
    keys_with_expiry: RwLock<Vec<String>>,
    index: EvictionIndex,
    policy: EvictionPolicy,
    max_memory: u64,
    mem_used: AtomicU64,
    change_count: AtomicU64,
    state_copy_in_progress: AtomicBool,
    state_mutation_in_progress: AtomicBool,
    replicator: Option<Arc<dyn Replicator>>,
    metrics: Arc<Metrics>,
}

impl Keyspace {
    pub fn new(
        cfg: &Config,
        metrics: Arc<Metrics>,
        replicator: Option<Arc<dyn Replicator>>,
    ) -> Self {
        Self {
            store: DashMap::new(),
            locks: DashMap::new(),
            key_creation_lock: Mutex::new(()),
            keys_with_expiry: RwLock::new(Vec::new()),
            index: EvictionIndex::new(cfg.eviction_policy),
            policy: cfg.eviction_policy,
            max_memory: cfg.max_memory,
            mem_used: AtomicU64::new(0),
            change_count: AtomicU64::new(0),
            state_copy_in_progress: AtomicBool::new(false),
            state_mutation_in_progress: AtomicBool::new(false),
            replicator,
            metrics,
        }
    }

    pub fn in_cluster(&self) -> bool {
        self.replicator.is_some()
    }

    pub fn is_leader(&self) -> bool {
        self.replicator.as_ref().map_or(true, |r| r.is_leader())
    }

    pub fn mem_used(&self) -> u64 {
        self.mem_used.load(Ordering::Relaxed)
    }

    pub fn changes(&self) -> u64 {
        self.change_count.load(Ordering::Relaxed)
    }

    pub fn reset_changes(&self) {
        self.change_count.store(0, Ordering::Relaxed);
    }

    /// Live key count; expired-but-unswept keys are not counted.
    pub fn len(&self) -> usize {
        let now = now_ms();
        self.store.iter().filter(|r| !r.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn live_keys(&self) -> Vec<String> {
        let now = now_ms();
        self.store
            .iter()
            .filter(|r| !r.is_expired(now))
            .map(|r| r.key().clone())
            .collect()
    }

    /// True iff the key is present and not past its expiry. Lazily deletes
    /// a key found expired; in cluster mode the delete is routed through the
    /// replicator by the leader and left to replication on followers.
    pub async fn key_exists(&self, key: &str) -> bool {
        let expired = match self.store.get(key) {
            Some(entry) => entry.is_expired(now_ms()),
            None => return false,
        };
        if !expired {
            return true;
        }
        self.metrics.inc_expired();
        if let Some(rep) = &self.replicator {
            if rep.is_leader() {
                let _ = rep.apply_delete_key(key, REPLICATED_DELETE_TIMEOUT).await;
            }
        } else if let Err(e) = self.delete_key(key).await {
            tracing::debug!(key, error = %e, "lazy expiry delete failed");
        }
        false
    }

    /// Create the key (installing its lock and an empty entry) and return
    /// with the write lock held. Returns `created = false` after acquiring
    /// the write lock of an already existing key.
    pub async fn create_key_and_lock(&self, key: &str) -> Result<bool, ServerError> {
        let deadline = Instant::now() + DEFAULT_LOCK_TIMEOUT;
        loop {
            if self.locks.contains_key(key) {
                match self.acquire(key, true, deadline).await {
                    Ok(()) => {}
                    // Deleted while we waited; retry creation.
                    Err(ServerError::KeyNotFound(_)) => continue,
                    Err(e) => return Err(e),
                }
                if self.store.contains_key(key) {
                    return Ok(false);
                }
                self.unlock_key(key);
                continue;
            }

            let _creation = self.key_creation_lock.lock();
            if self.locks.contains_key(key) {
                continue; // lost the creation race
            }
            let entry = KeyEntry::new(Value::Str(String::new()));
            let size = entry_size_bytes(key, &entry);
            self.check_capacity(size)?;

            let lock = Arc::new(KeyLock::default());
            lock.try_write();
            self.locks.insert(key.to_string(), lock);
            self.store.insert(key.to_string(), entry);
            self.mem_used.fetch_add(size, Ordering::Relaxed);
            return Ok(true);
        }
    }

    pub async fn lock_key(&self, key: &str) -> Result<(), ServerError> {
        let deadline = Instant::now() + DEFAULT_LOCK_TIMEOUT;
        self.acquire(key, true, deadline).await
    }

    pub async fn rlock_key(&self, key: &str) -> Result<(), ServerError> {
        let deadline = Instant::now() + DEFAULT_LOCK_TIMEOUT;
        self.acquire(key, false, deadline).await
    }

    pub fn unlock_key(&self, key: &str) {
        if let Some(lock) = self.get_lock(key) {
            lock.unlock_write();
        }
    }

    pub fn runlock_key(&self, key: &str) {
        if let Some(lock) = self.get_lock(key) {
            lock.unlock_read();
        }
    }

    fn get_lock(&self, key: &str) -> Option<Arc<KeyLock>> {
        self.locks.get(key).map(|e| e.value().clone())
    }

    /// Poll-acquire the key's lock. The lock is re-resolved every attempt
    /// and verified after acquisition, so a delete/re-create cycle while
    /// waiting can never hand out an orphaned lock.
    async fn acquire(&self, key: &str, write: bool, deadline: Instant) -> Result<(), ServerError> {
        loop {
            let lock = self
                .get_lock(key)
                .ok_or_else(|| ServerError::KeyNotFound(key.to_string()))?;
            let acquired = if write { lock.try_write() } else { lock.try_read() };
            if acquired {
                match self.get_lock(key) {
                    Some(current) if Arc::ptr_eq(&current, &lock) => return Ok(()),
                    _ => {
                        // The key was deleted between lookup and acquire.
                        if write {
                            lock.unlock_write();
                        } else {
                            lock.unlock_read();
                        }
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(ServerError::Timeout(key.to_string()));
            }
            sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    /// Read the value. The caller must hold the key's read (or write) lock.
    pub async fn get_value(&self, key: &str) -> Result<Value, ServerError> {
        let value = self
            .store
            .get(key)
            .map(|e| e.value.clone())
            .ok_or_else(|| ServerError::KeyNotFound(key.to_string()))?;
        self.update_key_in_cache(key).await?;
        Ok(value)
    }

    /// Replace the value, preserving any existing expiry. The caller must
    /// hold the key's write lock.
    pub async fn set_value(&self, key: &str, value: Value) -> Result<(), ServerError> {
        {
            let mut entry = self
                .store
                .get_mut(key)
                .ok_or_else(|| ServerError::KeyNotFound(key.to_string()))?;
            let old_size = entry_size_bytes(key, &entry);
            let new_entry = KeyEntry {
                value,
                expires_at_ms: entry.expires_at_ms,
            };
            let new_size = entry_size_bytes(key, &new_entry);
            if new_size > old_size {
                self.check_capacity(new_size - old_size)?;
                self.mem_used.fetch_add(new_size - old_size, Ordering::Relaxed);
            } else {
                self.mem_used.fetch_sub(old_size - new_size, Ordering::Relaxed);
            }
            *entry = new_entry;
        }
        if !self.in_cluster() {
            self.change_count.fetch_add(1, Ordering::Relaxed);
        }
        self.update_key_in_cache(key).await
    }

    pub fn get_expiry(&self, key: &str) -> Result<u64, ServerError> {
        self.store
            .get(key)
            .map(|e| e.expires_at_ms)
            .ok_or_else(|| ServerError::KeyNotFound(key.to_string()))
    }

    /// Set the expiry instant. With `touch` the access also feeds the
    /// eviction index (SETEX-style paths pass false to avoid double counting).
    pub async fn set_expiry(
        &self,
        key: &str,
        at_ms: u64,
        touch: bool,
    ) -> Result<(), ServerError> {
        {
            let mut entry = self
                .store
                .get_mut(key)
                .ok_or_else(|| ServerError::KeyNotFound(key.to_string()))?;
            entry.expires_at_ms = at_ms;
        }
        {
            let mut listed = self.keys_with_expiry.write();
            let pos = listed.iter().position(|k| k == key);
            match (at_ms != 0, pos) {
                (true, None) => listed.push(key.to_string()),
                (false, Some(i)) => {
                    listed.remove(i);
                }
                _ => {}
            }
        }
        if touch {
            self.update_key_in_cache(key).await?;
        }
        Ok(())
    }

    pub fn remove_expiry(&self, key: &str) -> Result<(), ServerError> {
        {
            let mut entry = self
                .store
                .get_mut(key)
                .ok_or_else(|| ServerError::KeyNotFound(key.to_string()))?;
            entry.expires_at_ms = 0;
        }
        let mut listed = self.keys_with_expiry.write();
        if let Some(i) = listed.iter().position(|k| k == key) {
            listed.remove(i);
        }
        Ok(())
    }

    pub fn keys_with_expiry(&self) -> Vec<String> {
        self.keys_with_expiry.read().clone()
    }

    /// Acquire the write lock, then remove the entry together with its lock,
    /// expiry listing and eviction index entry.
    pub async fn delete_key(&self, key: &str) -> Result<(), ServerError> {
        let deadline = Instant::now() + DEFAULT_LOCK_TIMEOUT;
        self.acquire(key, true, deadline).await?;
        self.remove_entry(key);
        Ok(())
    }

    /// Remove without locking. The caller must hold the key's write lock,
    /// which is destroyed together with the entry; callers must not unlock
    /// afterwards (waiters resolve to KeyNotFound on their next poll).
    pub fn remove_entry(&self, key: &str) {
        if let Some((_, entry)) = self.store.remove(key) {
            self.mem_used
                .fetch_sub(entry_size_bytes(key, &entry), Ordering::Relaxed);
        }
        self.locks.remove(key);
        let mut listed = self.keys_with_expiry.write();
        if let Some(i) = listed.iter().position(|k| k == key) {
            listed.remove(i);
        }
        drop(listed);
        self.index.remove(key);
    }

    pub fn flush_all(&self) {
        self.store.clear();
        self.locks.clear();
        self.keys_with_expiry.write().clear();
        self.index.clear();
        self.mem_used.store(0, Ordering::Relaxed);
    }

    /// Deep-copy the keyspace. Blocks until neither a state copy nor a state
    /// mutation is in progress, then claims the copy flag. This is a
    /// best-effort barrier, not a transaction boundary.
    pub async fn get_state(&self) -> HashMap<String, KeyEntry> {
        loop {
            if !self.state_copy_in_progress.load(Ordering::Acquire)
                && !self.state_mutation_in_progress.load(Ordering::Acquire)
                && self
                    .state_copy_in_progress
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                break;
            }
            sleep(COPY_POLL_INTERVAL).await;
        }
        let snapshot = self
            .store
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        self.state_copy_in_progress.store(false, Ordering::Release);
        snapshot
    }

    /// Replace the keyspace with restored state (startup only).
    pub fn load_state(&self, state: HashMap<String, KeyEntry>) {
        self.flush_all();
        let mut listed = self.keys_with_expiry.write();
        for (key, entry) in state {
            self.mem_used
                .fetch_add(entry_size_bytes(&key, &entry), Ordering::Relaxed);
            if entry.has_expiry() {
                listed.push(key.clone());
            }
            self.locks.insert(key.clone(), Arc::new(KeyLock::default()));
            self.store.insert(key, entry);
        }
    }

    /// A write command sets the mutation flag only after the copy flag is
    /// clear; `get_state` claims the copy flag only when both are clear.
    pub async fn begin_mutation(&self) {
        while self.state_copy_in_progress.load(Ordering::Acquire) {
            sleep(COPY_POLL_INTERVAL).await;
        }
        self.state_mutation_in_progress.store(true, Ordering::Release);
    }

    pub fn end_mutation(&self) {
        self.state_mutation_in_progress.store(false, Ordering::Release);
    }

    fn check_capacity(&self, additional: u64) -> Result<(), ServerError> {
        if self.max_memory > 0
            && self.policy == EvictionPolicy::NoEviction
            && self.mem_used.load(Ordering::Relaxed) + additional > self.max_memory
        {
            return Err(ServerError::MaxMemoryExceeded);
        }
        Ok(())
    }

    /// Feed the eviction index for a touched key and enforce the memory cap.
    /// Only the leader of a cluster (or a standalone node) maintains the
    /// cache; followers converge through replicated deletes.
    pub async fn update_key_in_cache(&self, key: &str) -> Result<(), ServerError> {
        if self.in_cluster() && !self.is_leader() {
            return Ok(());
        }
        if self.policy == EvictionPolicy::NoEviction {
            return Ok(());
        }
        let has_expiry = self
            .store
            .get(key)
            .map(|e| e.has_expiry())
            .unwrap_or(false);
        self.index.touch(key, has_expiry);
        self.enforce_memory(key).await
    }

    async fn enforce_memory(&self, exclude: &str) -> Result<(), ServerError> {
        if self.max_memory == 0 {
            return Ok(());
        }
        while self.mem_used.load(Ordering::Relaxed) > self.max_memory {
            let Some(victim) = self.pick_victim(exclude) else {
                return Err(ServerError::Eviction(format!(
                    "{} cache empty",
                    self.policy_label()
                )));
            };
            let result = if let Some(rep) = &self.replicator {
                rep.apply_delete_key(&victim, REPLICATED_DELETE_TIMEOUT).await
            } else {
                self.delete_key(&victim).await
            };
            match result {
                Ok(()) => {
                    self.metrics.inc_evictions(1);
                    tracing::debug!(key = %victim, "evicted");
                }
                Err(ServerError::KeyNotFound(_)) => {} // stale index entry
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn pick_victim(&self, exclude: &str) -> Option<String> {
        if self.policy.is_random() {
            let pool = if self.policy.is_volatile() {
                self.keys_with_expiry.read().clone()
            } else {
                self.store.iter().map(|r| r.key().clone()).collect()
            };
            let candidates: Vec<String> =
                pool.into_iter().filter(|k| k != exclude).collect();
            if candidates.is_empty() {
                return None;
            }
            let i = rand::rng().random_range(0..candidates.len());
            return candidates.into_iter().nth(i);
        }
        self.index.pop(exclude)
    }

    fn policy_label(&self) -> &'static str {
        if self.policy.is_lfu() {
            "LFU"
        } else if self.policy.is_lru() {
            "LRU"
        } else {
            "random"
        }
    }

    /// Probe a bounded random sample of keys carrying an expiry, deleting
    /// those found expired. Cluster followers skip the sweep and rely on
    /// replicated deletes from the leader.
    pub async fn sweep_expired(&self, budget: usize) {
        if self.in_cluster() && !self.is_leader() {
            return;
        }
        let listed = self.keys_with_expiry.read().clone();
        if listed.is_empty() {
            return;
        }
        let now = now_ms();
        // The rng is not held across await points.
        let sample: Vec<String> = {
            let mut rng = rand::rng();
            (0..budget.min(listed.len()))
                .map(|_| listed[rng.random_range(0..listed.len())].clone())
                .collect()
        };
        for key in &sample {
            let expired = self
                .store
                .get(key)
                .map(|e| e.is_expired(now))
                .unwrap_or(false);
            if !expired {
                continue;
            }
            let result = if let Some(rep) = &self.replicator {
                rep.apply_delete_key(key, REPLICATED_DELETE_TIMEOUT).await
            } else {
                self.delete_key(key).await
            };
            if result.is_ok() {
                self.metrics.inc_expired();
            }
        }
    }
}
