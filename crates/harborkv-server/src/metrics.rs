use std::sync::atomic::{AtomicU64, Ordering};

use crate::time::now_ms;

pub struct Metrics {
    start_ms: u64,
    pub commands_total: AtomicU64,
    pub hits_total: AtomicU64,
    pub misses_total: AtomicU64,
    pub evictions_total: AtomicU64,
    pub expired_total: AtomicU64,
    pub events_published_total: AtomicU64,
    pub events_dropped_total: AtomicU64,
    pub aof_appends_total: AtomicU64,
    pub aof_errors_total: AtomicU64,
    pub snapshots_total: AtomicU64,
    pub snapshot_errors_total: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_ms: now_ms(),
            commands_total: AtomicU64::new(0),
            hits_total: AtomicU64::new(0),
            misses_total: AtomicU64::new(0),
            evictions_total: AtomicU64::new(0),
            expired_total: AtomicU64::new(0),
            events_published_total: AtomicU64::new(0),
            events_dropped_total: AtomicU64::new(0),
            aof_appends_total: AtomicU64::new(0),
            aof_errors_total: AtomicU64::new(0),
            snapshots_total: AtomicU64::new(0),
            snapshot_errors_total: AtomicU64::new(0),
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        now_ms().saturating_sub(self.start_ms)
    }

    pub fn inc_commands(&self) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_hit(&self) {
        self.hits_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_miss(&self) {
        self.misses_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_evictions(&self, n: u64) {
        self.evictions_total.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_expired(&self) {
        self.expired_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_published(&self) {
        self.events_published_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_dropped(&self) {
        self.events_dropped_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_aof_appends(&self) {
        self.aof_appends_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_aof_errors(&self) {
        self.aof_errors_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_snapshots(&self) {
        self.snapshots_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_snapshot_errors(&self) {
        self.snapshot_errors_total.fetch_add(1, Ordering::Relaxed);
    }
}
