//! Per-service statistics: monotonic, lock-free counters with atomic
//! snapshot semantics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Four independent monotonic counters behind `Arc`-free atomics. The
/// containing map (supervisor's `managers`) is what needs a lock, not this.
#[derive(Debug, Default)]
pub struct ServiceStats {
    start_count: AtomicU64,
    stop_count: AtomicU64,
    fail_count: AtomicU64,
    restart_count: AtomicU64,
}

/// A point-in-time copy of [`ServiceStats`], safe to hand to callers outside
/// any lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub start_count: u64,
    pub stop_count: u64,
    pub fail_count: u64,
    pub restart_count: u64,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_start(&self) {
        self.start_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stop(&self) {
        self.stop_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fail(&self) {
        self.fail_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restart_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Each counter is read atomically; the four reads together are not a
    /// linearizable point, which is sufficient per the design.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            start_count: self.start_count.load(Ordering::Relaxed),
            stop_count: self.stop_count.load(Ordering::Relaxed),
            fail_count: self.fail_count.load(Ordering::Relaxed),
            restart_count: self.restart_count.load(Ordering::Relaxed),
        }
    }
}
