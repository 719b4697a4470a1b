//! Coordinator-level performance counters.
//!
//! Counters are atomics so snapshots never tear; the hit rate is derived
//! at read time. These mirror the cache's own statistics at the
//! operation level (a cache hit here is a `read_file` served without
//! touching the host filesystem).

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Snapshot of coordinator traffic since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_reads: u64,
    pub total_writes: u64,
    pub total_operations: u64,
    pub since_reset: Duration,
}

impl PerformanceStats {
    /// Read-path cache hit rate in [0.0, 1.0].
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub(crate) struct PerfCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total_reads: AtomicU64,
    total_writes: AtomicU64,
    total_operations: AtomicU64,
    reset_at: Mutex<Instant>,
}

impl PerfCounters {
    pub(crate) fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            total_reads: AtomicU64::new(0),
            total_writes: AtomicU64::new(0),
            total_operations: AtomicU64::new(0),
            reset_at: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.total_reads.fetch_add(1, Ordering::Relaxed);
        self.total_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.total_writes.fetch_add(1, Ordering::Relaxed);
        self.total_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_operation(&self) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PerformanceStats {
        PerformanceStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            total_reads: self.total_reads.load(Ordering::Relaxed),
            total_writes: self.total_writes.load(Ordering::Relaxed),
            total_operations: self.total_operations.load(Ordering::Relaxed),
            since_reset: self.reset_at.lock().elapsed(),
        }
    }

    pub(crate) fn reset(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.total_reads.store(0, Ordering::Relaxed);
        self.total_writes.store(0, Ordering::Relaxed);
        self.total_operations.store(0, Ordering::Relaxed);
        *self.reset_at.lock() = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_is_derived() {
        let counters = PerfCounters::new();
        counters.record_read();
        counters.record_cache_hit();
        counters.record_read();
        counters.record_cache_miss();
        let stats = counters.snapshot();
        assert_eq!(stats.total_reads, 2);
        assert_eq!(stats.total_operations, 2);
        assert!((stats.cache_hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_zeroes_counters() {
        let counters = PerfCounters::new();
        counters.record_write();
        counters.reset();
        let stats = counters.snapshot();
        assert_eq!(stats.total_writes, 0);
        assert_eq!(stats.cache_hit_rate(), 0.0);
    }
}
