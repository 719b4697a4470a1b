#![forbid(unsafe_code)]
//! Polymorphic cache engine with pluggable eviction policies.
//!
//! Four disciplines — LRU, LFU, FIFO, LIFO — implement the same
//! [`PolicyCache`] contract: insert, lookup, eviction, pinning, prefetch,
//! and live statistics. [`CacheManager`] owns exactly one policy cache and
//! adds atomic policy switching, resizing, and analytics on top.
//!
//! ## Contract highlights
//!
//! - `get` on a hit bumps the access count and applies policy re-ordering;
//!   a miss is a value-level `None`, never an error.
//! - Pinned entries are excluded from eviction. When every candidate is
//!   pinned the cache admits the insert anyway and runs over capacity.
//! - `prefetch` inserts (or updates) without touching the hit/miss
//!   counters; it is accounted separately.
//! - Zero capacity means "cache disabled": `put` and `prefetch` are no-ops
//!   and `get` always misses.

mod fifo;
mod lfu;
mod lifo;
mod lru;
mod manager;

pub use fifo::FifoCache;
pub use lfu::LfuCache;
pub use lifo::LifoCache;
pub use lru::LruCache;
pub use manager::CacheManager;

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Eviction discipline selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionPolicy {
    /// Least recently used.
    Lru,
    /// Least frequently used; insertion order breaks frequency ties.
    Lfu,
    /// First in, first out.
    Fifo,
    /// Last in, first out.
    Lifo,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lru => "LRU",
            Self::Lfu => "LFU",
            Self::Fifo => "FIFO",
            Self::Lifo => "LIFO",
        };
        f.write_str(name)
    }
}

/// Bounds every cache key must satisfy.
pub trait CacheKey: Eq + Hash + Clone + Send + fmt::Debug {}

impl<T: Eq + Hash + Clone + Send + fmt::Debug> CacheKey for T {}

/// One resident value plus its access bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub value: V,
    pub access_count: u64,
    pub last_accessed: Instant,
    pub created_at: Instant,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V) -> Self {
        let now = Instant::now();
        Self {
            value,
            access_count: 0,
            last_accessed: now,
            created_at: now,
        }
    }

    /// Record a read access.
    pub(crate) fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Instant::now();
    }
}

/// Per-entry view used by analytics (`hot_keys`, idle eviction).
#[derive(Debug, Clone)]
pub struct EntryInfo<K> {
    pub key: K,
    pub access_count: u64,
    pub last_accessed: Instant,
    pub age: Duration,
    pub pinned: bool,
}

/// Snapshot of one cache's counters.
///
/// `hit_rate` is derived at read time; counters are monotonic between
/// resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_accesses: u64,
    pub pinned_items: usize,
    pub prefetched_items: u64,
    pub since_reset: Duration,
}

impl CacheStatistics {
    /// Hit rate in [0.0, 1.0]; zero when no accesses have been made.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.total_accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_accesses as f64
        }
    }

    /// Fold another snapshot into this one (shard aggregation).
    ///
    /// The result is a snapshot-sum: counts from different shards may be
    /// observed at slightly different instants.
    pub fn accumulate(&mut self, other: &Self) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.evictions += other.evictions;
        self.total_accesses += other.total_accesses;
        self.pinned_items += other.pinned_items;
        self.prefetched_items += other.prefetched_items;
        self.since_reset = self.since_reset.max(other.since_reset);
    }
}

/// Monotonic counters shared by all policy implementations.
///
/// Atomics so a snapshot never tears a counter, even when taken while an
/// operation is in flight on another thread.
#[derive(Debug)]
pub(crate) struct StatCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    prefetched: AtomicU64,
    reset_at: Instant,
}

impl StatCounters {
    pub(crate) fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            prefetched: AtomicU64::new(0),
            reset_at: Instant::now(),
        }
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_prefetch(&self) {
        self.prefetched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pinned_items: usize) -> CacheStatistics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStatistics {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            total_accesses: hits + misses,
            pinned_items,
            prefetched_items: self.prefetched.load(Ordering::Relaxed),
            since_reset: self.reset_at.elapsed(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.prefetched.store(0, Ordering::Relaxed);
        self.reset_at = Instant::now();
    }
}

/// Capability set shared by all four eviction disciplines.
pub trait PolicyCache<K, V>: Send {
    /// The discipline this cache implements.
    fn policy(&self) -> EvictionPolicy;

    /// Insert or update. Updates touch the value and re-order under
    /// LRU/LFU; FIFO/LIFO keep their insertion order. New inserts evict
    /// first when the cache is at capacity.
    fn put(&mut self, key: K, value: V);

    /// Lookup. A hit bumps the access count and the hit counter; a miss
    /// bumps the miss counter and returns `None`.
    fn get(&mut self, key: &K) -> Option<V>;

    /// Membership test; does not count as an access.
    fn contains(&self, key: &K) -> bool;

    /// Remove if present; also unpins. Idempotent.
    fn remove(&mut self, key: &K);

    /// Drop all entries, the pinned set, and the ordering structure.
    /// Counters survive.
    fn clear(&mut self);

    /// Exclude a resident key from eviction. No-op for absent keys.
    fn pin(&mut self, key: &K);

    /// Re-admit a key to eviction. No-op for absent or unpinned keys.
    fn unpin(&mut self, key: &K);

    fn is_pinned(&self, key: &K) -> bool;

    /// Insert if absent (evicting if necessary), update if present.
    /// Counted separately; never a hit or a miss.
    fn prefetch(&mut self, key: K, value: V);

    /// Number of resident entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    /// Resident keys in no particular order.
    fn keys(&self) -> Vec<K>;

    /// Per-entry access bookkeeping for analytics.
    fn entries(&self) -> Vec<EntryInfo<K>>;

    fn statistics(&self) -> CacheStatistics;

    fn reset_statistics(&mut self);
}

/// Construct a policy cache for `policy` with the given capacity.
#[must_use]
pub fn new_policy_cache<K, V>(policy: EvictionPolicy, capacity: usize) -> Box<dyn PolicyCache<K, V>>
where
    K: CacheKey + 'static,
    V: Clone + Send + 'static,
{
    match policy {
        EvictionPolicy::Lru => Box::new(LruCache::new(capacity)),
        EvictionPolicy::Lfu => Box::new(LfuCache::new(capacity)),
        EvictionPolicy::Fifo => Box::new(FifoCache::new(capacity)),
        EvictionPolicy::Lifo => Box::new(LifoCache::new(capacity)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_zero_without_accesses() {
        let stats = CacheStatistics {
            hits: 0,
            misses: 0,
            evictions: 0,
            total_accesses: 0,
            pinned_items: 0,
            prefetched_items: 0,
            since_reset: Duration::ZERO,
        };
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn accumulate_sums_counters() {
        let mut a = CacheStatistics {
            hits: 3,
            misses: 1,
            evictions: 2,
            total_accesses: 4,
            pinned_items: 1,
            prefetched_items: 0,
            since_reset: Duration::from_secs(5),
        };
        let b = CacheStatistics {
            hits: 1,
            misses: 1,
            evictions: 0,
            total_accesses: 2,
            pinned_items: 0,
            prefetched_items: 7,
            since_reset: Duration::from_secs(9),
        };
        a.accumulate(&b);
        assert_eq!(a.hits, 4);
        assert_eq!(a.total_accesses, 6);
        assert_eq!(a.prefetched_items, 7);
        assert_eq!(a.since_reset, Duration::from_secs(9));
    }

    #[test]
    fn policy_display_names() {
        assert_eq!(EvictionPolicy::Lru.to_string(), "LRU");
        assert_eq!(EvictionPolicy::Lifo.to_string(), "LIFO");
    }

    #[test]
    fn factory_builds_every_policy() {
        for policy in [
            EvictionPolicy::Lru,
            EvictionPolicy::Lfu,
            EvictionPolicy::Fifo,
            EvictionPolicy::Lifo,
        ] {
            let cache = new_policy_cache::<u32, String>(policy, 4);
            assert_eq!(cache.policy(), policy);
            assert_eq!(cache.capacity(), 4);
            assert!(cache.is_empty());
        }
    }
}
