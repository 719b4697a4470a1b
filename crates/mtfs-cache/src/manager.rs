//! Cache manager: one policy cache behind a mutex.
//!
//! Policy switches and resizes rebuild the cache and drop resident data by
//! contract; callers that need the working set warm again re-populate via
//! [`CacheManager::warm_up`].

use crate::{
    CacheKey, CacheStatistics, EntryInfo, EvictionPolicy, PolicyCache, new_policy_cache,
};
use parking_lot::Mutex;
use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info};

struct ManagerInner<K, V> {
    capacity: usize,
    policy: EvictionPolicy,
    cache: Box<dyn PolicyCache<K, V>>,
}

/// Owns exactly one policy cache and serializes every operation, so that
/// policy switches and resizes are atomic with respect to user traffic.
pub struct CacheManager<K, V> {
    inner: Mutex<ManagerInner<K, V>>,
}

impl<K, V> fmt::Debug for CacheManager<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CacheManager")
            .field("policy", &inner.policy)
            .field("capacity", &inner.capacity)
            .field("len", &inner.cache.len())
            .finish()
    }
}

impl<K, V> CacheManager<K, V>
where
    K: CacheKey + 'static,
    V: Clone + Send + 'static,
{
    #[must_use]
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            inner: Mutex::new(ManagerInner {
                capacity,
                policy,
                cache: new_policy_cache(policy, capacity),
            }),
        }
    }

    pub fn put(&self, key: K, value: V) {
        self.inner.lock().cache.put(key, value);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().cache.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().cache.contains(key)
    }

    pub fn remove(&self, key: &K) {
        self.inner.lock().cache.remove(key);
    }

    pub fn clear(&self) {
        self.inner.lock().cache.clear();
    }

    pub fn pin(&self, key: &K) {
        self.inner.lock().cache.pin(key);
    }

    pub fn unpin(&self, key: &K) {
        self.inner.lock().cache.unpin(key);
    }

    #[must_use]
    pub fn is_pinned(&self, key: &K) -> bool {
        self.inner.lock().cache.is_pinned(key)
    }

    pub fn prefetch(&self, key: K, value: V) {
        self.inner.lock().cache.prefetch(key, value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    #[must_use]
    pub fn policy(&self) -> EvictionPolicy {
        self.inner.lock().policy
    }

    /// Switch the eviction discipline. Resident data is discarded by
    /// contract; the statistics start over with the new cache.
    pub fn set_policy(&self, policy: EvictionPolicy) {
        let mut inner = self.inner.lock();
        if inner.policy == policy {
            return;
        }
        let dropped = inner.cache.len();
        inner.policy = policy;
        inner.cache = new_policy_cache(policy, inner.capacity);
        info!(%policy, dropped, "cache policy switched");
    }

    /// Rebuild with a new capacity, discarding resident data by contract.
    pub fn resize(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        let dropped = inner.cache.len();
        inner.capacity = capacity;
        inner.cache = new_policy_cache(inner.policy, capacity);
        info!(capacity, dropped, "cache resized");
    }

    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().cache.keys()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<EntryInfo<K>> {
        self.inner.lock().cache.entries()
    }

    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        self.inner.lock().cache.statistics()
    }

    pub fn reset_statistics(&self) {
        self.inner.lock().cache.reset_statistics();
    }

    /// Top-`count` keys by access count; ties go to the more recently
    /// accessed key.
    #[must_use]
    pub fn hot_keys(&self, count: usize) -> Vec<K> {
        let mut entries = self.entries();
        entries.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        });
        entries.into_iter().take(count).map(|e| e.key).collect()
    }

    /// Pre-load a batch via prefetch (never counted as hits or misses).
    pub fn warm_up(&self, pairs: impl IntoIterator<Item = (K, V)>) {
        let mut inner = self.inner.lock();
        let mut loaded = 0_usize;
        for (key, value) in pairs {
            inner.cache.prefetch(key, value);
            loaded += 1;
        }
        debug!(loaded, "cache warmed up");
    }

    /// Drop unpinned entries idle for longer than `max_idle`. Returns the
    /// number of entries dropped.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut inner = self.inner.lock();
        let idle: Vec<K> = inner
            .cache
            .entries()
            .into_iter()
            .filter(|e| !e.pinned && e.last_accessed.elapsed() > max_idle)
            .map(|e| e.key)
            .collect();
        for key in &idle {
            inner.cache.remove(key);
        }
        if !idle.is_empty() {
            debug!(dropped = idle.len(), "idle entries evicted");
        }
        idle.len()
    }

    /// Human-readable analytics block.
    #[must_use]
    pub fn analytics_report(&self) -> String {
        let inner = self.inner.lock();
        let stats = inner.cache.statistics();
        let hot = {
            let mut entries = inner.cache.entries();
            entries.sort_by(|a, b| {
                b.access_count
                    .cmp(&a.access_count)
                    .then_with(|| b.last_accessed.cmp(&a.last_accessed))
            });
            entries.truncate(10);
            entries
        };

        let mut out = String::new();
        let _ = writeln!(out, "======== Cache Analytics ========");
        let _ = writeln!(out, "policy:     {}", inner.policy);
        let _ = writeln!(out, "capacity:   {}", inner.capacity);
        let _ = writeln!(out, "resident:   {}", inner.cache.len());
        let _ = writeln!(
            out,
            "accesses:   {} ({} hits, {} misses, {:.2}% hit rate)",
            stats.total_accesses,
            stats.hits,
            stats.misses,
            stats.hit_rate() * 100.0
        );
        let _ = writeln!(out, "evictions:  {}", stats.evictions);
        let _ = writeln!(
            out,
            "pinned:     {}   prefetched: {}",
            stats.pinned_items, stats.prefetched_items
        );
        if !hot.is_empty() {
            let _ = writeln!(out, "hot keys:");
            for entry in hot {
                let _ = writeln!(
                    out,
                    "  {:?}  accesses={} pinned={}",
                    entry.key, entry.access_count, entry.pinned
                );
            }
        }
        let _ = writeln!(out, "=================================");
        out
    }
}
