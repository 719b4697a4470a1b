#![forbid(unsafe_code)]
//! Concurrent cache façade: a sharded, read/write-locked wrapper that
//! turns the single-policy cache engine into a thread-safe, asynchronous
//! store.
//!
//! Keys route to one of N [`CacheManager`] shards by a deterministic hash.
//! Read-typed operations take the shard's shared lock; write-typed
//! operations take the exclusive lock. Global operations visit shards in
//! index order and never hold two shard locks at once, so there is no
//! cross-shard ordering — statistics aggregation is a snapshot-sum.
//!
//! Async variants submit the same synchronous operation to the shared
//! [`pool::WorkerPool`]; batch variants fan out per key and collect in
//! input order.

pub mod pool;

use mtfs_cache::{CacheKey, CacheManager, CacheStatistics, EntryInfo, EvictionPolicy};
use mtfs_error::Result;
use parking_lot::{Condvar, Mutex, RwLock};
use pool::{TaskHandle, WorkerPool, join_all};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Snapshot of the façade's own traffic counters.
///
/// These count façade operations, not cache hits; per-cache hit/miss
/// counters live in [`CacheStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConcurrentStats {
    pub reads: u64,
    pub writes: u64,
    pub async_submitted: u64,
    pub async_completed: u64,
    pub async_failed: u64,
}

impl ConcurrentStats {
    /// Fraction of submitted async operations that completed, in [0, 1].
    #[must_use]
    pub fn completion_rate(&self) -> f64 {
        if self.async_submitted == 0 {
            0.0
        } else {
            self.async_completed as f64 / self.async_submitted as f64
        }
    }
}

#[derive(Debug, Default)]
struct ConcurrentCounters {
    reads: AtomicU64,
    writes: AtomicU64,
    async_submitted: AtomicU64,
    async_completed: AtomicU64,
    async_failed: AtomicU64,
}

impl ConcurrentCounters {
    fn snapshot(&self) -> ConcurrentStats {
        ConcurrentStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            async_submitted: self.async_submitted.load(Ordering::Relaxed),
            async_completed: self.async_completed.load(Ordering::Relaxed),
            async_failed: self.async_failed.load(Ordering::Relaxed),
        }
    }
}

/// Stop signal shared with a background loop.
struct StopFlag {
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl StopFlag {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Sleep up to `interval`; returns `true` once stopped.
    fn wait(&self, interval: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return true;
        }
        let _ = self.cv.wait_for(&mut stopped, interval);
        *stopped
    }

    fn trigger(&self) {
        *self.stopped.lock() = true;
        self.cv.notify_all();
    }
}

struct BackgroundLoop {
    stop: Arc<StopFlag>,
    handle: JoinHandle<()>,
}

/// Sharded, read/write-locked concurrent cache.
pub struct ShardedCache<K, V> {
    shards: Vec<RwLock<CacheManager<K, V>>>,
    shard_count: usize,
    pool: Arc<WorkerPool>,
    counters: ConcurrentCounters,
    optimizer: Mutex<Option<BackgroundLoop>>,
    cleaner: Mutex<Option<BackgroundLoop>>,
}

pub const DEFAULT_SHARDS: usize = 16;

impl<K, V> ShardedCache<K, V>
where
    K: CacheKey + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Build a façade with `shard_count` shards splitting `capacity`
    /// between them (each shard gets at least one slot).
    #[must_use]
    pub fn new(
        capacity: usize,
        policy: EvictionPolicy,
        shard_count: usize,
        pool: Arc<WorkerPool>,
    ) -> Arc<Self> {
        let shard_count = shard_count.max(1);
        let per_shard = (capacity / shard_count).max(1);
        let shards = (0..shard_count)
            .map(|_| RwLock::new(CacheManager::new(per_shard, policy)))
            .collect();
        info!(shard_count, per_shard, %policy, "sharded cache initialized");
        Arc::new(Self {
            shards,
            shard_count,
            pool,
            counters: ConcurrentCounters::default(),
            optimizer: Mutex::new(None),
            cleaner: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Deterministic shard index for a key.
    #[must_use]
    pub fn shard_index(&self, key: &K) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shard_count as u64) as usize
    }

    fn shard(&self, key: &K) -> &RwLock<CacheManager<K, V>> {
        &self.shards[self.shard_index(key)]
    }

    // ── Synchronous operations ──────────────────────────────────────────

    pub fn put(&self, key: K, value: V) {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.shard(&key).write().put(key, value);
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        self.shard(key).read().get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        self.shard(key).read().contains(key)
    }

    pub fn remove(&self, key: &K) {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.shard(key).write().remove(key);
    }

    pub fn pin(&self, key: &K) {
        self.shard(key).write().pin(key);
    }

    pub fn unpin(&self, key: &K) {
        self.shard(key).write().unpin(key);
    }

    #[must_use]
    pub fn is_pinned(&self, key: &K) -> bool {
        self.shard(key).read().is_pinned(key)
    }

    pub fn prefetch(&self, key: K, value: V) {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.shard(&key).write().prefetch(key, value);
    }

    /// Clear every shard, visiting them in index order.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Switch every shard's policy; resident data is discarded by
    /// contract.
    pub fn set_policy(&self, policy: EvictionPolicy) {
        for shard in &self.shards {
            shard.write().set_policy(policy);
        }
    }

    #[must_use]
    pub fn policy(&self) -> EvictionPolicy {
        self.shards[0].read().policy()
    }

    /// Resize the total capacity, re-split across shards. Discards
    /// resident data by contract.
    pub fn resize(&self, capacity: usize) {
        let per_shard = (capacity / self.shard_count).max(1);
        for shard in &self.shards {
            shard.write().resize(per_shard);
        }
    }

    /// Total resident entries (snapshot-sum).
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate statistics across shards (snapshot-sum; may observe
    /// in-flight counts).
    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        let mut total: Option<CacheStatistics> = None;
        for shard in &self.shards {
            let stats = shard.read().statistics();
            match total.as_mut() {
                Some(acc) => acc.accumulate(&stats),
                None => total = Some(stats),
            }
        }
        total.unwrap_or(CacheStatistics {
            hits: 0,
            misses: 0,
            evictions: 0,
            total_accesses: 0,
            pinned_items: 0,
            prefetched_items: 0,
            since_reset: Duration::ZERO,
        })
    }

    pub fn reset_statistics(&self) {
        for shard in &self.shards {
            shard.write().reset_statistics();
        }
    }

    /// Top-`count` keys across all shards by access count, recency as the
    /// tie-break.
    #[must_use]
    pub fn hot_keys(&self, count: usize) -> Vec<K> {
        let mut entries: Vec<EntryInfo<K>> = Vec::new();
        for shard in &self.shards {
            entries.extend(shard.read().entries());
        }
        entries.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        });
        entries.into_iter().take(count).map(|e| e.key).collect()
    }

    /// Pre-load a batch via prefetch, routing each pair to its shard.
    pub fn warm_up(&self, pairs: impl IntoIterator<Item = (K, V)>) {
        for (key, value) in pairs {
            self.prefetch(key, value);
        }
    }

    /// Façade traffic counters.
    #[must_use]
    pub fn concurrent_stats(&self) -> ConcurrentStats {
        self.counters.snapshot()
    }

    // ── Async operations ────────────────────────────────────────────────

    fn submit_op<T, F>(self: &Arc<Self>, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> T + Send + 'static,
    {
        self.counters.async_submitted.fetch_add(1, Ordering::Relaxed);
        let cache = Arc::clone(self);
        self.pool.submit(move || {
            let value = op(&cache);
            cache.counters.async_completed.fetch_add(1, Ordering::Relaxed);
            value
        })
    }

    pub fn put_async(self: &Arc<Self>, key: K, value: V) -> TaskHandle<()> {
        self.submit_op(move |cache| cache.put(key, value))
    }

    pub fn get_async(self: &Arc<Self>, key: K) -> TaskHandle<Option<V>> {
        self.submit_op(move |cache| cache.get(&key))
    }

    pub fn contains_async(self: &Arc<Self>, key: K) -> TaskHandle<bool> {
        self.submit_op(move |cache| cache.contains(&key))
    }

    pub fn remove_async(self: &Arc<Self>, key: K) -> TaskHandle<()> {
        self.submit_op(move |cache| cache.remove(&key))
    }

    pub fn pin_async(self: &Arc<Self>, key: K) -> TaskHandle<()> {
        self.submit_op(move |cache| cache.pin(&key))
    }

    pub fn unpin_async(self: &Arc<Self>, key: K) -> TaskHandle<()> {
        self.submit_op(move |cache| cache.unpin(&key))
    }

    pub fn is_pinned_async(self: &Arc<Self>, key: K) -> TaskHandle<bool> {
        self.submit_op(move |cache| cache.is_pinned(&key))
    }

    pub fn prefetch_async(self: &Arc<Self>, key: K, value: V) -> TaskHandle<()> {
        self.submit_op(move |cache| cache.prefetch(key, value))
    }

    pub fn statistics_async(self: &Arc<Self>) -> TaskHandle<CacheStatistics> {
        self.submit_op(Self::statistics)
    }

    pub fn hot_keys_async(self: &Arc<Self>, count: usize) -> TaskHandle<Vec<K>> {
        self.submit_op(move |cache| cache.hot_keys(count))
    }

    pub fn reset_statistics_async(self: &Arc<Self>) -> TaskHandle<()> {
        self.submit_op(Self::reset_statistics)
    }

    pub fn warm_up_async(self: &Arc<Self>, pairs: Vec<(K, V)>) -> TaskHandle<()> {
        self.submit_op(move |cache| cache.warm_up(pairs))
    }

    // ── Batch operations ────────────────────────────────────────────────

    /// Fan out one put per pair; results collect in input order.
    pub fn put_batch_async(self: &Arc<Self>, pairs: Vec<(K, V)>) -> TaskHandle<Vec<Result<()>>> {
        let handles = pairs
            .into_iter()
            .map(|(key, value)| self.put_async(key, value))
            .collect();
        join_all(handles)
    }

    /// Fan out one get per key; results collect in input order.
    pub fn get_batch_async(self: &Arc<Self>, keys: Vec<K>) -> TaskHandle<Vec<Result<Option<V>>>> {
        let handles = keys.into_iter().map(|key| self.get_async(key)).collect();
        join_all(handles)
    }

    /// Fan out one remove per key; results collect in input order.
    pub fn remove_batch_async(self: &Arc<Self>, keys: Vec<K>) -> TaskHandle<Vec<Result<()>>> {
        let handles = keys.into_iter().map(|key| self.remove_async(key)).collect();
        join_all(handles)
    }

    // ── Background loops ────────────────────────────────────────────────

    /// Start the optimization loop: periodically snapshots aggregate
    /// statistics for observability. Idempotent.
    pub fn start_background_optimization(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.optimizer.lock();
        if slot.is_some() {
            return;
        }
        let stop = Arc::new(StopFlag::new());
        let weak = Arc::downgrade(self);
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("mtfs-cache-opt".to_owned())
            .spawn(move || {
                while !flag.wait(interval) {
                    let Some(cache) = weak.upgrade() else {
                        break;
                    };
                    let stats = cache.statistics();
                    debug!(
                        hits = stats.hits,
                        misses = stats.misses,
                        hit_rate = stats.hit_rate(),
                        evictions = stats.evictions,
                        "optimization pass"
                    );
                }
            })
            .expect("spawn optimization loop");
        *slot = Some(BackgroundLoop { stop, handle });
        info!("background optimization started");
    }

    /// Stop the optimization loop. Idempotent.
    pub fn stop_background_optimization(&self) {
        if let Some(task) = self.optimizer.lock().take() {
            task.stop.trigger();
            let _ = task.handle.join();
            info!("background optimization stopped");
        }
    }

    /// Start the cleanup loop: every `interval`, drop unpinned entries
    /// idle for longer than `max_idle`. Idempotent.
    pub fn start_periodic_cleanup(self: &Arc<Self>, interval: Duration, max_idle: Duration) {
        let mut slot = self.cleaner.lock();
        if slot.is_some() {
            return;
        }
        let stop = Arc::new(StopFlag::new());
        let weak = Arc::downgrade(self);
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("mtfs-cache-clean".to_owned())
            .spawn(move || {
                while !flag.wait(interval) {
                    let Some(cache) = weak.upgrade() else {
                        break;
                    };
                    let mut dropped = 0_usize;
                    for shard in &cache.shards {
                        dropped += shard.write().evict_idle(max_idle);
                    }
                    if dropped > 0 {
                        debug!(dropped, "cleanup pass evicted idle entries");
                    }
                }
            })
            .expect("spawn cleanup loop");
        *slot = Some(BackgroundLoop { stop, handle });
        info!("periodic cleanup started");
    }

    /// Stop the cleanup loop. Idempotent.
    pub fn stop_periodic_cleanup(&self) {
        if let Some(task) = self.cleaner.lock().take() {
            task.stop.trigger();
            let _ = task.handle.join();
            info!("periodic cleanup stopped");
        }
    }
}

impl<K, V> Drop for ShardedCache<K, V> {
    fn drop(&mut self) {
        for slot in [&self.optimizer, &self.cleaner] {
            if let Some(task) = slot.lock().take() {
                task.stop.trigger();
                let _ = task.handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn test_cache(capacity: usize, shards: usize) -> Arc<ShardedCache<String, Vec<u8>>> {
        ShardedCache::new(
            capacity,
            EvictionPolicy::Lru,
            shards,
            Arc::new(WorkerPool::with_threads(4)),
        )
    }

    #[test]
    fn routing_is_deterministic() {
        let cache = test_cache(64, 8);
        let key = "var/log/app.txt".to_owned();
        let first = cache.shard_index(&key);
        for _ in 0..10 {
            assert_eq!(cache.shard_index(&key), first);
        }
    }

    #[test]
    fn put_get_roundtrip() {
        let cache = test_cache(64, 4);
        cache.put("a".into(), vec![1, 2, 3]);
        assert_eq!(cache.get(&"a".into()), Some(vec![1, 2, 3]));
        assert_eq!(cache.get(&"missing".into()), None);
        let stats = cache.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn clear_visits_every_shard() {
        let cache = test_cache(64, 4);
        for i in 0..32 {
            cache.put(format!("k{i}"), vec![i]);
        }
        assert_eq!(cache.len(), 32);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn policy_switch_applies_to_all_shards() {
        let cache = test_cache(64, 4);
        cache.put("a".into(), vec![1]);
        cache.set_policy(EvictionPolicy::Fifo);
        assert_eq!(cache.policy(), EvictionPolicy::Fifo);
        assert!(cache.is_empty());
    }

    #[test]
    fn async_ops_roundtrip() {
        let cache = test_cache(64, 4);
        cache
            .put_async("a".into(), vec![9])
            .join()
            .expect("put");
        let value = cache.get_async("a".into()).join().expect("get");
        assert_eq!(value, Some(vec![9]));
        let stats = cache.concurrent_stats();
        assert_eq!(stats.async_submitted, 2);
        assert_eq!(stats.async_completed, 2);
    }

    #[test]
    fn batch_results_follow_input_order() {
        let cache = test_cache(256, 8);
        let pairs: Vec<(String, Vec<u8>)> =
            (0..32_u8).map(|i| (format!("k{i}"), vec![i])).collect();
        cache
            .put_batch_async(pairs)
            .join()
            .expect("batch put")
            .into_iter()
            .for_each(|r| r.expect("item"));

        let keys: Vec<String> = (0..32_u8).map(|i| format!("k{i}")).collect();
        let got = cache.get_batch_async(keys).join().expect("batch get");
        for (i, item) in got.into_iter().enumerate() {
            let i = u8::try_from(i).expect("fits");
            assert_eq!(item.expect("item"), Some(vec![i]));
        }
    }

    #[test]
    fn parallel_writers_do_not_lose_keys() {
        let cache = test_cache(4096, 16);
        let threads = 8_usize;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..100 {
                        cache.put(format!("t{t}-{i}"), vec![1]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }
        assert_eq!(cache.len(), threads * 100);
    }

    #[test]
    fn pinned_keys_survive_pressure() {
        let cache = ShardedCache::new(
            4,
            EvictionPolicy::Lru,
            1,
            Arc::new(WorkerPool::with_threads(2)),
        );
        cache.put("keep".to_owned(), vec![1]);
        cache.pin(&"keep".to_owned());
        for i in 0..64 {
            cache.put(format!("fill{i}"), vec![0]);
        }
        assert!(cache.contains(&"keep".to_owned()));
        assert!(cache.is_pinned(&"keep".to_owned()));
    }

    #[test]
    fn background_loops_start_and_stop_idempotently() {
        let cache = test_cache(64, 2);
        cache.start_background_optimization(Duration::from_millis(10));
        cache.start_background_optimization(Duration::from_millis(10));
        cache.start_periodic_cleanup(Duration::from_millis(10), Duration::from_millis(1));
        cache.put("a".into(), vec![1]);
        thread::sleep(Duration::from_millis(40));
        cache.stop_background_optimization();
        cache.stop_background_optimization();
        cache.stop_periodic_cleanup();
        // Idle entry should have been cleaned.
        assert!(cache.is_empty());
    }

    #[test]
    fn hot_keys_aggregate_across_shards() {
        let cache = test_cache(256, 8);
        cache.put("hot".into(), vec![1]);
        cache.put("cold".into(), vec![2]);
        for _ in 0..5 {
            let _ = cache.get(&"hot".into());
        }
        let hot = cache.hot_keys(1);
        assert_eq!(hot, vec!["hot".to_owned()]);
    }
}
