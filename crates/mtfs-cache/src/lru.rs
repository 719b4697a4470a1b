//! Least-recently-used policy.
//!
//! Recency is a `VecDeque` of keys (front = coldest, back = most recent)
//! plus a key-to-entry map. Eviction pops the front; a pinned front key is
//! rotated to the back and the scan continues, so pinned entries never
//! leave and an all-pinned cache refuses to shrink.

use crate::{CacheEntry, CacheKey, CacheStatistics, EntryInfo, EvictionPolicy, PolicyCache, StatCounters};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::trace;

#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    /// Front = least recently used, back = most recently used.
    order: VecDeque<K>,
    entries: HashMap<K, CacheEntry<V>>,
    pinned: HashSet<K>,
    stats: StatCounters,
}

impl<K: CacheKey, V: Clone + Send> LruCache<K, V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
            pinned: HashSet::new(),
            stats: StatCounters::new(),
        }
    }

    fn move_to_back(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let _ = self.order.remove(pos);
        }
        self.order.push_back(key.clone());
    }

    /// Evict the coldest unpinned entry. Pinned keys rotate to the back;
    /// the scan bails out once every resident key has been considered.
    fn evict_one(&mut self) -> bool {
        let mut attempts = self.order.len();
        while attempts > 0 {
            attempts -= 1;
            let Some(key) = self.order.pop_front() else {
                return false;
            };
            if !self.entries.contains_key(&key) {
                continue;
            }
            if self.pinned.contains(&key) {
                self.order.push_back(key);
                continue;
            }
            let _ = self.entries.remove(&key);
            self.stats.record_eviction();
            trace!(event = "cache_evict", policy = "lru", key = ?key);
            return true;
        }
        false
    }
}

impl<K: CacheKey, V: Clone + Send> PolicyCache<K, V> for LruCache<K, V> {
    fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::Lru
    }

    fn put(&mut self, key: K, value: V) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            self.move_to_back(&key);
            return;
        }
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            let _ = self.evict_one();
        }
        self.entries.insert(key.clone(), CacheEntry::new(value));
        self.order.push_back(key);
    }

    fn get(&mut self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.touch();
            let value = entry.value.clone();
            self.move_to_back(key);
            self.stats.record_hit();
            Some(value)
        } else {
            self.stats.record_miss();
            None
        }
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn remove(&mut self, key: &K) {
        if self.entries.remove(key).is_some() {
            if let Some(pos) = self.order.iter().position(|k| k == key) {
                let _ = self.order.remove(pos);
            }
        }
        let _ = self.pinned.remove(key);
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
        self.pinned.clear();
    }

    fn pin(&mut self, key: &K) {
        if self.entries.contains_key(key) {
            let _ = self.pinned.insert(key.clone());
        }
    }

    fn unpin(&mut self, key: &K) {
        let _ = self.pinned.remove(key);
    }

    fn is_pinned(&self, key: &K) -> bool {
        self.pinned.contains(key)
    }

    fn prefetch(&mut self, key: K, value: V) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
        } else {
            if self.capacity == 0 {
                return;
            }
            if self.entries.len() >= self.capacity {
                let _ = self.evict_one();
            }
            self.entries.insert(key.clone(), CacheEntry::new(value));
            self.order.push_back(key);
        }
        self.stats.record_prefetch();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    fn entries(&self) -> Vec<EntryInfo<K>> {
        self.entries
            .iter()
            .map(|(key, entry)| EntryInfo {
                key: key.clone(),
                access_count: entry.access_count,
                last_accessed: entry.last_accessed,
                age: entry.created_at.elapsed(),
                pinned: self.pinned.contains(key),
            })
            .collect()
    }

    fn statistics(&self) -> CacheStatistics {
        self.stats.snapshot(self.pinned.len())
    }

    fn reset_statistics(&mut self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resident(cache: &LruCache<u32, &'static str>) -> Vec<u32> {
        let mut keys = cache.keys();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn recency_eviction() {
        // Capacity 3; put 1,2,3; get 1; put 4 -> 2 evicted, 1 kept warm.
        let mut cache = LruCache::new(3);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.put(3, "c");
        assert_eq!(cache.get(&1), Some("a"));
        cache.put(4, "d");

        assert_eq!(resident(&cache), vec![1, 3, 4]);
        let stats = cache.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn put_update_refreshes_recency() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.put(1, "a2");
        cache.put(3, "c");
        // 2 was coldest after the update touched 1.
        assert_eq!(resident(&cache), vec![1, 3]);
        assert_eq!(cache.get(&1), Some("a2"));
    }

    #[test]
    fn pinned_entry_survives_eviction() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.pin(&1);
        cache.put(3, "c");
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn all_pinned_cache_runs_over_capacity() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.pin(&1);
        cache.pin(&2);
        cache.put(3, "c");
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
    }

    #[test]
    fn zero_capacity_is_disabled() {
        let mut cache = LruCache::new(0);
        cache.put(1, "a");
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.statistics().misses, 1);
    }

    #[test]
    fn capacity_one_always_displaces() {
        let mut cache = LruCache::new(1);
        cache.put(1, "a");
        cache.put(2, "b");
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
    }

    #[test]
    fn remove_is_idempotent_and_unpins() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        cache.pin(&1);
        cache.remove(&1);
        cache.remove(&1);
        assert!(!cache.contains(&1));
        assert!(!cache.is_pinned(&1));
        assert_eq!(cache.statistics().pinned_items, 0);
    }

    #[test]
    fn pin_requires_residency() {
        let mut cache: LruCache<i32, &str> = LruCache::new(2);
        cache.pin(&9);
        assert!(!cache.is_pinned(&9));
        cache.unpin(&9); // no-op
    }

    #[test]
    fn prefetch_counts_separately() {
        let mut cache = LruCache::new(2);
        cache.prefetch(1, "a");
        let stats = cache.statistics();
        assert_eq!(stats.prefetched_items, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(cache.get(&1), Some("a"));
    }

    #[test]
    fn clear_drops_entries_but_not_counters() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        let _ = cache.get(&1);
        cache.clear();
        cache.clear(); // clear; clear == clear
        assert!(cache.is_empty());
        assert_eq!(cache.statistics().hits, 1);
    }

    #[test]
    fn stats_law_holds() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        let _ = cache.get(&1);
        let _ = cache.get(&2);
        let _ = cache.get(&3);
        let stats = cache.statistics();
        assert_eq!(stats.hits + stats.misses, stats.total_accesses);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }
}
