//! Least-frequently-used policy.
//!
//! Frequency buckets are a `BTreeMap` from access frequency to an
//! insertion-ordered queue of keys, alongside a key-to-frequency map and
//! the entry map. `min_frequency` tracks the smallest non-empty bucket so
//! eviction starts its scan there. Within a bucket the earliest-inserted
//! unpinned key loses.

use crate::{CacheEntry, CacheKey, CacheStatistics, EntryInfo, EvictionPolicy, PolicyCache, StatCounters};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::trace;

#[derive(Debug)]
pub struct LfuCache<K, V> {
    capacity: usize,
    /// frequency -> keys at that frequency, oldest first.
    buckets: BTreeMap<u64, VecDeque<K>>,
    freq_of: HashMap<K, u64>,
    entries: HashMap<K, CacheEntry<V>>,
    pinned: HashSet<K>,
    min_frequency: u64,
    stats: StatCounters,
}

impl<K: CacheKey, V: Clone + Send> LfuCache<K, V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buckets: BTreeMap::new(),
            freq_of: HashMap::new(),
            entries: HashMap::new(),
            pinned: HashSet::new(),
            min_frequency: 1,
            stats: StatCounters::new(),
        }
    }

    /// Smallest non-empty bucket; the eviction scan starts here.
    #[must_use]
    pub fn min_frequency(&self) -> u64 {
        self.min_frequency
    }

    /// Current frequency of a resident key.
    #[must_use]
    pub fn frequency(&self, key: &K) -> Option<u64> {
        self.freq_of.get(key).copied()
    }

    fn remove_from_bucket(&mut self, freq: u64, key: &K) {
        let mut emptied = false;
        if let Some(queue) = self.buckets.get_mut(&freq) {
            if let Some(pos) = queue.iter().position(|k| k == key) {
                let _ = queue.remove(pos);
            }
            emptied = queue.is_empty();
        }
        if emptied {
            let _ = self.buckets.remove(&freq);
        }
    }

    /// Move a key to the next-higher bucket, raising `min_frequency` when
    /// its bucket empties.
    fn bump(&mut self, key: &K) {
        let Some(freq) = self.freq_of.get(key).copied() else {
            return;
        };
        self.remove_from_bucket(freq, key);
        let next = freq + 1;
        self.buckets.entry(next).or_default().push_back(key.clone());
        let _ = self.freq_of.insert(key.clone(), next);
        if self.min_frequency == freq && !self.buckets.contains_key(&freq) {
            self.min_frequency = next;
        }
    }

    fn insert_fresh(&mut self, key: K, value: V) {
        self.entries.insert(key.clone(), CacheEntry::new(value));
        self.freq_of.insert(key.clone(), 1);
        self.buckets.entry(1).or_default().push_back(key);
        self.min_frequency = 1;
    }

    /// Evict the earliest-inserted unpinned key in the lowest bucket,
    /// scanning upward when a whole bucket is pinned.
    fn evict_one(&mut self) -> bool {
        let victim = self.buckets.iter().find_map(|(freq, queue)| {
            queue
                .iter()
                .find(|key| !self.pinned.contains(*key))
                .map(|key| (*freq, key.clone()))
        });
        let Some((freq, key)) = victim else {
            return false;
        };
        self.remove_from_bucket(freq, &key);
        let _ = self.freq_of.remove(&key);
        let _ = self.entries.remove(&key);
        self.stats.record_eviction();
        self.min_frequency = self.buckets.keys().next().copied().unwrap_or(1);
        trace!(event = "cache_evict", policy = "lfu", key = ?key, freq);
        true
    }
}

impl<K: CacheKey, V: Clone + Send> PolicyCache<K, V> for LfuCache<K, V> {
    fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::Lfu
    }

    fn put(&mut self, key: K, value: V) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            self.bump(&key);
            return;
        }
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            let _ = self.evict_one();
        }
        self.insert_fresh(key, value);
    }

    fn get(&mut self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.touch();
            let value = entry.value.clone();
            self.bump(key);
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
            if let Some(freq) = self.freq_of.remove(key) {
                self.remove_from_bucket(freq, key);
            }
            self.min_frequency = self.buckets.keys().next().copied().unwrap_or(1);
        }
        let _ = self.pinned.remove(key);
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.freq_of.clear();
        self.entries.clear();
        self.pinned.clear();
        self.min_frequency = 1;
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
            self.insert_fresh(key, value);
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

    #[test]
    fn frequency_eviction() {
        // Capacity 2; put 1,2; get 1 twice, get 2 once; put 3 -> 2 evicted.
        let mut cache = LfuCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&2), Some("b"));
        cache.put(3, "c");

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
        assert_eq!(cache.min_frequency(), 1);
        assert_eq!(cache.statistics().evictions, 1);
    }

    #[test]
    fn frequency_strictly_increases_on_get() {
        let mut cache = LfuCache::new(4);
        cache.put(1, "a");
        assert_eq!(cache.frequency(&1), Some(1));
        let _ = cache.get(&1);
        assert_eq!(cache.frequency(&1), Some(2));
        let _ = cache.get(&1);
        assert_eq!(cache.frequency(&1), Some(3));
    }

    #[test]
    fn put_update_bumps_frequency() {
        let mut cache = LfuCache::new(4);
        cache.put(1, "a");
        cache.put(1, "a2");
        assert_eq!(cache.frequency(&1), Some(2));
        assert_eq!(cache.statistics().hits, 0);
    }

    #[test]
    fn insertion_order_breaks_frequency_ties() {
        let mut cache = LfuCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        // Both at frequency 1; the older insert (1) loses.
        cache.put(3, "c");
        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
    }

    #[test]
    fn min_frequency_never_exceeds_resident_minimum() {
        let mut cache = LfuCache::new(3);
        cache.put(1, "a");
        cache.put(2, "b");
        let _ = cache.get(&1);
        let _ = cache.get(&1);
        let min_resident = cache
            .keys()
            .iter()
            .filter_map(|k| cache.frequency(k))
            .min()
            .expect("resident keys");
        assert!(cache.min_frequency() <= min_resident);
    }

    #[test]
    fn pinned_low_frequency_key_is_skipped() {
        let mut cache = LfuCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        let _ = cache.get(&2); // 2 is now warmer than 1
        cache.pin(&1);
        cache.put(3, "c");
        // 1 is the LFU victim but pinned; 2 loses instead.
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn remove_purges_bucket_state() {
        let mut cache = LfuCache::new(2);
        cache.put(1, "a");
        let _ = cache.get(&1);
        cache.remove(&1);
        assert_eq!(cache.frequency(&1), None);
        cache.put(2, "b");
        cache.put(3, "c");
        cache.put(4, "d");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_is_disabled() {
        let mut cache = LfuCache::new(0);
        cache.put(1, "a");
        cache.prefetch(2, "b");
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn all_pinned_runs_over_capacity() {
        let mut cache = LfuCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.pin(&1);
        cache.pin(&2);
        cache.put(3, "c");
        assert_eq!(cache.len(), 3);
    }
}
