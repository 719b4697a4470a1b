//! Last-in-first-out policy.
//!
//! Insertion order is a `Vec` used as a stack; the newest insertion is the
//! eviction victim. Popped-but-pinned keys are parked aside and restored
//! in their original order once a victim is found. Like FIFO, `remove`
//! leaves stale keys in the stack for eviction to skip.

use crate::{CacheEntry, CacheKey, CacheStatistics, EntryInfo, EvictionPolicy, PolicyCache, StatCounters};
use std::collections::{HashMap, HashSet};
use tracing::trace;

#[derive(Debug)]
pub struct LifoCache<K, V> {
    capacity: usize,
    /// Top of stack = newest insertion. May contain stale keys.
    stack: Vec<K>,
    entries: HashMap<K, CacheEntry<V>>,
    pinned: HashSet<K>,
    stats: StatCounters,
}

impl<K: CacheKey, V: Clone + Send> LifoCache<K, V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            stack: Vec::new(),
            entries: HashMap::new(),
            pinned: HashSet::new(),
            stats: StatCounters::new(),
        }
    }

    fn evict_one(&mut self) -> bool {
        let mut parked = Vec::new();
        let mut victim = None;
        while let Some(key) = self.stack.pop() {
            if !self.entries.contains_key(&key) {
                continue;
            }
            if self.pinned.contains(&key) {
                parked.push(key);
                continue;
            }
            victim = Some(key);
            break;
        }
        // Restore parked keys in their original stack order.
        for key in parked.into_iter().rev() {
            self.stack.push(key);
        }
        if let Some(key) = victim {
            let _ = self.entries.remove(&key);
            self.stats.record_eviction();
            trace!(event = "cache_evict", policy = "lifo", key = ?key);
            true
        } else {
            false
        }
    }

    fn insert_fresh(&mut self, key: K, value: V) {
        if self.entries.len() >= self.capacity {
            let _ = self.evict_one();
        }
        self.entries.insert(key.clone(), CacheEntry::new(value));
        self.stack.push(key);
    }
}

impl<K: CacheKey, V: Clone + Send> PolicyCache<K, V> for LifoCache<K, V> {
    fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::Lifo
    }

    fn put(&mut self, key: K, value: V) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            return;
        }
        if self.capacity == 0 {
            return;
        }
        self.insert_fresh(key, value);
    }

    fn get(&mut self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.touch();
            self.stats.record_hit();
            Some(entry.value.clone())
        } else {
            self.stats.record_miss();
            None
        }
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn remove(&mut self, key: &K) {
        let _ = self.entries.remove(key);
        let _ = self.pinned.remove(key);
    }

    fn clear(&mut self) {
        self.stack.clear();
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
    fn newest_insertion_is_evicted() {
        // Capacity 3; put A,B,C; put D -> C (newest before D) evicted.
        let mut cache = LifoCache::new(3);
        cache.put("A", 1);
        cache.put("B", 2);
        cache.put("C", 3);
        cache.put("D", 4);

        assert!(cache.contains(&"A"));
        assert!(cache.contains(&"B"));
        assert!(!cache.contains(&"C"));
        assert!(cache.contains(&"D"));
    }

    #[test]
    fn pinned_top_is_parked_and_restored() {
        let mut cache = LifoCache::new(2);
        cache.put("A", 1);
        cache.put("B", 2);
        cache.pin(&"B");
        cache.put("C", 3);
        // B (top) is pinned, so A loses; B stays below the new top C.
        assert!(!cache.contains(&"A"));
        assert!(cache.contains(&"B"));
        assert!(cache.contains(&"C"));

        // Next eviction should take C, proving the stack order survived
        // the parking round-trip.
        cache.put("D", 4);
        assert!(!cache.contains(&"C"));
        assert!(cache.contains(&"B"));
        assert!(cache.contains(&"D"));
    }

    #[test]
    fn reads_do_not_reorder() {
        let mut cache = LifoCache::new(2);
        cache.put("A", 1);
        cache.put("B", 2);
        let _ = cache.get(&"B");
        let _ = cache.get(&"B");
        cache.put("C", 3);
        // B is still the newest insertion and loses despite its reads.
        assert!(cache.contains(&"A"));
        assert!(!cache.contains(&"B"));
    }

    #[test]
    fn stale_stack_keys_are_skipped() {
        let mut cache = LifoCache::new(2);
        cache.put("A", 1);
        cache.put("B", 2);
        cache.remove(&"B");
        cache.put("C", 3);
        assert_eq!(cache.statistics().evictions, 0);
        cache.put("D", 4);
        // Stack top is D's predecessor C.
        assert!(!cache.contains(&"C"));
        assert!(cache.contains(&"A"));
    }

    #[test]
    fn all_pinned_runs_over_capacity() {
        let mut cache = LifoCache::new(2);
        cache.put("A", 1);
        cache.put("B", 2);
        cache.pin(&"A");
        cache.pin(&"B");
        cache.put("C", 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn zero_capacity_is_disabled() {
        let mut cache = LifoCache::new(0);
        cache.put("A", 1);
        assert!(cache.is_empty());
    }
}
