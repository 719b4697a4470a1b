//! First-in-first-out policy.
//!
//! Insertion order is a `VecDeque` of keys; reads never re-order. `remove`
//! leaves the queue untouched, so eviction skips keys that are no longer
//! resident. A popped pinned key is discarded from the queue rather than
//! re-queued, so pinned entries never reappear at the head.

use crate::{CacheEntry, CacheKey, CacheStatistics, EntryInfo, EvictionPolicy, PolicyCache, StatCounters};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::trace;

#[derive(Debug)]
pub struct FifoCache<K, V> {
    capacity: usize,
    /// Front = oldest insertion. May contain stale keys after `remove`.
    queue: VecDeque<K>,
    entries: HashMap<K, CacheEntry<V>>,
    pinned: HashSet<K>,
    stats: StatCounters,
}

impl<K: CacheKey, V: Clone + Send> FifoCache<K, V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
            entries: HashMap::new(),
            pinned: HashSet::new(),
            stats: StatCounters::new(),
        }
    }

    fn evict_one(&mut self) -> bool {
        while let Some(key) = self.queue.pop_front() {
            if !self.entries.contains_key(&key) {
                // Stale: removed earlier without purging the queue.
                continue;
            }
            if self.pinned.contains(&key) {
                continue;
            }
            let _ = self.entries.remove(&key);
            self.stats.record_eviction();
            trace!(event = "cache_evict", policy = "fifo", key = ?key);
            return true;
        }
        false
    }

    fn insert_fresh(&mut self, key: K, value: V) {
        if self.entries.len() >= self.capacity {
            let _ = self.evict_one();
        }
        self.entries.insert(key.clone(), CacheEntry::new(value));
        self.queue.push_back(key);
    }
}

impl<K: CacheKey, V: Clone + Send> PolicyCache<K, V> for FifoCache<K, V> {
    fn policy(&self) -> EvictionPolicy {
        EvictionPolicy::Fifo
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
        self.queue.clear();
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
