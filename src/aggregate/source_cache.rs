// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-source result cache
//!
//! Each aggregator source keeps its own bounded TTL cache so repeated
//! lookups of the same building do not hit the network.
//!
//! ```text
//! lookup(key)
//!       │
//!       ├─→ present + younger than TTL → hit
//!       │
//!       └─→ absent OR expired → miss (expired entry dropped)
//! ```
//!
//! Negative results (`None` values) are cached like any other value.
//! Bounded by max entries with oldest-first eviction.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

pub struct SourceCache<K, V> {
    name: &'static str,
    entries: DashMap<K, CacheEntry<V>>,
    /// Insertion order for eviction (oldest first)
    order: Mutex<VecDeque<K>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Lookups that found an entry past its TTL
    pub expired: u64,
    pub entry_count: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

impl<K, V> SourceCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration, max_entries: usize) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.entries.get(key) {
            if entry.stored_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_source_cache(self.name, true);
                return Some(entry.value.clone());
            }
            self.expired.fetch_add(1, Ordering::Relaxed);
            drop(entry); // Release read lock before removing
            self.remove(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_source_cache(self.name, false);
        None
    }

    /// Every key in `entries` appears in `order` exactly once. Both are
    /// mutated under the `order` lock.
    pub fn insert(&self, key: K, value: V) {
        let mut order = self.order.lock();
        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.max_entries {
                match order.pop_front() {
                    Some(old) => {
                        self.entries.remove(&old);
                    }
                    None => break,
                }
            }
            order.push_back(key.clone());
        }

        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
        };
        self.entries.insert(key, entry);
    }

    pub fn remove(&self, key: &K) {
        let mut order = self.order.lock();
        if self.entries.remove(key).is_some() {
            order.retain(|k| k != key);
        }
    }

    pub fn clear(&self) {
        let mut order = self.order.lock();
        self.entries.clear();
        order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> SourceCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        SourceCacheStats {
            hits,
            misses,
            expired: self.expired.load(Ordering::Relaxed),
            entry_count: self.entries.len(),
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache: SourceCache<&str, u32> = SourceCache::new("test", Duration::from_secs(60), 10);
        cache.insert("a", 1);

        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired, 1);
    }

    #[tokio::test]
    async fn test_negative_results_are_cached() {
        let cache: SourceCache<(u32, u32), Option<String>> =
            SourceCache::new("certificate", Duration::from_secs(60), 10);
        cache.insert((1, 2), None);

        assert_eq!(cache.get(&(1, 2)), Some(None));
        assert_eq!(cache.get(&(1, 3)), None);
    }

    #[tokio::test]
    async fn test_oldest_evicted_at_capacity() {
        let cache: SourceCache<u32, u32> = SourceCache::new("test", Duration::from_secs(60), 2);
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.insert(3, 30);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(cache.get(&3), Some(30));
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache: SourceCache<u32, u32> = SourceCache::new("test", Duration::from_secs(60), 2);
        cache.insert(1, 10);
        cache.insert(2, 20);
        cache.insert(2, 21);

        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&2), Some(21));
    }

    #[tokio::test]
    async fn test_insert_remove_cycles_keep_order_bounded() {
        let cache: SourceCache<u32, u32> = SourceCache::new("test", Duration::from_secs(60), 4);
        for i in 0..100 {
            cache.insert(7, i);
            cache.remove(&7);
        }

        assert!(cache.is_empty());
        assert!(cache.order.lock().is_empty());
    }

    #[tokio::test]
    async fn test_removed_key_does_not_evict_reinserted_key() {
        let cache: SourceCache<&str, u32> = SourceCache::new("test", Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.remove(&"a");
        cache.insert("b", 2);
        cache.insert("a", 3);
        cache.insert("c", 4);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(3));
        assert_eq!(cache.get(&"c"), Some(4));
        assert_eq!(cache.order.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_leave_eviction_order() {
        let cache: SourceCache<u32, u32> = SourceCache::new("test", Duration::from_secs(60), 2);
        for round in 0..50 {
            cache.insert(1, round);
            tokio::time::advance(Duration::from_secs(61)).await;
            assert_eq!(cache.get(&1), None);
        }
        cache.insert(2, 20);
        cache.insert(3, 30);

        assert_eq!(cache.order.lock().len(), 2);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(cache.get(&3), Some(30));
    }

    #[tokio::test]
    async fn test_hit_rate() {
        let cache: SourceCache<u32, u32> = SourceCache::new("test", Duration::from_secs(60), 4);
        cache.insert(1, 1);
        cache.get(&1);
        cache.get(&2);

        assert!((cache.stats().hit_rate - 0.5).abs() < f64::EPSILON);
        cache.clear();
        assert_eq!(cache.stats().entry_count, 0);
    }
}
