//! High-Performance In-Memory Cache Module
//!
//! Bounded TTL cache shared by concurrent scans. Reads go straight to a
//! `DashMap`; inserts that may evict are serialized so the size bound holds.
//!
//! Features:
//! - TTL-based expiration, checked on read
//! - Capacity bound: when full, the entry inserted longest ago is evicted,
//!   regardless of remaining TTL (reads do not refresh age)
//! - HIT/MISS/EVICT counters

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::utils::constants::{DEFAULT_CACHE_MAX_SIZE, DEFAULT_CACHE_TTL_SECS};

/// Cache entry with insertion time and insertion sequence
#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    /// Monotonic insertion order; ties on `created_at` resolve by this
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Bounded key -> value store with TTL expiry
#[derive(Clone)]
pub struct TtlCache<V: Clone> {
    store: Arc<DashMap<String, CacheEntry<V>>>,
    /// Serializes evict-then-insert
    write_lock: Arc<Mutex<()>>,
    max_size: usize,
    ttl: Duration,
    next_seq: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    evictions: Arc<AtomicU64>,
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(
            DEFAULT_CACHE_MAX_SIZE,
            Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        )
    }
}

impl<V: Clone> TtlCache<V> {
    /// `max_size` of zero is treated as one
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            write_lock: Arc::new(Mutex::new(())),
            max_size: max_size.max(1),
            ttl,
            next_seq: Arc::new(AtomicU64::new(0)),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Value for `key` if present and younger than the TTL.
    /// Expired entries are removed on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.store.get(key) {
            if entry.is_expired(self.ttl) {
                drop(entry); // Release read lock
                let ttl = self.ttl;
                self.store.remove_if(key, |_, e| e.is_expired(ttl));
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("📭 CACHE MISS (expired): {}", key);
                None
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("✅ CACHE HIT: {}", key);
                Some(entry.value.clone())
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("📭 CACHE MISS: {}", key);
            None
        }
    }

    /// Insert or overwrite. Evicts the oldest entry first when a new key
    /// would push the cache past capacity.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        if !self.store.contains_key(&key) {
            while self.store.len() >= self.max_size {
                if !self.evict_oldest() {
                    break;
                }
            }
        }

        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.store.insert(key.clone(), entry);
        debug!("💾 CACHE SET: {} (TTL: {}s)", key, self.ttl.as_secs());
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .store
            .iter()
            .min_by_key(|e| (e.value().created_at, e.value().seq))
            .map(|e| e.key().clone());

        match oldest {
            Some(key) => {
                self.store.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("🗑️ CACHE EVICT (capacity): {}", key);
                true
            }
            None => false,
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.store.remove(key);
        debug!("🗑️ CACHE INVALIDATE: {}", key);
    }

    /// Drop every expired entry, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let before = self.store.len();
        let ttl = self.ttl;
        self.store.retain(|_, entry| !entry.is_expired(ttl));
        before.saturating_sub(self.store.len())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            entries: self.store.len(),
            max_size: self.max_size,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
            ttl_secs: self.ttl.as_secs(),
        }
    }

    pub fn clear(&self) {
        self.store.clear();
        debug!("🗑️ CACHE CLEARED");
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub ttl_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, ttl_ms: u64) -> TtlCache<u32> {
        TtlCache::new(max_size, Duration::from_millis(ttl_ms))
    }

    #[test]
    fn test_cache_set_get() {
        let cache = cache(10, 60_000);
        cache.set("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        cache.set("a", 2);
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_miss() {
        let cache = cache(10, 60_000);
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = cache(10, 40);
        cache.set("a", 1);
        assert_eq!(cache.get("a"), Some(1));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("a"), None);
        // expired entry was evicted by the read
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_bounded_size_evicts_oldest() {
        let cache = cache(3, 60_000);
        cache.set("k1", 1);
        cache.set("k2", 2);
        cache.set("k3", 3);
        // reading k1 must not refresh its age
        assert_eq!(cache.get("k1"), Some(1));
        cache.set("k4", 4);

        assert_eq!(cache.len(), 3);
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.get("k2"), Some(2));
        assert_eq!(cache.get("k4"), Some(4));

        for i in 5..50 {
            cache.set(format!("k{}", i), i);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.get("k49"), Some(49));
        assert_eq!(cache.get("k47"), Some(47));
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = cache(2, 60_000);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = cache(10, 30);
        cache.set("a", 1);
        cache.set("b", 2);
        std::thread::sleep(Duration::from_millis(50));
        cache.set("c", 3);
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_concurrent_writers_respect_bound() {
        let cache = cache(16, 60_000);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        cache.set(format!("t{}-{}", t, i), i);
                        let _ = cache.get(&format!("t{}-{}", t, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 16);
    }

    #[test]
    fn test_cache_stats() {
        let cache = cache(10, 60_000);
        cache.set("a", 1);
        cache.get("a");
        cache.get("nope");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 50.0);
    }
}
