//! Bounded LRU cache with a read-time TTL filter.
//!
//! Backs the embedding, sparse-weight and rerank caches. Entries are
//! promoted on read; a stale entry is treated as a miss and evicted at the
//! moment it is observed, so expiry needs no background sweeper.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Cache hit/miss counters, readable at any time.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Fixed-capacity, TTL'd, thread-safe LRU keyed by string.
pub struct TtlLru<V> {
    inner: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlLru<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh value, promoted; stale or absent counts as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();

        let fresh = match inner.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match fresh {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                inner.pop(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert, evicting the least-recently-used entry when full.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let mut inner = self.inner.lock();
        inner.put(
            key.into(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> TtlLru<i32> {
        TtlLru::new(capacity, Duration::from_secs(3600))
    }

    #[test]
    fn test_get_set() {
        let c = cache(10);
        assert_eq!(c.get("a"), None);
        c.set("a", 1);
        assert_eq!(c.get("a"), Some(1));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let c = cache(2);
        c.set("a", 1);
        c.set("b", 2);
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(c.get("a"), Some(1));
        c.set("c", 3);
        assert_eq!(c.get("b"), None);
        assert_eq!(c.get("a"), Some(1));
        assert_eq!(c.get("c"), Some(3));
    }

    #[test]
    fn test_ttl_expiry_is_a_miss_and_evicts() {
        let c: TtlLru<i32> = TtlLru::new(10, Duration::from_millis(0));
        c.set("a", 1);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(c.get("a"), None);
        assert_eq!(c.len(), 0, "stale entry evicted on read");
    }

    #[test]
    fn test_stats() {
        let c = cache(10);
        c.set("a", 1);
        c.get("a");
        c.get("missing");
        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_get_set() {
        let c = std::sync::Arc::new(cache(100));
        let mut handles = Vec::new();
        for t in 0..8 {
            let c = c.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    c.set(format!("k{}", i % 50), t * 1000 + i);
                    let _ = c.get(&format!("k{}", (i + 7) % 50));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(c.len() <= 100);
    }
}
