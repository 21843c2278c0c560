//! The two-layer cache.
//!
//! A bean cache keyed by primary-key value and a query cache keyed by a
//! fingerprint of (SQL text, parameter values, projection shape). Both are
//! bounded LRU maps with expire-after-write stamps. Invalidation is
//! deliberately coarse on the query side: any write clears it.

use datamap_core::Value;
use lru::LruCache;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cache settings, shared by both layers.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entries per layer.
    pub maximum_size: usize,
    /// Entry lifetime from write.
    pub expire_after_write: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            maximum_size: 1024,
            expire_after_write: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Build a config with the given size and TTL.
    pub fn new(maximum_size: usize, expire_after_write: Duration) -> Self {
        Self {
            maximum_size,
            expire_after_write,
        }
    }
}

struct Entry<T> {
    value: T,
    written: Instant,
}

/// Fingerprint a query: SQL template, bound values and projection shape.
pub(crate) fn fingerprint(sql: &str, params: &[Value], shape: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    sql.hash(&mut hasher);
    shape.hash(&mut hasher);
    for param in params {
        param.lookup_key().hash(&mut hasher);
    }
    hasher.finish()
}

/// Per-handle cache layer.
pub(crate) struct CacheLayer<E> {
    ttl: Duration,
    beans: Mutex<LruCache<String, Entry<E>>>,
    queries: Mutex<LruCache<u64, Entry<Vec<E>>>>,
}

impl<E: Clone> CacheLayer<E> {
    pub(crate) fn new(config: &CacheConfig) -> Self {
        let capacity =
            NonZeroUsize::new(config.maximum_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl: config.expire_after_write,
            beans: Mutex::new(LruCache::new(capacity)),
            queries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub(crate) fn get_bean(&self, key: &str) -> Option<E> {
        let mut beans = self.beans.lock().unwrap_or_else(|e| e.into_inner());
        match beans.get(key) {
            Some(entry) if entry.written.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                beans.pop(key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn put_bean(&self, key: String, value: E) {
        self.beans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(
                key,
                Entry {
                    value,
                    written: Instant::now(),
                },
            );
    }

    pub(crate) fn get_query(&self, key: u64) -> Option<Vec<E>> {
        let mut queries = self.queries.lock().unwrap_or_else(|e| e.into_inner());
        match queries.get(&key) {
            Some(entry) if entry.written.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                queries.pop(&key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn put_query(&self, key: u64, value: Vec<E>) {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(
                key,
                Entry {
                    value,
                    written: Instant::now(),
                },
            );
    }

    /// `insert`: the bean cache is untouched, the query cache clears.
    pub(crate) fn on_insert(&self) {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Single-row write: evict that bean, clear the query cache.
    pub(crate) fn on_single_write(&self, pk: &Value) {
        self.beans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop(&pk.lookup_key());
        self.on_insert();
    }

    /// Bulk or raw write: clear both layers.
    pub(crate) fn on_bulk_write(&self) {
        self.beans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.on_insert();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> CacheLayer<i32> {
        CacheLayer::new(&CacheConfig::new(4, Duration::from_secs(60)))
    }

    #[test]
    fn bean_round_trip_and_eviction() {
        let cache = layer();
        cache.put_bean("t:u".into(), 1);
        assert_eq!(cache.get_bean("t:u"), Some(1));
        cache.on_single_write(&Value::Text("u".into()));
        assert_eq!(cache.get_bean("t:u"), None);
    }

    #[test]
    fn insert_clears_queries_not_beans() {
        let cache = layer();
        cache.put_bean("t:u".into(), 1);
        cache.put_query(9, vec![1, 2]);
        cache.on_insert();
        assert_eq!(cache.get_bean("t:u"), Some(1));
        assert_eq!(cache.get_query(9), None);
    }

    #[test]
    fn bulk_write_clears_everything() {
        let cache = layer();
        cache.put_bean("t:u".into(), 1);
        cache.put_query(9, vec![1]);
        cache.on_bulk_write();
        assert_eq!(cache.get_bean("t:u"), None);
        assert_eq!(cache.get_query(9), None);
    }

    #[test]
    fn expired_entries_miss() {
        let cache = CacheLayer::new(&CacheConfig::new(4, Duration::from_nanos(1)));
        cache.put_bean("t:u".into(), 1);
        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(cache.get_bean("t:u"), None);
    }

    #[test]
    fn fingerprints_differ_on_params_and_shape() {
        let a = fingerprint("SELECT 1", &[Value::Int(1)], "entity");
        let b = fingerprint("SELECT 1", &[Value::Int(2)], "entity");
        let c = fingerprint("SELECT 1", &[Value::Int(1)], "page");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, fingerprint("SELECT 1", &[Value::Int(1)], "entity"));
    }
}
