//! Node result caching.
//!
//! Provides an LRU cache with TTL expiration for fetched search results,
//! keyed by resource type and fully resolved search parameters. Only
//! successful fetches are cached; aggregations are recomputed on every hit.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use fhir_plan::SearchParams;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::CacheConfig;

/// Everything a successful fetch produced, before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFetch {
    /// First raw response.
    pub raw: Option<Value>,
    /// Records of every fetched page.
    pub records: Vec<Value>,
    /// `search.mode` of each record, parallel to `records`.
    pub search_modes: Vec<Option<String>>,
    /// Total reported by the service.
    pub total: Option<usize>,
    /// Number of responses fetched (first page included).
    pub pages: usize,
}

/// A cached fetch with expiration tracking.
#[derive(Debug, Clone)]
struct CacheEntry {
    fetch: CachedFetch,
    created_at: Instant,
}

impl CacheEntry {
    fn new(fetch: CachedFetch) -> Self {
        Self {
            fetch,
            created_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Thread-safe LRU cache with TTL expiration for node results.
///
/// # Example
///
/// ```rust
/// use fhir_plan_executor::{cache_key, CacheConfig, CachedFetch, QueryCache};
/// use fhir_plan::SearchParams;
///
/// let cache = QueryCache::new(CacheConfig::default());
/// let mut params = SearchParams::new();
/// params.insert("code".to_string(), "8867-4".to_string());
/// let key = cache_key("Observation", &params);
///
/// cache.set(key.clone(), CachedFetch { raw: None, records: vec![], search_modes: vec![], total: Some(0), pages: 1 });
/// assert!(cache.get(&key).is_some());
/// ```
pub struct QueryCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl QueryCache {
    /// Creates a new query cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_capacity(config.max_entries, config.ttl)
    }

    /// Creates a cache with custom capacity and TTL.
    ///
    /// A capacity of zero is treated as one.
    pub fn with_capacity(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Gets a cached fetch by key.
    ///
    /// Expired entries are dropped and reported as misses. A hit promotes the
    /// entry to most-recently-used.
    pub fn get(&self, key: &str) -> Option<CachedFetch> {
        let mut cache = self.inner.lock();
        let expired = match cache.get(key) {
            Some(entry) if !entry.is_expired(self.ttl) => return Some(entry.fetch.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key);
        }
        None
    }

    /// Stores a fetch, evicting the least recently used entry when full.
    pub fn set(&self, key: String, fetch: CachedFetch) {
        self.inner.lock().put(key, CacheEntry::new(fetch));
    }

    /// Checks if a key exists (without affecting LRU order or expiry).
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains(key)
    }

    /// Returns the number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all entries.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Removes expired entries.
    pub fn cleanup_expired(&self) {
        let mut cache = self.inner.lock();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            cache.pop(&key);
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Builds the cache key for a resolved search.
///
/// Parameters are already sorted by name, so equal searches always map to
/// the same key: `Type?name=value&name=value`.
pub fn cache_key(resource_type: &str, params: &SearchParams) -> String {
    let query: Vec<String> = params
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect();
    format!("{}?{}", resource_type, query.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn fetch_of(ids: &[&str]) -> CachedFetch {
        CachedFetch {
            raw: None,
            records: ids
                .iter()
                .map(|id| json!({ "resourceType": "Patient", "id": id }))
                .collect(),
            search_modes: vec![None; ids.len()],
            total: Some(ids.len()),
            pages: 1,
        }
    }

    fn create_test_cache(max_entries: usize, ttl_secs: u64) -> QueryCache {
        QueryCache::with_capacity(max_entries, Duration::from_secs(ttl_secs))
    }

    #[test]
    fn test_cache_set_get() {
        let cache = create_test_cache(100, 300);
        cache.set("k".to_string(), fetch_of(&["a", "b"]));

        let cached = cache.get("k").unwrap();
        assert_eq!(cached, fetch_of(&["a", "b"]));
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = create_test_cache(2, 300);
        cache.set("key1".to_string(), fetch_of(&["1"]));
        cache.set("key2".to_string(), fetch_of(&["2"]));

        let _ = cache.get("key1");
        cache.set("key3".to_string(), fetch_of(&["3"]));

        assert!(cache.get("key1").is_some());
        assert!(cache.get("key2").is_none());
        assert!(cache.get("key3").is_some());
    }

    #[test]
    fn test_ttl_expiration() {
        let cache = QueryCache::with_capacity(100, Duration::from_millis(50));
        cache.set("expires".to_string(), fetch_of(&["1"]));
        assert!(cache.get("expires").is_some());

        thread::sleep(Duration::from_millis(100));

        assert!(cache.get("expires").is_none());
        assert!(!cache.contains("expires"));
    }

    #[test]
    fn test_cleanup_expired() {
        let cache = QueryCache::with_capacity(100, Duration::from_millis(50));
        cache.set("a".to_string(), fetch_of(&["1"]));
        cache.set("b".to_string(), fetch_of(&["2"]));
        assert_eq!(cache.len(), 2);

        thread::sleep(Duration::from_millis(100));
        cache.cleanup_expired();

        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_and_min_capacity() {
        let cache = create_test_cache(0, 300);
        cache.set("a".to_string(), fetch_of(&["1"]));
        cache.set("b".to_string(), fetch_of(&["2"]));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(create_test_cache(1000, 300));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..10 {
                        let key = format!("t{}_{}", t, i);
                        cache.set(key.clone(), fetch_of(&["x"]));
                        assert!(cache.get(&key).is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }
        assert_eq!(cache.len(), 80);
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let mut a = SearchParams::new();
        a.insert("subject".to_string(), "Patient/1".to_string());
        a.insert("code".to_string(), "8867-4".to_string());

        let mut b = SearchParams::new();
        b.insert("code".to_string(), "8867-4".to_string());
        b.insert("subject".to_string(), "Patient/1".to_string());

        assert_eq!(cache_key("Observation", &a), cache_key("Observation", &b));
        assert_eq!(
            cache_key("Observation", &a),
            "Observation?code=8867-4&subject=Patient/1"
        );
        assert_ne!(cache_key("Condition", &a), cache_key("Observation", &a));
    }

    #[test]
    fn test_cache_debug() {
        let cache = create_test_cache(10, 300);
        let debug = format!("{:?}", cache);
        assert!(debug.contains("QueryCache"));
        assert!(debug.contains("entries"));
    }
}
