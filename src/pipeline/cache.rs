//! Sharded result cache keyed by series content and configuration.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

const DEFAULT_SHARDS: usize = 16;

/// SHA-256 digests of the series content and of the request configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub series_hash: String,
    pub config_hash: String,
}

impl CacheKey {
    pub fn new(series_hash: impl Into<String>, config_hash: impl Into<String>) -> Self {
        Self {
            series_hash: series_hash.into(),
            config_hash: config_hash.into(),
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: Arc<V>,
    inserted: Instant,
}

/// Concurrent cache of computed results.
///
/// Keys are spread over independently locked shards, so readers of one key
/// never wait on a writer of a key in another shard. Entries carry their
/// insertion time; staleness is decided by the caller's `max_age` on each
/// read, not by the cache.
#[derive(Debug)]
pub struct ResultCache<V> {
    shards: Vec<RwLock<HashMap<CacheKey, Entry<V>>>>,
}

impl<V> ResultCache<V> {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &CacheKey) -> &RwLock<HashMap<CacheKey, Entry<V>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// The cached value if it is younger than `max_age`.
    pub fn get(&self, key: &CacheKey, max_age: Duration) -> Option<Arc<V>> {
        let shard = self.shard(key).read().unwrap_or_else(|e| e.into_inner());
        shard
            .get(key)
            .filter(|entry| entry.inserted.elapsed() <= max_age)
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Store `value`, replacing any previous entry for `key`.
    pub fn insert(&self, key: CacheKey, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let entry = Entry {
            value: Arc::clone(&value),
            inserted: Instant::now(),
        };
        self.shard(&key)
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, entry);
        value
    }

    pub fn remove(&self, key: &CacheKey) -> Option<Arc<V>> {
        self.shard(key)
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .map(|entry| entry.value)
    }

    /// Drop entries older than `max_age`; returns how many were removed.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.write().unwrap_or_else(|e| e.into_inner());
                let before = shard.len();
                shard.retain(|_, entry| entry.inserted.elapsed() <= max_age);
                before - shard.len()
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }
}

impl<V> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(series: &str) -> CacheKey {
        CacheKey::new(series, "config")
    }

    #[test]
    fn insert_then_get() {
        let cache = ResultCache::new();
        cache.insert(key("a"), 42);
        assert_eq!(cache.get(&key("a"), Duration::from_secs(60)).as_deref(), Some(&42));
        assert!(cache.get(&key("b"), Duration::from_secs(60)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn config_is_part_of_the_key() {
        let cache = ResultCache::new();
        cache.insert(CacheKey::new("a", "x"), 1);
        assert!(cache.get(&CacheKey::new("a", "y"), Duration::from_secs(60)).is_none());
    }

    #[test]
    fn caller_decides_staleness() {
        let cache = ResultCache::new();
        cache.insert(key("a"), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&key("a"), Duration::from_millis(1)).is_none());
        assert!(cache.get(&key("a"), Duration::from_secs(60)).is_some());
        assert_eq!(cache.evict_older_than(Duration::from_millis(1)), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_writers_on_distinct_keys() {
        let cache = Arc::new(ResultCache::with_shards(4));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        cache.insert(key(&format!("{t}-{i}")), i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 400);
        cache.clear();
        assert!(cache.is_empty());
    }
}
