//! Session Cache - keyed store of materialized tables
//!
//! Constructed once per process and handed to whoever needs it. Entries never
//! expire and the map is unbounded.

use crate::error::{DataExpError, Result};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use polars::prelude::DataFrame;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub table: Arc<DataFrame>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // A panic while holding the lock cannot leave a half-written entry:
        // inserts replace whole values.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store an owned copy of `table`, replacing any entry at `key`.
    pub fn put(&self, key: &str, table: &DataFrame) -> CacheEntry {
        let entry = CacheEntry {
            key: key.to_string(),
            table: Arc::new(table.clone()),
            created_at: Utc::now(),
        };
        let replaced = self
            .lock()
            .insert(key.to_string(), entry.clone())
            .is_some();
        debug!(
            "Cached {} rows under '{}'{}",
            table.height(),
            key,
            if replaced { " (replaced)" } else { "" }
        );
        entry
    }

    pub fn get(&self, key: &str) -> Result<Arc<DataFrame>> {
        let entries = self.lock();
        match entries.get(key) {
            Some(entry) => Ok(Arc::clone(&entry.table)),
            None => {
                let known_keys: Vec<String> = entries.keys().cloned().sorted().collect();
                warn!("Cache miss for '{}'", key);
                Err(DataExpError::CacheMiss {
                    key: key.to_string(),
                    known_keys,
                })
            }
        }
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.lock().get(key).cloned()
    }

    /// Sorted keys
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().sorted().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.lock().remove(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use std::thread;

    fn table(n: i64) -> DataFrame {
        df!["n" => [n, n + 1]].unwrap()
    }

    #[test]
    fn test_put_then_get_returns_same_content() {
        let cache = SessionCache::new();
        cache.put("k", &table(1));
        assert!(cache.get("k").unwrap().equals_missing(&table(1)));
    }

    #[test]
    fn test_miss_lists_known_keys() {
        let cache = SessionCache::new();
        cache.put("b", &table(1));
        cache.put("a", &table(2));
        match cache.get("missing").unwrap_err() {
            DataExpError::CacheMiss { key, known_keys } => {
                assert_eq!(key, "missing");
                assert_eq!(known_keys, vec!["a", "b"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_miss_on_empty_cache_is_shaped() {
        let err = SessionCache::new().get("missing").unwrap_err();
        assert_eq!(
            err.to_sentinel()["error"],
            "No cached table for key 'missing'. Available keys: []"
        );
    }

    #[test]
    fn test_last_write_wins() {
        let cache = SessionCache::new();
        cache.put("k", &table(1));
        cache.put("k", &table(5));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("k").unwrap().equals_missing(&table(5)));
    }

    #[test]
    fn test_cached_copy_is_independent_of_source() {
        let cache = SessionCache::new();
        let mut source = table(1);
        cache.put("k", &source);
        source.rename("n", "renamed").unwrap();
        assert_eq!(cache.get("k").unwrap().get_column_names(), vec!["n"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = SessionCache::new();
        cache.put("a", &table(1));
        cache.put("b", &table(2));
        assert!(cache.remove("a").is_some());
        assert_eq!(cache.keys(), vec!["b"]);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_writers_do_not_corrupt_map() {
        let cache = Arc::new(SessionCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for j in 0..20 {
                        cache.put("shared", &table(i * 100 + j));
                        cache.put(&format!("own-{}", i), &table(i));
                        assert_eq!(cache.get("shared").unwrap().height(), 2);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 9);
    }
}
