//! Response cache - memoize fetched documents and rate tables
//!
//! The cache is an explicit handle: it is created by whoever assembles the
//! pipeline and handed to every pipe through [`Services`]. Clones share the
//! same entries. Nothing is persisted.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::PipeResult;

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    stored_at: Instant,
}

/// In-memory TTL cache shared across pipes
#[derive(Debug, Clone)]
pub struct ResponseCache {
    /// Loaded entries (key -> value)
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResponseCache {
    /// Create an empty cache whose entries expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a live entry by key
    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.lock();
        entries
            .get(key)
            .filter(|e| e.stored_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    /// Store a value, replacing any previous entry
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(
            key.into(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Return the live entry for `key`, or compute, store and return it.
    ///
    /// The lock is not held while `fetch` runs; two callers racing on the
    /// same key may both fetch, and the last one stored wins.
    pub fn get_or_try_insert_with<F>(&self, key: &str, fetch: F) -> PipeResult<Value>
    where
        F: FnOnce() -> PipeResult<Value>,
    {
        if let Some(hit) = self.get(key) {
            debug!(key, "cache hit");
            return Ok(hit);
        }

        debug!(key, "cache miss");
        let value = fetch()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared handles injected into every built pipe
#[derive(Debug, Clone, Default)]
pub struct Services {
    pub cache: ResponseCache,
}

impl Services {
    pub fn new(cache: ResponseCache) -> Self {
        Self { cache }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipeError;
    use serde_json::json;

    #[test]
    fn test_clones_share_entries() {
        let cache = ResponseCache::default();
        let other = cache.clone();
        cache.insert("rates", json!({"EUR": 0.9}));
        assert_eq!(other.get("rates"), Some(json!({"EUR": 0.9})));
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_get_or_try_insert_fetches_once() {
        let cache = ResponseCache::default();
        let mut calls = 0;
        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with("doc", || {
                    calls += 1;
                    Ok(json!([1, 2, 3]))
                })
                .unwrap();
            assert_eq!(value, json!([1, 2, 3]));
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_fetch_is_not_cached() {
        let cache = ResponseCache::default();
        let err = cache.get_or_try_insert_with("doc", || Err(PipeError::UnknownPipe("x".into())));
        assert!(err.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entries() {
        let cache = ResponseCache::new(Duration::ZERO);
        cache.insert("a", json!(1));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }
}
