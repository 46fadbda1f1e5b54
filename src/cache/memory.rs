//! In-process cache backend.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;

use super::{CacheError, ReadCache};

pub const DEFAULT_CACHE_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// `HashMap` cache behind a `RwLock`, with an optional key namespace.
///
/// Writes are last-write-wins. Expired entries are dropped lazily on read
/// and in bulk by `purge_expired`.
pub struct MemoryCache {
    namespace: String,
    lock_timeout: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            lock_timeout: DEFAULT_CACHE_LOCK_TIMEOUT,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    fn full_key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.namespace, key)
        }
    }

    /// Remove all expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let mut entries = self
            .entries
            .try_write_for(self.lock_timeout)
            .ok_or(CacheError::Timeout(self.lock_timeout))?;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new("")
    }
}

impl ReadCache for MemoryCache {
    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let full_key = self.full_key(key);
        let mut entries = self
            .entries
            .try_write_for(self.lock_timeout)
            .ok_or(CacheError::Timeout(self.lock_timeout))?;
        entries.insert(
            full_key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let full_key = self.full_key(key);
        let entries = self
            .entries
            .try_read_for(self.lock_timeout)
            .ok_or(CacheError::Timeout(self.lock_timeout))?;
        match entries.get(&full_key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                drop(entries);
                self.forget(key)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn forget(&self, key: &str) -> Result<(), CacheError> {
        let full_key = self.full_key(key);
        let mut entries = self
            .entries
            .try_write_for(self.lock_timeout)
            .ok_or(CacheError::Timeout(self.lock_timeout))?;
        entries.remove(&full_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_put_get() {
        let cache = MemoryCache::default();
        assert!(cache.get("k").unwrap().is_none());
        cache.put("k", json!({"0x0C": 450.0}), Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(json!({"0x0C": 450.0})));

        // last write wins
        cache.put("k", json!([]), Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(json!([])));
    }

    #[test]
    fn test_expiry() {
        let cache = MemoryCache::default();
        cache.put("short", json!(1), Duration::ZERO).unwrap();
        cache.put("long", json!(2), Duration::from_secs(60)).unwrap();
        std::thread::sleep(Duration::from_millis(2));

        assert!(cache.get("short").unwrap().is_none());
        assert_eq!(cache.len(), 1);

        cache.put("short", json!(1), Duration::ZERO).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.get("long").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let a = MemoryCache::new("fleet-a");
        assert_eq!(a.full_key("vehicle_dtc_1"), "fleet-a:vehicle_dtc_1");
        assert_eq!(MemoryCache::default().full_key("vehicle_dtc_1"), "vehicle_dtc_1");
    }

    #[test]
    fn test_forget() {
        let cache = MemoryCache::new("ns");
        cache.put("k", json!(true), Duration::from_secs(60)).unwrap();
        cache.forget("k").unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lock_timeout() {
        let cache = MemoryCache::default().with_lock_timeout(Duration::from_millis(10));
        let _held = cache.entries.write();
        assert!(matches!(
            cache.put("k", json!(1), Duration::from_secs(1)),
            Err(CacheError::Timeout(_))
        ));
    }
}
