//! Cache store abstraction
//!
//! The cache backs the working-memory tier and accelerates secondary
//! indexes elsewhere. Values are opaque strings (JSON payloads) with
//! optional TTLs.

use async_trait::async_trait;
use engram_core::{Result, Timestamp};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Trait for cache backends
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a value, None if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value with an optional TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a value, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;
}

struct CacheEntry {
    value: String,
    expires_at: Option<Timestamp>,
}

impl CacheEntry {
    fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.map(|e| e < now).unwrap_or(false)
    }
}

/// In-process cache with TTL expiry
///
/// Expiry is checked on read; stale entries are dropped lazily and
/// can be swept explicitly with [`InMemoryCache::purge_expired`].
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop all expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Timestamp::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("Purged {} expired cache entries", removed);
        }
        removed
    }

    /// Number of live (possibly stale) entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Timestamp::now();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    return Ok(Some(entry.value.clone()));
                }
                None => return Ok(None),
                Some(_) => {} // expired, fall through to removal
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: ttl.map(|d| Timestamp::now().plus(d)),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCache::new();

        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = InMemoryCache::new();

        cache
            .set("short", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(cache.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = InMemoryCache::new();

        cache
            .set("a", "1", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        cache.set("b", "2", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let removed = cache.purge_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("b").await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_overwrite_resets_ttl() {
        let cache = InMemoryCache::new();

        cache
            .set("k", "old", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        cache.set("k", "new", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some("new".to_string()));
    }
}
