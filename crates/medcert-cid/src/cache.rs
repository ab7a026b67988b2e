//! Key-value cache used for tokens and lookup results.
//!
//! ## Contract
//!
//! - `get` returns only live entries; expiry is enforced here, never by callers
//! - `set` overwrites atomically per key; there are no multi-key operations
//! - `get_stale` may also return entries whose TTL elapsed, as long as the
//!   backend still retains them. It backs the degrade-to-stale fallback.
//!
//! Values are opaque bytes so a networked backend can be slotted in behind
//! the same trait; the lookup service stores JSON.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::error::CacheError;

/// Cache backend abstraction.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value for `key` if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError>;

    /// Stores `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Returns the value for `key` even if its TTL elapsed, when still retained.
    async fn get_stale(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError> {
        self.get(key).await
    }
}

/// A cached entry with TTL support.
///
/// The data is wrapped in `Arc` so cache hits never copy the payload.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }

    /// Check if this entry is past its TTL plus the stale retention window.
    pub fn is_evictable(&self, retention: Duration) -> bool {
        self.cached_at.elapsed() >= self.ttl.saturating_add(retention)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub live_entries: usize,
}

/// Single-process cache backed by `DashMap`.
///
/// Expired entries stay readable through `get_stale` until the retention
/// window passes, then [`MemoryCache::purge_expired`] drops them.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CachedEntry>>,
    stale_retention: Duration,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            stale_retention: config.stale_retention(),
        }
    }

    pub fn with_stale_retention(mut self, retention: Duration) -> Self {
        self.stale_retention = retention;
        self
    }

    /// Removes entries past TTL + retention. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let retention = self.stale_retention;
        self.entries.retain(|_, entry| !entry.is_evictable(retention));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }
        purged
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
        tracing::debug!(key = %key, "cache invalidated");
    }

    pub fn clear(&self) {
        self.entries.clear();
        tracing::debug!("Cleared cache");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            live_entries: self.entries.iter().filter(|e| !e.is_expired()).count(),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError> {
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| Arc::clone(&entry.data)))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), CachedEntry::new(value, ttl));
        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set");
        Ok(())
    }

    async fn get_stale(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError> {
        let retention = self.stale_retention;
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_evictable(retention))
            .map(|entry| Arc::clone(&entry.data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> MemoryCache {
        MemoryCache::default().with_stale_retention(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = cache();
        cache
            .set("cid:code:6B00", b"value".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();

        let hit = cache.get("cid:code:6B00").await.unwrap();
        assert_eq!(hit.as_deref().map(Vec::as_slice), Some(&b"value"[..]));
        assert!(cache.get("cid:code:6B01").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss_but_readable_stale() {
        let cache = cache();
        cache
            .set("oms:token", b"t".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(cache.get("oms:token").await.unwrap().is_none());
        assert!(cache.get_stale("oms:token").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.get_stale("oms:token").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = cache();
        cache.set("a", b"1".to_vec(), Duration::from_secs(5)).await.unwrap();
        cache.set("b", b"2".to_vec(), Duration::from_secs(3600)).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        // Still inside retention
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 2,
                live_entries: 1
            }
        );

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let cache = cache();
        cache.set("k", b"old".to_vec(), Duration::from_secs(10)).await.unwrap();
        cache.set("k", b"new".to_vec(), Duration::from_secs(10)).await.unwrap();

        let hit = cache.get("k").await.unwrap().unwrap();
        assert_eq!(hit.as_slice(), b"new");
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = cache();
        cache.set("a", b"1".to_vec(), Duration::from_secs(10)).await.unwrap();
        cache.set("b", b"2".to_vec(), Duration::from_secs(10)).await.unwrap();

        cache.invalidate("a");
        assert!(cache.get_stale("a").await.unwrap().is_none());
        assert_eq!(cache.stats().entries, 1);

        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }
}
