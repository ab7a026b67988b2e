//! Cache-aside read with an optional fallback to stale entries.
//!
//! Shared by the token, term-search and exact-code paths of
//! [`CidService`](crate::CidService):
//!
//! 1. a live cache hit is returned without calling the loader
//! 2. on a miss the loader runs; its value is written back when the TTL
//!    policy yields a duration, and returned either way
//! 3. if the loader fails and fallback is enabled, a stale entry for the
//!    same key is returned instead of the error
//!
//! Cache failures never fail a read on their own. They are logged and
//! treated as misses; only when the loader fails too does the caller see
//! [`CidError::NoCacheAvailable`].

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::error::{CacheError, CidError, CidResult};

/// Whether a failed load may be answered from a stale cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Serve the last cached value for the key when the loader fails.
    Stale,
    /// Propagate loader errors as they are.
    Never,
}

/// Reads `key` from `cache`, loading and caching it on a miss.
///
/// `ttl` decides per value whether it is cached at all; returning `None`
/// leaves the cache untouched.
pub async fn read_through<T, L, Fut, P>(
    cache: &dyn CacheStore,
    key: &str,
    fallback: Fallback,
    ttl: P,
    load: L,
) -> CidResult<T>
where
    T: Serialize + DeserializeOwned,
    L: FnOnce() -> Fut,
    Fut: Future<Output = CidResult<T>>,
    P: FnOnce(&T) -> Option<Duration>,
{
    match cache.get(key).await {
        Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => {
                debug!(key = %key, "cache hit");
                return Ok(value);
            }
            Err(e) => warn!(key = %key, error = %e, "Discarding undecodable cache entry"),
        },
        Ok(None) => debug!(key = %key, "cache miss"),
        Err(e) => warn!(key = %key, error = %e, "Cache read failed, treating as miss"),
    }

    let err = match load().await {
        Ok(value) => {
            if let Some(ttl) = ttl(&value) {
                store(cache, key, &value, ttl).await;
            } else {
                debug!(key = %key, "Value not cacheable, skipping write");
            }
            return Ok(value);
        }
        Err(e) => e,
    };

    if fallback == Fallback::Never {
        return Err(err);
    }

    match cache.get_stale(key).await {
        Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => {
                warn!(key = %key, error = %err, "Upstream failed, serving cached value");
                Ok(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Fallback cache entry is undecodable");
                Err(err)
            }
        },
        Ok(None) => Err(err),
        Err(cache_err) => {
            warn!(key = %key, error = %cache_err, "Fallback cache read failed");
            Err(CidError::NoCacheAvailable(format!("{err}; {cache_err}")))
        }
    }
}

async fn store<T: Serialize>(cache: &dyn CacheStore, key: &str, value: &T, ttl: Duration) {
    let result = match serde_json::to_vec(value) {
        Ok(bytes) => cache.set(key, bytes, ttl).await,
        Err(e) => Err(CacheError::from(e)),
    };
    if let Err(e) = result {
        warn!(key = %key, error = %e, "Cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::MemoryCache;

    const TTL: Duration = Duration::from_secs(60);

    struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    fn upstream_down() -> CidError {
        CidError::upstream(Some(503), "unavailable")
    }

    #[tokio::test]
    async fn test_miss_loads_and_caches() {
        let cache = MemoryCache::default();
        let value: Vec<String> = read_through(&cache, "k", Fallback::Stale, |_| Some(TTL), || async {
            Ok(vec!["a".to_string()])
        })
        .await
        .unwrap();
        assert_eq!(value, vec!["a"]);
        assert!(cache.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hit_skips_loader() {
        let cache = MemoryCache::default();
        cache.set("k", br#"["cached"]"#.to_vec(), TTL).await.unwrap();

        let calls = AtomicUsize::new(0);
        let value: Vec<String> = read_through(&cache, "k", Fallback::Stale, |_| Some(TTL), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["fresh".to_string()])
        })
        .await
        .unwrap();

        assert_eq!(value, vec!["cached"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_uncacheable_value_is_not_written() {
        let cache = MemoryCache::default();
        let value: Vec<String> = read_through(
            &cache,
            "k",
            Fallback::Stale,
            |v: &Vec<String>| (!v.is_empty()).then_some(TTL),
            || async { Ok(Vec::new()) },
        )
        .await
        .unwrap();
        assert!(value.is_empty());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loader_failure_serves_stale_entry() {
        let cache = MemoryCache::default();
        cache.set("k", br#"["old"]"#.to_vec(), TTL).await.unwrap();
        tokio::time::advance(TTL * 2).await;

        let value: Vec<String> =
            read_through(&cache, "k", Fallback::Stale, |_| Some(TTL), || async {
                Err(upstream_down())
            })
            .await
            .unwrap();
        assert_eq!(value, vec!["old"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fallback_propagates() {
        let cache = MemoryCache::default();
        cache.set("k", br#"["old"]"#.to_vec(), TTL).await.unwrap();
        tokio::time::advance(TTL * 2).await;

        let result: CidResult<Vec<String>> =
            read_through(&cache, "k", Fallback::Never, |_| Some(TTL), || async {
                Err(upstream_down())
            })
            .await;
        assert!(matches!(result, Err(CidError::Upstream { status: Some(503), .. })));
    }

    #[tokio::test]
    async fn test_empty_cache_propagates_loader_error() {
        let cache = MemoryCache::default();
        let result: CidResult<Vec<String>> =
            read_through(&cache, "k", Fallback::Stale, |_| Some(TTL), || async {
                Err(upstream_down())
            })
            .await;
        assert!(matches!(result, Err(CidError::Upstream { .. })));
    }

    #[tokio::test]
    async fn test_broken_cache_is_a_miss() {
        let value: Vec<String> =
            read_through(&BrokenCache, "k", Fallback::Stale, |_| Some(TTL), || async {
                Ok(vec!["fresh".to_string()])
            })
            .await
            .unwrap();
        assert_eq!(value, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_broken_cache_and_upstream_is_no_cache_available() {
        let result: CidResult<Vec<String>> =
            read_through(&BrokenCache, "k", Fallback::Stale, |_| Some(TTL), || async {
                Err(upstream_down())
            })
            .await;
        assert!(matches!(result, Err(CidError::NoCacheAvailable(_))));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let cache = MemoryCache::default();
        cache.set("k", b"not json".to_vec(), TTL).await.unwrap();

        let value: Vec<String> = read_through(&cache, "k", Fallback::Stale, |_| Some(TTL), || async {
            Ok(vec!["fresh".to_string()])
        })
        .await
        .unwrap();
        assert_eq!(value, vec!["fresh"]);
    }
}
