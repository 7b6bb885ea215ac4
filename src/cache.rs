//! Read-Through Caching
//!
//! [`ReadThrough`] layers a typed, fetch-on-miss convenience API over a
//! [`KvStore`]. A cache hit deserializes the stored JSON into the caller's
//! type; a miss (absent or expired) runs the supplied fetcher, stores the
//! result under the cache's TTL and returns it.
//!
//! The helper owns no data of its own. Every clone of the underlying store
//! sees the cached values, and expiry is handled entirely by the store.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{KvError, Result};
use crate::storage::KvStore;

/// A typed read-through cache over a [`KvStore`].
///
/// # Example
///
/// ```ignore
/// use stashkv::{KvStore, ReadThrough, StoreConfig};
/// use std::time::Duration;
///
/// let store = KvStore::open(StoreConfig::new("app.redb")).await?;
/// let cache = ReadThrough::new(store, Some(Duration::from_secs(300)));
///
/// let profile: Profile = cache
///     .get_or_fetch("profile:alice", || async { load_profile("alice").await })
///     .await?;
/// ```
#[derive(Clone)]
pub struct ReadThrough {
    store: KvStore,
    ttl: Option<Duration>,
}

impl ReadThrough {
    /// Wraps a store. `ttl` applies to every value stored on a miss; `None`
    /// caches forever.
    pub fn new(store: KvStore, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// Reads a cached value, deserializing it into `T`. Misses and expired
    /// entries yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Serialization`] if the stored JSON does not match
    /// `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(value) => Ok(Some(decode(key, value)?)),
            None => Ok(None),
        }
    }

    /// Reads a cached value, running `fetch` on a miss and caching its
    /// result under this cache's TTL.
    ///
    /// The fetcher only runs when the cache has no live value; a fetcher
    /// error is returned as-is and nothing is cached.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.store.get(key).await? {
            return decode(key, value);
        }

        debug!(key, "cache miss, fetching");
        let fetched = fetch().await?;
        let value = encode(key, &fetched)?;
        self.store.set(key, value, self.ttl).await?;
        Ok(fetched)
    }

    /// Runs the fetcher unconditionally and caches its result, replacing
    /// whatever was stored. Use this to force-refresh a value that is still
    /// live.
    pub async fn refresh<T, F, Fut>(&self, key: &str, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let fetched = fetch().await?;
        let value = encode(key, &fetched)?;
        self.store.set(key, value, self.ttl).await?;
        Ok(fetched)
    }

    /// Stores a value directly, bypassing the fetcher.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = encode(key, value)?;
        self.store.set(key, value, self.ttl).await?;
        Ok(())
    }

    /// Drops a cached value so the next read fetches fresh.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.store.delete(key).await?;
        Ok(())
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| KvError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(key: &str, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| KvError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreConfig;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    async fn temp_cache(dir: &tempfile::TempDir, ttl: Option<Duration>) -> ReadThrough {
        let config = StoreConfig::new(dir.path().join("cache.redb"))
            .with_cleanup_interval(Duration::from_secs(3600));
        let store = KvStore::open(config).await.unwrap();
        ReadThrough::new(store, ttl)
    }

    #[tokio::test]
    async fn test_fetcher_runs_once_then_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = temp_cache(&dir, None).await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let profile: Profile = cache
                .get_or_fetch("profile:alice", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Profile {
                        name: "alice".to_string(),
                        age: 30,
                    })
                })
                .await
                .unwrap();
            assert_eq!(profile.name, "alice");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = temp_cache(&dir, Some(Duration::from_millis(20))).await;
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: Arc<AtomicUsize>| {
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(n as u32)
            }
        };

        let first: u32 = cache
            .get_or_fetch("counter", fetch(Arc::clone(&calls)))
            .await
            .unwrap();
        assert_eq!(first, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let second: u32 = cache
            .get_or_fetch("counter", fetch(Arc::clone(&calls)))
            .await
            .unwrap();
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn test_fetcher_error_caches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = temp_cache(&dir, None).await;

        let result: Result<u32> = cache
            .get_or_fetch("broken", || async {
                Err(KvError::Internal("upstream down".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.get::<u32>("broken").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = temp_cache(&dir, None).await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let _: u32 = cache
                .get_or_fetch("k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            cache.invalidate("k").await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_replaces_live_value() {
        let dir = tempfile::tempdir().unwrap();
        let cache = temp_cache(&dir, None).await;

        let _: u32 = cache.get_or_fetch("k", || async { Ok(1) }).await.unwrap();
        let refreshed: u32 = cache.refresh("k", || async { Ok(2) }).await.unwrap();
        assert_eq!(refreshed, 2);

        // The next plain read serves the refreshed value.
        let cached: u32 = cache.get_or_fetch("k", || async { Ok(3) }).await.unwrap();
        assert_eq!(cached, 2);
    }

    #[tokio::test]
    async fn test_put_then_typed_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = temp_cache(&dir, None).await;

        let profile = Profile {
            name: "bob".to_string(),
            age: 41,
        };
        cache.put("profile:bob", &profile).await.unwrap();

        let loaded: Option<Profile> = cache.get("profile:bob").await.unwrap();
        assert_eq!(loaded, Some(profile));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = temp_cache(&dir, None).await;

        cache.put("k", &"a string").await.unwrap();
        let err = cache.get::<u32>("k").await.unwrap_err();
        assert!(matches!(err, KvError::Serialization { .. }));
    }
}
