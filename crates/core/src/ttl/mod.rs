//! TTL cache engine over a [`DurableStore`].
//!
//! Every entry carries its write timestamp and time-to-live. Reads check
//! staleness and evict lazily; [`TtlCache::purge_expired`] is an optional
//! sweep with the same observable behavior.
//!
//! The engine fails open: store faults and undecodable entries are logged and
//! treated as misses. Only a producer failure with nothing cached reaches the
//! caller.

pub mod entry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::store::DurableStore;
use crate::{BoxError, Error};

pub use entry::CacheEntry;

/// Convert a signed millisecond TTL, rejecting negative values.
pub fn ttl_from_millis(ms: i64) -> Result<Duration, Error> {
    u64::try_from(ms)
        .map(Duration::from_millis)
        .map_err(|_| Error::InvalidInput(format!("ttl must not be negative, got {ms}ms")))
}

/// Expiring cache scoped to a reserved key prefix.
#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
    default_ttl: Duration,
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("prefix", &self.prefix)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl TtlCache {
    pub fn new(store: Arc<dyn DurableStore>, prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Self { store, clock: Arc::new(SystemClock), prefix: prefix.into(), default_ttl }
    }

    pub fn from_config(store: Arc<dyn DurableStore>, config: &CacheConfig) -> Self {
        Self::new(store, config.key_prefix.clone(), config.ttl())
    }

    /// Replace the clock used to stamp and age entries.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Store `value` under `key` with the given TTL.
    ///
    /// Failures are logged and swallowed.
    pub async fn cache_data<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        if let Some(raw) = self.encode(key, value, ttl) {
            self.write_raw(key, raw).await;
        }
    }

    /// Envelope JSON for `value`, or `None` if it does not serialize.
    fn encode<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Option<String> {
        let entry = CacheEntry::new(value, self.clock.now_ms(), ttl);
        match serde_json::to_string(&entry) {
            Ok(raw) => Some(raw),
            Err(e) => {
                tracing::warn!(key, "failed to serialize cache entry: {e}");
                None
            }
        }
    }

    async fn write_raw(&self, key: &str, raw: String) {
        if let Err(e) = self.store.set(&self.storage_key(key), &raw).await {
            tracing::warn!(key, "failed to write cache entry: {e}");
        }
    }

    /// [`cache_data`](Self::cache_data) with the engine's default TTL.
    pub async fn cache_data_default<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.cache_data(key, value, self.default_ttl).await;
    }

    /// Read the raw entry for `key` regardless of freshness.
    ///
    /// An entry that cannot be decoded as `CacheEntry<T>` is removed and
    /// reported as absent.
    pub async fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        self.read_entry(key).await.map(|(_, entry)| entry)
    }

    /// Decoded entry together with the raw text it was decoded from.
    async fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Option<(String, CacheEntry<T>)> {
        let storage_key = self.storage_key(key);
        let raw = match self.store.get(&storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, "cache read failed, treating as miss: {e}");
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => Some((raw, entry)),
            Err(e) => {
                tracing::warn!(key, "removing corrupted cache entry: {e}");
                self.evict(&storage_key, &raw).await;
                None
            }
        }
    }

    /// Fresh cached value for `key`, evicting it if stale.
    pub async fn get_cached_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (raw, entry) = self.read_entry::<T>(key).await?;
        let now = self.clock.now_ms();
        if entry.is_fresh(now) {
            tracing::debug!(key, "cache hit");
            return Some(entry.value);
        }
        tracing::debug!(key, age_ms = entry.age_ms(now), ttl_ms = entry.ttl_ms, "evicting stale cache entry");
        self.evict(&self.storage_key(key), &raw).await;
        None
    }

    /// Cached value for `key` even if stale. Never evicts.
    pub async fn get_stale_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_entry::<T>(key).await.map(|entry| entry.value)
    }

    /// Remove the entry for `key` regardless of freshness.
    pub async fn clear_cache(&self, key: &str) {
        self.remove_quietly(&self.storage_key(key)).await;
    }

    /// Remove every entry under this engine's prefix.
    ///
    /// Keys outside the prefix are left untouched.
    pub async fn clear_all_cache(&self) {
        let keys = match self.store.list_keys(&self.prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("failed to list cache keys: {e}");
                return;
            }
        };
        let count = keys.len();
        match self.store.multi_remove(&keys).await {
            Ok(()) => tracing::debug!(count, "cleared cache"),
            Err(e) => tracing::warn!("failed to clear cache: {e}"),
        }
    }

    /// Logical keys (prefix stripped) of every stored entry.
    pub async fn list_cached_keys(&self) -> Vec<String> {
        match self.store.list_keys(&self.prefix).await {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
                .collect(),
            Err(e) => {
                tracing::warn!("failed to list cache keys: {e}");
                Vec::new()
            }
        }
    }

    /// Delete stale and undecodable entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_expired(&self) -> u64 {
        let keys = match self.store.list_keys(&self.prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("failed to list cache keys: {e}");
                return 0;
            }
        };

        let now = self.clock.now_ms();
        let mut purged = 0;
        for key in keys {
            let raw = match self.store.get(&key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(key = %key, "cache read failed during purge: {e}");
                    continue;
                }
            };
            let fresh = serde_json::from_str::<CacheEntry<IgnoredAny>>(&raw).is_ok_and(|entry| entry.is_fresh(now));
            if !fresh && self.evict(&key, &raw).await {
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::debug!(count = purged, "purged expired cache entries");
        }
        purged
    }

    /// Cache-aside fetch.
    ///
    /// A fresh hit returns without calling `producer`. Otherwise the producer
    /// runs; its result is stored with `ttl` and returned. If it fails, the
    /// most recent cached value is returned even if stale, and the producer's
    /// error only propagates when nothing is cached at all. A `ttl` of zero
    /// always calls the producer.
    pub async fn fetch_with_cache<T, F, Fut, E>(&self, key: &str, producer: F, ttl: Duration) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        match self.get_entry::<T>(key).await {
            Some(entry) if !ttl.is_zero() && entry.is_fresh(self.clock.now_ms()) => {
                tracing::debug!(key, "cache hit");
                Ok(entry.value)
            }
            existing => self.produce_and_store(key, producer, ttl, existing).await,
        }
    }

    /// Call the producer without consulting cached freshness, then store.
    ///
    /// Serve-stale-on-error still applies.
    pub async fn revalidate<T, F, Fut, E>(&self, key: &str, producer: F, ttl: Duration) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let existing = self.get_entry::<T>(key).await;
        self.produce_and_store(key, producer, ttl, existing).await
    }

    async fn produce_and_store<T, F, Fut, E>(
        &self, key: &str, producer: F, ttl: Duration, existing: Option<CacheEntry<T>>,
    ) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        tracing::debug!(key, "cache miss, calling producer");
        match producer().await {
            Ok(value) => {
                let raw = self.encode(key, &value, ttl);
                if let Some(raw) = raw {
                    self.write_raw(key, raw).await;
                }
                Ok(value)
            }
            Err(e) => {
                let err = Error::producer(e);
                match existing {
                    Some(entry) => {
                        tracing::warn!(
                            key,
                            age_ms = entry.age_ms(self.clock.now_ms()),
                            "producer failed, serving cached value: {err}"
                        );
                        Ok(entry.value)
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Remove `storage_key` only if it still holds `seen`.
    ///
    /// A write that landed after `seen` was read is left in place.
    async fn evict(&self, storage_key: &str, seen: &str) -> bool {
        match self.store.remove_if(storage_key, seen).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(key = storage_key, "entry rewritten since read, keeping it");
                false
            }
            Err(e) => {
                tracing::warn!(key = storage_key, "failed to remove cache entry: {e}");
                false
            }
        }
    }

    async fn remove_quietly(&self, storage_key: &str) {
        if let Err(e) = self.store.remove(storage_key).await {
            tracing::warn!(key = storage_key, "failed to remove cache entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, SqliteStore, StoreError};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Post {
        id: u32,
    }

    fn engine(store: Arc<dyn DurableStore>) -> (TtlCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let cache = TtlCache::new(store, "test:", Duration::from_secs(3600)).with_clock(clock.clone());
        (cache, clock)
    }

    /// Store double whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl DurableStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("get".into()))
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("set".into()))
        }
        async fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("remove".into()))
        }
        async fn remove_if(&self, _key: &str, _expected: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("remove_if".into()))
        }
        async fn multi_remove(&self, _keys: &[String]) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("multi_remove".into()))
        }
        async fn all_keys(&self) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("all_keys".into()))
        }
    }

    /// Store double where another writer replaces the entry between a
    /// reader's `get` and whatever the reader does next.
    struct RacingStore {
        inner: MemoryStore,
        seen: String,
        replacement: String,
    }

    #[async_trait]
    impl DurableStore for RacingStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.set(key, &self.replacement).await?;
            Ok(Some(self.seen.clone()))
        }
        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }
        async fn remove_if(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
            self.inner.remove_if(key, expected).await
        }
        async fn multi_remove(&self, keys: &[String]) -> Result<(), StoreError> {
            self.inner.multi_remove(keys).await
        }
        async fn all_keys(&self) -> Result<Vec<String>, StoreError> {
            self.inner.all_keys().await
        }
    }

    fn raw_entry<T: Serialize>(value: T, written_at: i64, ttl: Duration) -> String {
        serde_json::to_string(&CacheEntry::new(value, written_at, ttl)).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_then_expired() {
        let (cache, clock) = engine(Arc::new(MemoryStore::new()));
        cache.cache_data("posts:1", &Post { id: 1 }, Duration::from_millis(1000)).await;

        clock.set(500);
        assert_eq!(cache.get_cached_data::<Post>("posts:1").await, Some(Post { id: 1 }));

        clock.set(1000);
        assert_eq!(cache.get_cached_data::<Post>("posts:1").await, Some(Post { id: 1 }));

        clock.set(1500);
        assert_eq!(cache.get_cached_data::<Post>("posts:1").await, None);
    }

    #[tokio::test]
    async fn test_stale_read_evicts() {
        let store = MemoryStore::new();
        let (cache, clock) = engine(Arc::new(store.clone()));
        cache.cache_data("k", &1, Duration::from_millis(10)).await;
        clock.set(11);

        assert_eq!(cache.get_cached_data::<i32>("k").await, None);
        assert!(store.is_empty().await);
        assert_eq!(cache.get_stale_data::<i32>("k").await, None);
    }

    #[tokio::test]
    async fn test_stale_eviction_keeps_concurrent_fresh_write() {
        let inner = MemoryStore::new();
        let fresh = raw_entry(2, 5_000, Duration::from_secs(60));
        let store = RacingStore {
            inner: inner.clone(),
            seen: raw_entry(1, 0, Duration::from_millis(10)),
            replacement: fresh.clone(),
        };
        let (cache, clock) = engine(Arc::new(store));
        clock.set(5_000);

        assert_eq!(cache.get_cached_data::<i32>("k").await, None);
        assert_eq!(inner.get("test:k").await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_corrupt_eviction_keeps_concurrent_write() {
        let inner = MemoryStore::new();
        let fresh = raw_entry(2, 0, Duration::from_secs(60));
        let store =
            RacingStore { inner: inner.clone(), seen: "{not json".to_string(), replacement: fresh.clone() };
        let (cache, _clock) = engine(Arc::new(store));

        assert_eq!(cache.get_entry::<i32>("k").await.map(|entry| entry.value), None);
        assert_eq!(inner.get("test:k").await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_removed() {
        let store = MemoryStore::new();
        store.set("test:bad", "{not json").await.unwrap();
        let (cache, _clock) = engine(Arc::new(store.clone()));

        assert_eq!(cache.get_cached_data::<Post>("bad").await, None);
        assert!(store.get("test:bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mismatched_type_is_treated_as_corrupted() {
        let store = MemoryStore::new();
        let (cache, _clock) = engine(Arc::new(store.clone()));
        cache.cache_data("k", &"text", Duration::from_secs(60)).await;

        assert_eq!(cache.get_cached_data::<Post>("k").await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear_all_respects_prefix() {
        let store = MemoryStore::new();
        store.set("session:token", "abc").await.unwrap();
        let (cache, _clock) = engine(Arc::new(store.clone()));
        cache.cache_data("a", &1, Duration::from_secs(60)).await;
        cache.cache_data("b", &2, Duration::from_secs(60)).await;

        assert_eq!(cache.list_cached_keys().await, vec!["a".to_string(), "b".to_string()]);
        cache.clear_all_cache().await;

        assert!(cache.list_cached_keys().await.is_empty());
        assert_eq!(store.get("session:token").await.unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_clear_single_key() {
        let (cache, _clock) = engine(Arc::new(MemoryStore::new()));
        cache.cache_data("a", &1, Duration::from_secs(60)).await;
        cache.clear_cache("a").await;
        cache.clear_cache("a").await;
        assert_eq!(cache.get_cached_data::<i32>("a").await, None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store.set("test:corrupt", "garbage").await.unwrap();
        let (cache, clock) = engine(Arc::new(store.clone()));
        cache.cache_data("expiring", &1, Duration::from_millis(100)).await;
        cache.cache_data("fresh", &2, Duration::from_secs(3600)).await;

        clock.set(200);
        assert_eq!(cache.purge_expired().await, 2);
        assert_eq!(cache.list_cached_keys().await, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_with_cache_hit_skips_producer() {
        let (cache, _clock) = engine(Arc::new(MemoryStore::new()));
        cache.cache_data("feed", &vec!["postA"], Duration::from_secs(60)).await;

        let calls = AtomicUsize::new(0);
        let result: Vec<String> = cache
            .fetch_with_cache(
                "feed",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(vec!["postB".to_string()])
                },
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(result, vec!["postA".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_with_cache_miss_stores_result() {
        let (cache, _clock) = engine(Arc::new(MemoryStore::new()));
        let result = cache
            .fetch_with_cache("user:42", || async { Ok::<_, BoxError>(json!({"name": "Ann"})) }, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(result["name"], "Ann");
        assert_eq!(cache.get_cached_data::<serde_json::Value>("user:42").await, Some(json!({"name": "Ann"})));
    }

    #[tokio::test]
    async fn test_fetch_with_cache_serves_stale_on_error() {
        let (cache, clock) = engine(Arc::new(MemoryStore::new()));
        cache.cache_data("feed", &vec!["postA".to_string()], Duration::from_millis(10)).await;
        clock.set(10_000);

        let result: Vec<String> = cache
            .fetch_with_cache("feed", || async { Err::<Vec<String>, _>("network down") }, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(result, vec!["postA".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_with_cache_propagates_without_fallback() {
        let (cache, _clock) = engine(Arc::new(MemoryStore::new()));

        let err = cache
            .fetch_with_cache("feed", || async { Err::<Vec<String>, _>("network down") }, Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(err.is_producer());
        assert!(err.to_string().contains("network down"));
    }

    #[tokio::test]
    async fn test_zero_ttl_always_revalidates() {
        let (cache, _clock) = engine(Arc::new(MemoryStore::new()));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            cache
                .fetch_with_cache(
                    "k",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, BoxError>(1)
                    },
                    Duration::ZERO,
                )
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.get_cached_data::<i32>("k").await, None);
    }

    #[tokio::test]
    async fn test_revalidate_bypasses_fresh_entry() {
        let (cache, _clock) = engine(Arc::new(MemoryStore::new()));
        cache.cache_data("k", &1, Duration::from_secs(60)).await;

        let value: i32 = cache
            .revalidate("k", || async { Ok::<_, BoxError>(2) }, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(cache.get_cached_data::<i32>("k").await, Some(2));
    }

    #[test]
    fn test_fetch_future_is_send_for_non_sync_values() {
        fn assert_send<F: Future + Send>(_: &F) {}

        let (cache, _clock) = engine(Arc::new(MemoryStore::new()));
        let fetch = cache.fetch_with_cache(
            "counter",
            || async { Ok::<_, BoxError>(std::cell::Cell::new(1u32)) },
            Duration::from_secs(60),
        );
        assert_send(&fetch);
    }

    #[test]
    fn test_negative_ttl_rejected() {
        assert!(matches!(ttl_from_millis(-1), Err(Error::InvalidInput(_))));
        assert_eq!(ttl_from_millis(0).unwrap(), Duration::ZERO);
        assert_eq!(ttl_from_millis(1500).unwrap(), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_broken_store_fails_open() {
        let (cache, _clock) = engine(Arc::new(BrokenStore));
        cache.cache_data("k", &1, Duration::from_secs(60)).await;
        assert_eq!(cache.get_cached_data::<i32>("k").await, None);
        cache.clear_all_cache().await;
        assert_eq!(cache.purge_expired().await, 0);

        let value = cache
            .fetch_with_cache("k", || async { Ok::<_, BoxError>(7) }, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_sqlite_backed_engine() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (cache, clock) = engine(Arc::new(store));
        cache.cache_data("posts:1", &Post { id: 1 }, Duration::from_millis(1000)).await;

        clock.set(999);
        assert_eq!(cache.get_cached_data::<Post>("posts:1").await, Some(Post { id: 1 }));
        clock.set(1001);
        assert_eq!(cache.get_cached_data::<Post>("posts:1").await, None);
    }
}
