//! Process-wide wiring of the cache components.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use offcache_core::{BoxError, CacheConfig, DurableStore, Error, SqliteStore, TtlCache};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::connectivity::{ConnectivityMonitor, ConnectivitySource, HttpProbe};
use crate::dedup::{DedupOptions, Deduplicator};
use crate::policy::{FetchState, OfflineFirst};

/// One TTL cache, one coordinator and one connectivity monitor, built from a
/// single [`CacheConfig`].
///
/// Construct once per process and share behind an `Arc`.
pub struct CacheContext {
    config: CacheConfig,
    cache: TtlCache,
    dedup: Deduplicator,
    monitor: Arc<ConnectivityMonitor>,
    policy: OfflineFirst,
    poller: Option<Arc<HttpProbe>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("cache", &self.cache)
            .field("dedup", &self.dedup)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl CacheContext {
    pub fn from_parts(config: CacheConfig, store: Arc<dyn DurableStore>, source: Arc<dyn ConnectivitySource>) -> Self {
        let cache = TtlCache::from_config(store, &config);
        let monitor = Arc::new(ConnectivityMonitor::new(source, config.banner_hide()));
        let policy = OfflineFirst::new(cache.clone(), monitor.clone(), config.offline_ttl());
        Self { config, cache, dedup: Deduplicator::new(), monitor, policy, poller: None, tasks: Mutex::new(Vec::new()) }
    }

    /// Open the SQLite store at `db_path` and probe connectivity over HTTP.
    pub async fn open(config: CacheConfig) -> Result<Self, Error> {
        let store = SqliteStore::open(&config.db_path).await?;
        let probe = Arc::new(HttpProbe::from_config(&config)?);
        tracing::info!(db_path = %config.db_path.display(), probe_url = %config.probe_url, "cache context opened");

        let mut context = Self::from_parts(config, Arc::new(store), probe.clone());
        context.poller = Some(probe);
        Ok(context)
    }

    /// Probe connectivity, then spawn the background tasks.
    pub async fn start(&self) {
        self.monitor.start().await;

        let mut tasks = Vec::with_capacity(2);
        tasks.push(
            self.dedup
                .spawn_cleanup(self.config.cleanup_interval(), self.config.cache_duration() * 2),
        );
        if let Some(probe) = &self.poller {
            tasks.push(probe.spawn());
        }

        let previous = std::mem::replace(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner), tasks);
        for task in previous {
            task.abort();
        }
    }

    pub fn shutdown(&self) {
        self.monitor.stop();
        for task in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
        tracing::debug!("cache context stopped");
    }

    /// Cache-aside fetch with concurrent callers for `key` collapsed into one
    /// producer call.
    pub async fn fetch<T, F, Fut, E>(&self, key: &str, producer: F) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let cache = self.cache.clone();
        let owned_key = key.to_string();
        let ttl = cache.default_ttl();
        self.dedup
            .deduplicated_fetch(
                key,
                move || async move { cache.fetch_with_cache(&owned_key, producer, ttl).await },
                self.dedup_options(),
            )
            .await
    }

    pub async fn offline_first_fetch<T, F, Fut, E>(&self, key: &str, producer: F) -> FetchState<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        self.policy.offline_first_fetch(key, producer).await
    }

    /// Forget in-memory state for `key` and call the producer unconditionally.
    pub async fn refresh<T, F, Fut, E>(&self, key: &str, producer: F) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        self.dedup.invalidate_request(key);
        self.cache.revalidate(key, producer, self.cache.default_ttl()).await
    }

    /// Write `value` to the durable cache and drop any in-memory result or
    /// pending request for `key`, so the next [`fetch`](Self::fetch) sees it.
    pub async fn cache_data<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        self.cache.cache_data(key, value, ttl).await;
        self.dedup.invalidate_request(key);
    }

    pub async fn clear_cache(&self, key: &str) {
        self.cache.clear_cache(key).await;
        self.dedup.invalidate_request(key);
    }

    pub async fn clear_all_cache(&self) {
        self.cache.clear_all_cache().await;
        self.dedup.clear_deduplication_cache();
    }

    pub fn dedup_options(&self) -> DedupOptions {
        DedupOptions::from_config(&self.config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The underlying TTL cache, for reads.
    ///
    /// Writes made through it bypass the coordinator's in-memory results; use
    /// [`cache_data`](Self::cache_data) and the `clear_*` methods instead.
    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn policy(&self) -> &OfflineFirst {
        &self.policy
    }
}

impl Drop for CacheContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
