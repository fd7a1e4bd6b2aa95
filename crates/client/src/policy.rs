//! Connectivity-aware fetch policy.
//!
//! Online: cache-aside through the TTL engine. Offline: cached data only, the
//! producer is never called. An explicit refresh always goes to the producer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use offcache_core::{BoxError, Error, TtlCache};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::connectivity::ConnectivityMonitor;

/// Outcome of a policy fetch, shaped for a view layer.
#[derive(Debug, Clone)]
pub struct FetchState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<Error>,
}

impl<T> FetchState<T> {
    pub fn loading() -> Self {
        Self { data: None, loading: true, error: None }
    }

    pub fn ready(data: T) -> Self {
        Self { data: Some(data), loading: false, error: None }
    }

    pub fn failed(error: Error) -> Self {
        Self { data: None, loading: false, error: Some(error) }
    }

    fn from_result(result: Result<T, Error>) -> Self {
        match result {
            Ok(data) => Self::ready(data),
            Err(e) => Self::failed(e),
        }
    }
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self::loading()
    }
}

/// Chooses between network and cache based on live connectivity.
#[derive(Debug, Clone)]
pub struct OfflineFirst {
    cache: TtlCache,
    monitor: Arc<ConnectivityMonitor>,
    ttl: Duration,
}

impl OfflineFirst {
    /// `ttl` is what fetched data is stored with (24h for offline fallback data).
    pub fn new(cache: TtlCache, monitor: Arc<ConnectivityMonitor>, ttl: Duration) -> Self {
        Self { cache, monitor, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetch `key` according to the current connectivity.
    ///
    /// Offline with nothing fresh cached yields [`Error::NoCachedData`].
    pub async fn fetch<T, F, Fut, E>(&self, key: &str, producer: F, ttl: Duration) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        if self.monitor.is_online() {
            return self.cache.fetch_with_cache(key, producer, ttl).await;
        }

        tracing::debug!(key, "offline, reading cache only");
        self.cache
            .get_cached_data(key)
            .await
            .ok_or_else(|| Error::NoCachedData(key.to_string()))
    }

    /// [`fetch`](Self::fetch) with the policy TTL, as a [`FetchState`].
    pub async fn offline_first_fetch<T, F, Fut, E>(&self, key: &str, producer: F) -> FetchState<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        FetchState::from_result(self.fetch(key, producer, self.ttl).await)
    }

    /// Call the producer regardless of connectivity and cached freshness.
    ///
    /// The result is stored with the policy TTL. A failing producer still
    /// falls back to whatever is cached.
    pub async fn refresh<T, F, Fut, E>(&self, key: &str, producer: F) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        tracing::debug!(key, "refresh requested");
        self.cache.revalidate(key, producer, self.ttl).await
    }
}

/// Observable offline-first query for one key.
///
/// Holds the last [`FetchState`]; data from a previous load stays visible
/// while reloading and after a failed reload.
pub struct OfflineQuery<T> {
    policy: OfflineFirst,
    key: String,
    state: watch::Sender<FetchState<T>>,
}

impl<T> OfflineQuery<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    pub fn new(policy: OfflineFirst, key: impl Into<String>) -> Self {
        let (state, _) = watch::channel(FetchState::loading());
        Self { policy, key: key.into(), state }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> FetchState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.state.subscribe()
    }

    pub async fn load<F, Fut, E>(&self, producer: F) -> FetchState<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        self.begin();
        let result = self.policy.fetch(&self.key, producer, self.policy.ttl()).await;
        self.finish(result)
    }

    pub async fn refresh<F, Fut, E>(&self, producer: F) -> FetchState<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        self.begin();
        let result = self.policy.refresh(&self.key, producer).await;
        self.finish(result)
    }

    fn begin(&self) {
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
    }

    fn finish(&self, result: Result<T, Error>) -> FetchState<T> {
        self.state.send_modify(|state| {
            state.loading = false;
            match result {
                Ok(data) => state.data = Some(data),
                Err(e) => state.error = Some(e),
            }
        });
        self.state()
    }
}
