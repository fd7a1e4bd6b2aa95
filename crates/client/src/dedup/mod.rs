//! Single-flight request coordinator.
//!
//! ### Lookup order for a key
//! - In-memory result younger than `cache_duration`: returned directly.
//! - Pending request still running, or settled within `dedup_window`: joined.
//! - Otherwise: a new producer invocation is started and registered.
//!
//! ### Settlement
//! - Success: the result is promoted into the in-memory result table and the
//!   pending entry is released after `dedup_window`.
//! - Failure: the pending entry is dropped at once so the next call retries.
//!   A panicking producer counts as a failure.
//!
//! Table mutations happen under a synchronous lock that is never held across
//! an await. Pending entries carry a generation so a settlement arriving after
//! an invalidation cannot clobber newer state.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared, try_join_all};
use offcache_core::{BoxError, CacheConfig, Error};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, Error>>>;

/// Per-call dedup tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupOptions {
    /// How long a settled request stays joinable (default: 1s).
    pub dedup_window: Duration,
    /// Lifetime of the in-memory result (default: 5min).
    pub cache_duration: Duration,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self { dedup_window: Duration::from_millis(1000), cache_duration: Duration::from_secs(300) }
    }
}

impl DedupOptions {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self { dedup_window: config.dedup_window(), cache_duration: config.cache_duration() }
    }
}

/// Table sizes, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupStats {
    pub pending: usize,
    pub results: usize,
}

struct PendingRequest {
    generation: u64,
    started_at: Instant,
    settled: bool,
    future: SharedFetch,
    release: Option<JoinHandle<()>>,
}

impl PendingRequest {
    fn joinable(&self, dedup_window: Duration) -> bool {
        !self.settled || self.started_at.elapsed() <= dedup_window
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release.abort();
        }
    }
}

struct CachedResult {
    value: Value,
    cached_at: Instant,
}

#[derive(Default)]
struct Tables {
    pending: HashMap<String, PendingRequest>,
    results: HashMap<String, CachedResult>,
}

#[derive(Default)]
struct Inner {
    tables: Mutex<Tables>,
    next_generation: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Collapses concurrent fetches for the same key into one producer call.
///
/// Cloning is cheap and clones share state.
#[derive(Clone, Default)]
pub struct Deduplicator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator").field("stats", &self.stats()).finish()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch `key`, sharing one producer invocation among concurrent callers.
    ///
    /// The producer runs on a spawned task: once started it always runs to
    /// completion, even if every caller stops waiting. No timeout is imposed.
    pub async fn deduplicated_fetch<T, F, Fut, E>(&self, key: &str, producer: F, options: DedupOptions) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let fetch = {
            let mut tables = self.inner.lock();

            if let Some(hit) = tables.results.get(key)
                && hit.cached_at.elapsed() <= options.cache_duration
            {
                tracing::debug!(key, "dedup result hit");
                return decode(hit.value.clone());
            }

            let joined = tables
                .pending
                .get(key)
                .filter(|pending| pending.joinable(options.dedup_window))
                .map(|pending| {
                    tracing::debug!(key, generation = pending.generation, "joining pending request");
                    pending.future.clone()
                });

            match joined {
                Some(fetch) => fetch,
                None => self.start(&mut tables, key, producer, options.dedup_window),
            }
        };

        decode(fetch.await?)
    }

    /// Run [`deduplicated_fetch`](Self::deduplicated_fetch) for every item
    /// concurrently.
    ///
    /// Results are positionally aligned with the input. The first failure is
    /// returned; producers already started still run to completion.
    pub async fn batch_fetch<T, F, Fut, E, I>(&self, items: I, options: DedupOptions) -> Result<Vec<T>, Error>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        I: IntoIterator<Item = (String, F)>,
    {
        try_join_all(
            items
                .into_iter()
                .map(|(key, producer)| async move { self.deduplicated_fetch(&key, producer, options).await }),
        )
        .await
    }

    /// Forget the result and any pending request for `key`.
    ///
    /// The next call for `key` always invokes its producer.
    pub fn invalidate_request(&self, key: &str) {
        let mut tables = self.inner.lock();
        tables.results.remove(key);
        tables.pending.remove(key);
        tracing::debug!(key, "invalidated request");
    }

    pub fn invalidate_requests<S: AsRef<str>>(&self, keys: &[S]) {
        let mut tables = self.inner.lock();
        for key in keys {
            tables.results.remove(key.as_ref());
            tables.pending.remove(key.as_ref());
        }
        tracing::debug!(count = keys.len(), "invalidated requests");
    }

    /// Drop all in-memory state.
    pub fn clear_deduplication_cache(&self) {
        let mut tables = self.inner.lock();
        tables.results.clear();
        tables.pending.clear();
    }

    /// Drop results older than `max_age`. Returns how many were dropped.
    pub fn purge_stale(&self, max_age: Duration) -> usize {
        let mut tables = self.inner.lock();
        let before = tables.results.len();
        tables.results.retain(|_, result| result.cached_at.elapsed() <= max_age);
        before - tables.results.len()
    }

    /// Spawn the periodic purge of results older than `max_age`.
    ///
    /// The task ends when the handle is aborted or every clone of this
    /// coordinator is dropped.
    pub fn spawn_cleanup(&self, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                let removed = Deduplicator { inner }.purge_stale(max_age);
                if removed > 0 {
                    tracing::debug!(removed, "purged stale dedup results");
                }
            }
        })
    }

    pub fn stats(&self) -> DedupStats {
        let tables = self.inner.lock();
        DedupStats { pending: tables.pending.len(), results: tables.results.len() }
    }

    fn start<T, F, Fut, E>(&self, tables: &mut Tables, key: &str, producer: F, dedup_window: Duration) -> SharedFetch
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::downgrade(&self.inner);
        let owned_key = key.to_string();

        let fetch = async move {
            let result = match AssertUnwindSafe(async move { producer().await }).catch_unwind().await {
                Ok(Ok(value)) => serde_json::to_value(value).map_err(Error::from),
                Ok(Err(e)) => Err(Error::producer(e)),
                Err(panic) => Err(Error::producer(format!("producer panicked: {}", panic_message(&*panic)))),
            };
            settle(&inner, &owned_key, generation, &result, dedup_window);
            result
        }
        .boxed()
        .shared();

        tables.pending.insert(
            key.to_string(),
            PendingRequest {
                generation,
                started_at: Instant::now(),
                settled: false,
                future: fetch.clone(),
                release: None,
            },
        );
        tracing::debug!(key, generation, "starting producer");

        tokio::spawn(fetch.clone());
        fetch
    }
}

fn settle(inner: &Weak<Inner>, key: &str, generation: u64, result: &Result<Value, Error>, dedup_window: Duration) {
    let Some(inner) = inner.upgrade() else { return };
    let mut guard = inner.lock();
    let tables = &mut *guard;

    let Some(pending) = tables.pending.get_mut(key) else {
        tracing::debug!(key, generation, "request settled after invalidation");
        return;
    };
    if pending.generation != generation {
        return;
    }

    match result {
        Ok(value) => {
            pending.settled = true;
            pending.release = Some(spawn_release(Arc::downgrade(&inner), key.to_string(), generation, dedup_window));
            tables
                .results
                .insert(key.to_string(), CachedResult { value: value.clone(), cached_at: Instant::now() });
        }
        Err(e) => {
            tables.pending.remove(key);
            tracing::debug!(key, generation, "producer failed, pending request cleared: {e}");
        }
    }
}

fn spawn_release(inner: Weak<Inner>, key: String, generation: u64, after: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let Some(inner) = inner.upgrade() else { return };
        let mut guard = inner.lock();
        let tables = &mut *guard;
        if let Some(pending) = tables.pending.get_mut(&key)
            && pending.generation == generation
        {
            // detach rather than abort: this is the running task
            pending.release.take();
            tables.pending.remove(&key);
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(Error::from)
}
