//! Unified error types for offcache.
//!
//! [`StoreError`] never leaves the cache engine on read/write paths: it is
//! logged and degraded to a miss. [`Error`] is what callers of the fetch
//! operations see, and is `Clone` so one settled result can be handed to
//! every deduplicated waiter.

use std::sync::Arc;

use tokio_rusqlite::rusqlite;

/// Boxed error as returned by caller-supplied producers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Durable store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Schema upgrade failed, or the database was written by a newer schema.
    #[error("STORE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// The backing medium refused the operation.
    #[error("STORE_ERROR: {0}")]
    Unavailable(String),
}

impl From<tokio_rusqlite::Error<StoreError>> for StoreError {
    fn from(err: tokio_rusqlite::Error<StoreError>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => StoreError::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => StoreError::Database(tokio_rusqlite::Error::Close(c)),
            _ => StoreError::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for StoreError {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        StoreError::Database(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(tokio_rusqlite::Error::Error(err))
    }
}

/// Errors surfaced by the cache and fetch operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., a negative TTL).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The wrapped producer failed and no cached value could stand in.
    #[error("PRODUCER_FAILED: {0}")]
    Producer(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// Offline with nothing cached for the key.
    #[error("NO_CACHED_DATA: no cached data available for {0}")]
    NoCachedData(String),

    /// A value could not be converted to or from its stored form.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// Durable store failure, only surfaced by explicit store operations.
    #[error("{0}")]
    Store(Arc<StoreError>),
}

impl Error {
    /// Wrap a producer failure.
    ///
    /// A producer that already fails with an [`Error`] keeps it as-is, so
    /// layered fetches do not nest `PRODUCER_FAILED` prefixes.
    pub fn producer(err: impl Into<BoxError>) -> Self {
        match err.into().downcast::<Error>() {
            Ok(err) => *err,
            Err(other) => Error::Producer(Arc::from(other)),
        }
    }

    /// Whether this error came from the producer itself.
    pub fn is_producer(&self) -> bool {
        matches!(self, Error::Producer(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
