//! Durable key-value store backing the TTL cache.
//!
//! Any string-keyed asynchronous store that survives restarts can back the
//! cache. Two adapters ship with the crate:
//!
//! - [`SqliteStore`]: SQLite via tokio-rusqlite, WAL mode, `user_version` schema upgrades
//! - [`MemoryStore`]: process-local map for embedding and tests
//!
//! Adapters report failures honestly; the TTL engine is the layer that
//! swallows them and degrades to a miss.

pub mod connection;
pub mod memory;
pub mod schema;

use async_trait::async_trait;

pub use crate::StoreError;
pub use connection::SqliteStore;
pub use memory::MemoryStore;

/// Persistent, asynchronous, string-keyed storage.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Raw value for `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Upsert `value` under `key`. Readers never observe a partial write.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Deleting an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Delete `key` only while it still holds `expected`.
    ///
    /// Returns whether a row was deleted. Lets a reader evict what it saw
    /// without clobbering a write that landed after its read.
    async fn remove_if(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Delete every key in `keys`.
    async fn multi_remove(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Every key in the store.
    async fn all_keys(&self) -> Result<Vec<String>, StoreError>;

    /// Keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let keys = self.all_keys().await?;
        Ok(keys.into_iter().filter(|k| k.starts_with(prefix)).collect())
    }
}
