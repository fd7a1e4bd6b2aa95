//! Core types and shared functionality for offcache.
//!
//! This crate provides:
//! - Durable key-value store trait with SQLite and in-memory adapters
//! - TTL cache engine with lazy eviction and serve-stale-on-error
//! - Unified error types
//! - Configuration structures

pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod store;
pub mod ttl;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, ConfigError};
pub use error::{BoxError, Error, StoreError};
pub use key::request_key;
pub use store::{DurableStore, MemoryStore, SqliteStore};
pub use ttl::{CacheEntry, TtlCache, ttl_from_millis};
