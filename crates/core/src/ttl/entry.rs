//! Persisted cache entry format.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::duration_ms;

/// A cached value with its write time and time-to-live.
///
/// Stored as JSON: `{"value": ..., "written_at": <epoch ms>, "ttl_ms": <ms>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub written_at: i64,
    pub ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, written_at: i64, ttl: Duration) -> Self {
        Self { value, written_at, ttl_ms: u64::try_from(duration_ms(ttl)).unwrap_or(u64::MAX) }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.written_at)
    }

    /// Whether the entry may be served at `now_ms`.
    ///
    /// An entry of age exactly `ttl` is still fresh. A zero TTL is never
    /// fresh.
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        if self.ttl_ms == 0 {
            return false;
        }
        let ttl = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        self.age_ms(now_ms) <= ttl
    }
}
