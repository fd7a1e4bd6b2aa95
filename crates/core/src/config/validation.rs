//! Configuration validation rules.
//!
//! This module provides validation logic for `CacheConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::CacheConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `key_prefix` is empty
    /// - `dedup_window_ms`, `cleanup_interval_ms` or `probe_interval_ms` is 0
    /// - `probe_timeout_ms` is less than 100ms
    /// - `probe_url` is not an http(s) URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.is_empty() {
            return Err(ConfigError::Invalid { field: "key_prefix".into(), reason: "must not be empty".into() });
        }

        for (field, value) in [
            ("dedup_window_ms", self.dedup_window_ms),
            ("cleanup_interval_ms", self.cleanup_interval_ms),
            ("probe_interval_ms", self.probe_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must be greater than 0".into() });
            }
        }

        if self.probe_timeout_ms < 100 {
            return Err(ConfigError::Invalid {
                field: "probe_timeout_ms".into(),
                reason: "must be at least 100ms".into(),
            });
        }

        match url::Url::parse(&self.probe_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::Invalid {
                    field: "probe_url".into(),
                    reason: format!("unsupported scheme: {}", url.scheme()),
                });
            }
            Err(e) => {
                return Err(ConfigError::Invalid { field: "probe_url".into(), reason: e.to_string() });
            }
        }

        if self.ttl_ms == 0 {
            tracing::warn!("ttl_ms is 0; every cached read will revalidate");
        }

        if self.cache_duration_ms > self.ttl_ms && self.ttl_ms > 0 {
            tracing::warn!(
                cache_duration_ms = self.cache_duration_ms,
                ttl_ms = self.ttl_ms,
                "in-memory cache_duration exceeds the durable TTL; \
                 the fast path may serve results the durable cache already considers stale"
            );
        }

        Ok(())
    }
}
