//! Cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (OFFCACHE_*)
//! 2. TOML config file (if OFFCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Cache configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (OFFCACHE_*)
/// 2. TOML config file (if OFFCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to the SQLite file backing the durable store.
    ///
    /// Set via OFFCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Reserved prefix for every key the TTL engine writes.
    ///
    /// Set via OFFCACHE_KEY_PREFIX environment variable.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Default TTL for general data in milliseconds.
    ///
    /// Set via OFFCACHE_TTL_MS environment variable.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Default TTL for offline-first fallback data in milliseconds.
    ///
    /// Set via OFFCACHE_OFFLINE_TTL_MS environment variable.
    #[serde(default = "default_offline_ttl_ms")]
    pub offline_ttl_ms: u64,

    /// How long a settled request stays joinable, in milliseconds.
    ///
    /// Set via OFFCACHE_DEDUP_WINDOW_MS environment variable.
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,

    /// Lifetime of the in-memory result fast path, in milliseconds.
    ///
    /// Set via OFFCACHE_CACHE_DURATION_MS environment variable.
    #[serde(default = "default_cache_duration_ms")]
    pub cache_duration_ms: u64,

    /// Period of the in-memory result purge, in milliseconds.
    ///
    /// Set via OFFCACHE_CLEANUP_INTERVAL_MS environment variable.
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// How long the "reconnected" banner stays up, in milliseconds.
    ///
    /// Set via OFFCACHE_BANNER_HIDE_MS environment variable.
    #[serde(default = "default_banner_hide_ms")]
    pub banner_hide_ms: u64,

    /// URL probed to decide whether the internet is reachable.
    ///
    /// Set via OFFCACHE_PROBE_URL environment variable.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    /// Interval between reachability probes, in milliseconds.
    ///
    /// Set via OFFCACHE_PROBE_INTERVAL_MS environment variable.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Timeout of a single reachability probe, in milliseconds.
    ///
    /// Set via OFFCACHE_PROBE_TIMEOUT_MS environment variable.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./offcache.sqlite")
}

fn default_key_prefix() -> String {
    "offcache:".into()
}

fn default_ttl_ms() -> u64 {
    3_600_000 // 1h
}

fn default_offline_ttl_ms() -> u64 {
    86_400_000 // 24h
}

fn default_dedup_window_ms() -> u64 {
    1_000
}

fn default_cache_duration_ms() -> u64 {
    300_000 // 5min
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

fn default_banner_hide_ms() -> u64 {
    2_000
}

fn default_probe_url() -> String {
    "https://clients3.google.com/generate_204".into()
}

fn default_probe_interval_ms() -> u64 {
    5_000
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            key_prefix: default_key_prefix(),
            ttl_ms: default_ttl_ms(),
            offline_ttl_ms: default_offline_ttl_ms(),
            dedup_window_ms: default_dedup_window_ms(),
            cache_duration_ms: default_cache_duration_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            banner_hide_ms: default_banner_hide_ms(),
            probe_url: default_probe_url(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn offline_ttl(&self) -> Duration {
        Duration::from_millis(self.offline_ttl_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn cache_duration(&self) -> Duration {
        Duration::from_millis(self.cache_duration_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn banner_hide(&self) -> Duration {
        Duration::from_millis(self.banner_hide_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `OFFCACHE_`
    /// 2. TOML file from `OFFCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("OFFCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("OFFCACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
