//! offcache command-line entry point.
//!
//! Inspects and edits the durable cache behind an application's configuration.
//! Results go to stdout as JSON; logging goes to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use offcache_client::HttpProbe;
use offcache_core::{CacheConfig, SqliteStore, TtlCache, ttl_from_millis};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Inspect and edit the offline cache")]
#[command(version)]
struct Args {
    /// Database path (overrides OFFCACHE_DB_PATH and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the fresh value for a key, failing if absent or expired
    Get { key: String },
    /// Store a JSON value
    Set {
        key: String,
        json: String,
        /// Lifetime in milliseconds (default: configured ttl_ms)
        #[arg(long, allow_negative_numbers = true)]
        ttl_ms: Option<i64>,
    },
    /// List cached keys without the namespace prefix
    Keys,
    /// Remove one key, or every cached key when none is given
    Clear { key: Option<String> },
    /// Delete expired entries
    Purge,
    /// Check connectivity once and print the snapshot
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();
    let mut config = CacheConfig::load().context("failed to load configuration")?;
    if let Some(db) = args.db {
        config.db_path = db;
    }

    match args.command {
        Command::Get { key } => match open_cache(&config).await?.get_cached_data::<Value>(&key).await {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => bail!("no fresh value for {key}"),
        },
        Command::Set { key, json, ttl_ms } => {
            let value: Value = serde_json::from_str(&json).context("value is not valid JSON")?;
            let cache = open_cache(&config).await?;
            let ttl = match ttl_ms {
                Some(ms) => ttl_from_millis(ms)?,
                None => cache.default_ttl(),
            };
            cache.cache_data(&key, &value, ttl).await;
            tracing::info!(key, ttl = ?ttl, "value stored");
        }
        Command::Keys => {
            for key in open_cache(&config).await?.list_cached_keys().await {
                println!("{key}");
            }
        }
        Command::Clear { key: Some(key) } => open_cache(&config).await?.clear_cache(&key).await,
        Command::Clear { key: None } => open_cache(&config).await?.clear_all_cache().await,
        Command::Purge => {
            let removed = open_cache(&config).await?.purge_expired().await;
            println!("{}", serde_json::json!({ "removed": removed }));
        }
        Command::Probe => {
            let probe = HttpProbe::from_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&probe.probe().await)?);
        }
    }

    Ok(())
}

async fn open_cache(config: &CacheConfig) -> Result<TtlCache> {
    let store = SqliteStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;
    Ok(TtlCache::from_config(Arc::new(store), config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_ttl_reaches_validation() {
        let args = Args::try_parse_from(["offcache", "set", "k", "1", "--ttl-ms", "-1"]).unwrap();
        let Command::Set { ttl_ms, .. } = args.command else { panic!("expected set") };
        assert_eq!(ttl_ms, Some(-1));
        assert!(ttl_from_millis(-1).is_err());
    }

    #[test]
    fn test_clear_without_key_clears_all() {
        let args = Args::try_parse_from(["offcache", "--db", "/tmp/cache.sqlite", "clear"]).unwrap();
        assert!(matches!(args.command, Command::Clear { key: None }));
        assert_eq!(args.db, Some(PathBuf::from("/tmp/cache.sqlite")));
    }
}
