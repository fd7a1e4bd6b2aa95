//! HTTP reachability probe.
//!
//! Issues a GET against a well-known endpoint and classifies the outcome:
//! - 2xx: connected and reachable
//! - other status: connected, internet not reachable (captive portal, proxy)
//! - connect/timeout failure: not connected

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offcache_core::{CacheConfig, Error};
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{ConnectivitySnapshot, ConnectivitySource};

/// Polling [`ConnectivitySource`] backed by reqwest.
#[derive(Debug)]
pub struct HttpProbe {
    http: Client,
    url: String,
    interval: Duration,
    tx: watch::Sender<ConnectivitySnapshot>,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration, interval: Duration) -> Result<Self, Error> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::InvalidInput(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, url, interval))
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, Error> {
        Self::new(config.probe_url.clone(), config.probe_timeout(), config.probe_interval())
    }

    /// Use a preconfigured client (proxies, custom roots).
    pub fn with_client(http: Client, url: impl Into<String>, interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(ConnectivitySnapshot::unknown());
        Self { http, url: url.into(), interval, tx }
    }

    /// Probe once without publishing.
    pub async fn probe(&self) -> ConnectivitySnapshot {
        match self.http.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => ConnectivitySnapshot::online("unknown"),
            Ok(response) => {
                tracing::debug!("reachability probe returned {}", response.status());
                ConnectivitySnapshot {
                    is_connected: Some(true),
                    is_internet_reachable: Some(false),
                    connection_type: "unknown".into(),
                }
            }
            Err(e) if e.is_connect() || e.is_timeout() => {
                tracing::debug!("reachability probe failed: {e}");
                ConnectivitySnapshot::offline()
            }
            Err(e) => {
                tracing::debug!("reachability probe error: {e}");
                ConnectivitySnapshot {
                    is_connected: Some(true),
                    is_internet_reachable: Some(false),
                    connection_type: "unknown".into(),
                }
            }
        }
    }

    fn publish(&self, snapshot: ConnectivitySnapshot) {
        self.tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    /// Spawn the polling loop. Subscribers only see changes.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let probe = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let snapshot = probe.probe().await;
                probe.publish(snapshot);
            }
        })
    }
}

#[async_trait]
impl ConnectivitySource for HttpProbe {
    async fn fetch(&self) -> ConnectivitySnapshot {
        let snapshot = self.probe().await;
        self.publish(snapshot.clone());
        snapshot
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivitySnapshot> {
        self.tx.subscribe()
    }
}
