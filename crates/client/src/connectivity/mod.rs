//! Network reachability tracking.
//!
//! A [`ConnectivitySource`] reports the platform's view of the network; the
//! [`ConnectivityMonitor`] keeps the live snapshot and drives the offline
//! banner from it.

pub mod banner;
pub mod monitor;
pub mod probe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub use banner::{Banner, BannerState};
pub use monitor::ConnectivityMonitor;
pub use probe::HttpProbe;

/// Point-in-time network state. `None` means the platform does not know yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySnapshot {
    pub is_connected: Option<bool>,
    pub is_internet_reachable: Option<bool>,
    pub connection_type: String,
}

impl ConnectivitySnapshot {
    pub fn unknown() -> Self {
        Self { is_connected: None, is_internet_reachable: None, connection_type: "unknown".into() }
    }

    pub fn online(connection_type: impl Into<String>) -> Self {
        Self { is_connected: Some(true), is_internet_reachable: Some(true), connection_type: connection_type.into() }
    }

    pub fn offline() -> Self {
        Self { is_connected: Some(false), is_internet_reachable: Some(false), connection_type: "none".into() }
    }

    /// Connected and reachable. Unknown counts as not online.
    pub fn is_online(&self) -> bool {
        self.is_connected == Some(true) && self.is_internet_reachable == Some(true)
    }
}

impl Default for ConnectivitySnapshot {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Provider of connectivity state.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// One-shot probe of the current state.
    async fn fetch(&self) -> ConnectivitySnapshot;

    /// Change notifications. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> watch::Receiver<ConnectivitySnapshot>;
}

/// A source whose state is set by the embedding application.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<ConnectivitySnapshot>,
}

impl ManualConnectivity {
    pub fn new(initial: ConnectivitySnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publish `snapshot`. Subscribers are only notified of actual changes.
    pub fn set(&self, snapshot: ConnectivitySnapshot) {
        self.tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    pub fn set_online(&self, online: bool) {
        self.set(if online { ConnectivitySnapshot::online("unknown") } else { ConnectivitySnapshot::offline() });
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(ConnectivitySnapshot::online("unknown"))
    }
}

#[async_trait]
impl ConnectivitySource for ManualConnectivity {
    async fn fetch(&self) -> ConnectivitySnapshot {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivitySnapshot> {
        self.tx.subscribe()
    }
}
