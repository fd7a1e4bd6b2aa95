//! Live connectivity state and banner driver.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{Banner, BannerState, ConnectivitySnapshot, ConnectivitySource};

/// Tracks the current [`ConnectivitySnapshot`] and the banner derived from it.
///
/// [`start`](Self::start) seeds the state with a one-shot probe, then follows
/// the source's change notifications until [`stop`](Self::stop).
pub struct ConnectivityMonitor {
    source: Arc<dyn ConnectivitySource>,
    snapshot: Arc<watch::Sender<ConnectivitySnapshot>>,
    banner: Arc<watch::Sender<BannerState>>,
    hide_after: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("snapshot", &*self.snapshot.borrow())
            .field("banner", &*self.banner.borrow())
            .field("hide_after", &self.hide_after)
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    pub fn new(source: Arc<dyn ConnectivitySource>, hide_after: Duration) -> Self {
        let (snapshot, _) = watch::channel(ConnectivitySnapshot::unknown());
        let (banner, _) = watch::channel(BannerState::Hidden);
        Self { source, snapshot: Arc::new(snapshot), banner: Arc::new(banner), hide_after, task: Mutex::new(None) }
    }

    /// Probe once, then follow change notifications in a background task.
    ///
    /// Calling `start` on a running monitor restarts the listener.
    pub async fn start(&self) {
        self.stop();

        let rx = self.source.subscribe();
        let initial = self.source.fetch().await;
        tracing::info!(online = initial.is_online(), connection_type = %initial.connection_type, "connectivity probed");

        let mut banner = Banner::default();
        banner.on_connectivity(initial.is_online());
        self.banner.send_replace(banner.state());
        self.snapshot.send_replace(initial);

        let task = tokio::spawn(follow(rx, self.snapshot.clone(), self.banner.clone(), banner, self.hide_after));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Cancel the listener and any pending banner hide.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.snapshot.borrow().is_online()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivitySnapshot> {
        self.snapshot.subscribe()
    }

    pub fn banner(&self) -> BannerState {
        *self.banner.borrow()
    }

    pub fn subscribe_banner(&self) -> watch::Receiver<BannerState> {
        self.banner.subscribe()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn follow(
    mut rx: watch::Receiver<ConnectivitySnapshot>, snapshot_tx: Arc<watch::Sender<ConnectivitySnapshot>>,
    banner_tx: Arc<watch::Sender<BannerState>>, mut banner: Banner, hide_after: Duration,
) {
    let mut hide_at: Option<Instant> = None;

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    tracing::debug!("connectivity source closed");
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                let online = snapshot.is_online();
                let before = banner.state();
                let after = banner.on_connectivity(online);
                if before != after {
                    tracing::info!(online, banner = ?after, "connectivity changed");
                }
                hide_at = match (banner.wants_hide_timer(), hide_at) {
                    (true, Some(at)) => Some(at),
                    (true, None) => Some(Instant::now() + hide_after),
                    (false, _) => None,
                };
                snapshot_tx.send_replace(snapshot);
            }
            () = tokio::time::sleep_until(hide_at.unwrap_or_else(Instant::now)), if hide_at.is_some() => {
                hide_at = None;
                banner.on_hide_elapsed();
            }
        }

        banner_tx.send_if_modified(|current| {
            if *current == banner.state() {
                return false;
            }
            *current = banner.state();
            true
        });
    }
}
