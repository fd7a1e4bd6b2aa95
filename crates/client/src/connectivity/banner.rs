//! Offline banner state machine.
//!
//! ```text
//! HIDDEN --offline--> SHOWING_OFFLINE --online--> SHOWING_RECONNECTED --hide elapsed--> HIDDEN
//!                            ^                              |
//!                            +----------offline-------------+
//! ```
//!
//! The hide timer itself lives in the monitor; this type only decides
//! transitions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BannerState {
    #[default]
    Hidden,
    ShowingOffline,
    ShowingReconnected,
}

#[derive(Debug, Default)]
pub struct Banner {
    state: BannerState,
}

impl Banner {
    pub fn state(&self) -> BannerState {
        self.state
    }

    /// Apply a connectivity observation and return the new state.
    pub fn on_connectivity(&mut self, online: bool) -> BannerState {
        self.state = match (self.state, online) {
            (_, false) => BannerState::ShowingOffline,
            (BannerState::ShowingOffline, true) => BannerState::ShowingReconnected,
            (state, true) => state,
        };
        self.state
    }

    /// The reconnected banner's display time ran out.
    pub fn on_hide_elapsed(&mut self) -> BannerState {
        if self.state == BannerState::ShowingReconnected {
            self.state = BannerState::Hidden;
        }
        self.state
    }

    /// Whether a hide timer should be running.
    pub fn wants_hide_timer(&self) -> bool {
        self.state == BannerState::ShowingReconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut banner = Banner::default();
        assert_eq!(banner.on_connectivity(true), BannerState::Hidden);
        assert_eq!(banner.on_connectivity(false), BannerState::ShowingOffline);
        assert_eq!(banner.on_connectivity(true), BannerState::ShowingReconnected);
        assert!(banner.wants_hide_timer());
        assert_eq!(banner.on_hide_elapsed(), BannerState::Hidden);
    }

    #[test]
    fn test_offline_again_before_hide() {
        let mut banner = Banner::default();
        banner.on_connectivity(false);
        banner.on_connectivity(true);
        assert_eq!(banner.on_connectivity(false), BannerState::ShowingOffline);
        assert!(!banner.wants_hide_timer());
        // a late timer must not hide the offline banner
        assert_eq!(banner.on_hide_elapsed(), BannerState::ShowingOffline);
    }

    #[test]
    fn test_repeated_online_keeps_reconnected() {
        let mut banner = Banner::default();
        banner.on_connectivity(false);
        banner.on_connectivity(true);
        assert_eq!(banner.on_connectivity(true), BannerState::ShowingReconnected);
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(serde_json::to_string(&BannerState::ShowingOffline).unwrap(), "\"SHOWING_OFFLINE\"");
    }
}
