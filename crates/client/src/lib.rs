//! Runtime layer for offcache.
//!
//! This crate provides the single-flight fetch coordinator, connectivity
//! tracking with the offline banner, and the offline-first fetch policy,
//! wired together by [`CacheContext`].

pub mod connectivity;
pub mod context;
pub mod dedup;
pub mod policy;

pub use connectivity::{
    Banner, BannerState, ConnectivityMonitor, ConnectivitySnapshot, ConnectivitySource, HttpProbe, ManualConnectivity,
};
pub use context::CacheContext;
pub use dedup::{DedupOptions, DedupStats, Deduplicator};
pub use policy::{FetchState, OfflineFirst, OfflineQuery};
