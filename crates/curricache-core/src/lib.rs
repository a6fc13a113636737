//! Curricache core - client-side caching for curriculum data.
//!
//! Reads go through [`CurriculumCache`], which keeps per-key freshness,
//! collapses concurrent fetches of the same key into one remote call and
//! falls back to stale data when the backend is unreachable. Writes made
//! elsewhere are reported through the invalidation methods and announced to
//! other sessions over the [`sync`] bridge.

pub mod api;
pub mod cache;
pub mod cleanup;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod dashboard;
pub mod error;
pub mod freshness;
pub mod models;
pub mod sync;

pub use api::{ApiClient, ApiError, CurriculumSource};
pub use cache::{CacheEntry, CacheKind, CacheSnapshot, CacheStore, EntryState, SnapshotStore};
pub use cleanup::{spawn_cleanup, CleanupTask, DEFAULT_CLEANUP_INTERVAL};
pub use config::Config;
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe};
pub use coordinator::{CurriculumCache, CurriculumWrite};
pub use error::{CacheError, SyncError};
pub use freshness::{Clock, ManualClock, SystemClock, CACHE_TTL_MS};
pub use sync::{
    spawn_sync_listener, ChannelSyncAgent, InvalidationScope, SyncAgent, SyncBridge, SyncMessage,
};
