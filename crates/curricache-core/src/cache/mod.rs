//! Curriculum caching.
//!
//! Three in-memory namespaces keyed by id, each entry carrying its own
//! freshness timestamp and loading flag:
//! - User curricula (keyed by user id)
//! - Individual curricula (keyed by curriculum id)
//! - Dashboard aggregates (keyed by user id)
//!
//! Snapshots of the populated entries can be persisted as JSON so an offline
//! start still has something to serve.

pub mod entry;
pub mod snapshot;
pub mod store;

pub use entry::{CacheEntry, EntryState};
pub use snapshot::{age_display, CacheSnapshot, CachedData, SnapshotStore};
pub use store::{
    CacheKind, CacheStore, Claim, Commit, FetchTicket, Namespace, StoreSubscription,
};
