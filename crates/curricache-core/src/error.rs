use thiserror::Error;

use crate::api::ApiError;
use crate::cache::CacheKind;

/// Errors returned by [`crate::CurriculumCache`] reads.
///
/// Remote failures with cached data to fall back on never surface here; the
/// stale data is returned instead, flagged as offline data on the entry.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("No cached {namespace} data for '{key}' and the remote fetch failed: {source}")]
    NoCachedFallback {
        namespace: CacheKind,
        key: String,
        #[source]
        source: ApiError,
    },
}

impl CacheError {
    pub fn api_error(&self) -> &ApiError {
        match self {
            CacheError::NoCachedFallback { source, .. } => source,
        }
    }
}

/// Failure to reach the background synchronization agent. Logged and swallowed.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync agent disconnected")]
    Disconnected,

    #[error("Sync agent rejected the request: {0}")]
    Rejected(String),
}
