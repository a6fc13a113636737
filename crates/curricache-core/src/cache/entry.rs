use serde::{Deserialize, Serialize};

use crate::freshness::{self, STALE_TIMESTAMP};

/// Three-way view of an entry, separating "never fetched" from "stale".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// No data has been fetched, or the last fetch failed with nothing to fall back on.
    Empty,
    /// Data is within TTL.
    Fresh,
    /// Data exists but expired or was invalidated.
    Stale,
}

/// A single cached value with its fetch bookkeeping.
///
/// `data` from a previous fetch is kept while a refetch is in flight and after
/// the entry is marked stale, so readers always have something to show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: Option<T>,
    /// Epoch-ms of the last successful fetch, or `0` when stale.
    pub timestamp: i64,
    pub loading: bool,
    pub is_offline_data: bool,
    /// Bumped by every claim and invalidation.
    #[serde(skip)]
    pub(crate) epoch: u64,
    /// Id of the fetch that currently owns `loading`.
    #[serde(skip)]
    pub(crate) in_flight: Option<u64>,
}

impl<T> CacheEntry<T> {
    /// An entry holding freshly fetched data.
    pub fn fresh(data: T, now: i64) -> Self {
        Self {
            data: Some(data),
            timestamp: now,
            loading: false,
            is_offline_data: false,
            epoch: 0,
            in_flight: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            data: None,
            timestamp: STALE_TIMESTAMP,
            loading: false,
            is_offline_data: false,
            epoch: 0,
            in_flight: None,
        }
    }

    pub fn is_valid(&self, now: i64) -> bool {
        freshness::is_valid(self.timestamp, now)
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn state(&self, now: i64) -> EntryState {
        match (&self.data, self.is_valid(now)) {
            (None, _) => EntryState::Empty,
            (Some(_), true) => EntryState::Fresh,
            (Some(_), false) => EntryState::Stale,
        }
    }
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self::empty()
    }
}
