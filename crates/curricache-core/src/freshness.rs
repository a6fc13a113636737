//! Freshness policy and time source.
//!
//! Cached data is valid for a fixed five minutes after a successful fetch.
//! A timestamp of `0` marks an entry as stale regardless of the clock.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Time-to-live for every cache namespace, in milliseconds.
pub const CACHE_TTL_MS: i64 = 5 * 60 * 1000;

/// Sentinel timestamp for entries that must be refetched on next access.
pub const STALE_TIMESTAMP: i64 = 0;

/// Whether data fetched at `timestamp` is still fresh at `now` (both epoch-ms).
pub fn is_valid(timestamp: i64, now: i64) -> bool {
    timestamp != STALE_TIMESTAMP && now - timestamp < CACHE_TTL_MS
}

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to. Used in tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
