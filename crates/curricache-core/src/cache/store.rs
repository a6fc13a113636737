//! In-memory cache store.
//!
//! The store owns every [`CacheEntry`]: nothing outside this module mutates
//! one. Each namespace is a keyed map behind a mutex that is never held
//! across an `.await`. Every mutation bumps a shared generation counter that
//! subscribers can wait on.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use super::entry::CacheEntry;
use super::snapshot::CacheSnapshot;
use crate::freshness::{self, STALE_TIMESTAMP};
use crate::models::{Curriculum, DashboardData};

// ============================================================================
// Namespaces
// ============================================================================

/// The three independently keyed cache namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    UserCurricula,
    IndividualCurriculum,
    Dashboard,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [
        CacheKind::UserCurricula,
        CacheKind::IndividualCurriculum,
        CacheKind::Dashboard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::UserCurricula => "userCurricula",
            CacheKind::IndividualCurriculum => "individualCurriculum",
            CacheKind::Dashboard => "dashboard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        CacheKind::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Change notification
// ============================================================================

struct ChangeNotifier {
    tx: watch::Sender<u64>,
}

impl ChangeNotifier {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    fn bump(&self) {
        // send_modify succeeds even when nobody is subscribed.
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

/// Handle returned by [`CacheStore::subscribe`].
///
/// Dropping it (or calling [`unsubscribe`](Self::unsubscribe)) detaches the
/// observer.
pub struct StoreSubscription {
    rx: watch::Receiver<u64>,
}

impl StoreSubscription {
    /// Wait for the next store mutation. Returns `false` once the store is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Number of mutations observed so far.
    pub fn generation(&self) -> u64 {
        *self.rx.borrow()
    }

    pub fn unsubscribe(self) {}
}

// ============================================================================
// Claims
// ============================================================================

/// Proof that the holder owns the in-flight fetch for one key.
#[derive(Debug)]
pub struct FetchTicket {
    key: String,
    fetch_id: u64,
    epoch: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Outcome of [`Namespace::claim`].
#[derive(Debug)]
pub enum Claim<T> {
    /// Fresh data, no fetch needed.
    Hit(T),
    /// Another caller is already fetching this key. Carries whatever data is
    /// cached right now.
    InFlight(Option<T>),
    /// Offline with cached data; served regardless of age.
    Offline(T),
    /// The caller now owns the fetch and must finish it with
    /// [`Namespace::complete`] or [`Namespace::fail`].
    Fetch(FetchTicket),
}

/// Result of handing a fetched value back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Committed,
    /// The key was invalidated, replaced or removed while the fetch ran.
    Discarded,
}

// ============================================================================
// Namespace
// ============================================================================

pub struct Namespace<T> {
    kind: CacheKind,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    sequence: AtomicU64,
    changes: Arc<ChangeNotifier>,
}

impl<T: Clone> Namespace<T> {
    fn new(kind: CacheKind, changes: Arc<ChangeNotifier>) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            changes,
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        // Entries are plain data, so a poisoned lock is still safe to read.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.lock().get(key).cloned()
    }

    pub fn set(&self, key: &str, mut entry: CacheEntry<T>) {
        entry.epoch = self.next_seq();
        entry.in_flight = None;
        self.lock().insert(key.to_string(), entry);
        self.changes.bump();
    }

    /// Reset the timestamp so the next read refetches, keeping data for
    /// offline fallback. An in-flight fetch for the key will be discarded.
    pub fn mark_stale(&self, key: &str) {
        let epoch = self.next_seq();
        if let Some(entry) = self.lock().get_mut(key) {
            entry.timestamp = STALE_TIMESTAMP;
            entry.epoch = epoch;
        }
        self.changes.bump();
    }

    pub fn delete(&self, key: &str) {
        self.lock().remove(key);
        self.changes.bump();
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.changes.bump();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Decide how to serve a read and, when a fetch is needed, mark the entry
    /// loading in the same critical section so concurrent readers see it.
    pub fn claim(&self, key: &str, force_refresh: bool, online: bool, now: i64) -> Claim<T> {
        let fetch_id = self.next_seq();
        let claim = {
            let mut entries = self.lock();
            let entry = entries.entry(key.to_string()).or_insert_with(CacheEntry::empty);

            if !force_refresh && !entry.loading && entry.is_valid(now) {
                if let Some(ref data) = entry.data {
                    return Claim::Hit(data.clone());
                }
            }

            if entry.loading {
                return Claim::InFlight(entry.data.clone());
            }

            if !online {
                if let Some(ref data) = entry.data {
                    return Claim::Offline(data.clone());
                }
            }

            entry.loading = true;
            entry.epoch = fetch_id;
            entry.in_flight = Some(fetch_id);
            Claim::Fetch(FetchTicket {
                key: key.to_string(),
                fetch_id,
                epoch: fetch_id,
            })
        };
        self.changes.bump();
        claim
    }

    /// Commit a successful fetch unless the entry moved on while it ran.
    pub fn complete(&self, ticket: FetchTicket, data: T, now: i64) -> Commit {
        let commit = {
            let mut entries = self.lock();
            match entries.get_mut(&ticket.key) {
                Some(entry) if entry.in_flight == Some(ticket.fetch_id) => {
                    entry.loading = false;
                    entry.in_flight = None;
                    if entry.epoch == ticket.epoch {
                        entry.data = Some(data);
                        entry.timestamp = now;
                        entry.is_offline_data = false;
                        Commit::Committed
                    } else {
                        Commit::Discarded
                    }
                }
                // Cleared, or replaced by another writer: that state is newer.
                _ => return Commit::Discarded,
            }
        };
        if commit == Commit::Discarded {
            debug!(namespace = %self.kind, key = %ticket.key, "Discarding fetch result invalidated mid-flight");
        }
        self.changes.bump();
        commit
    }

    /// Record a failed fetch. Returns the data to fall back on, if any.
    ///
    /// With prior data the entry keeps it and is flagged as offline data;
    /// without, it is reset to empty.
    pub fn fail(&self, ticket: FetchTicket) -> Option<T> {
        let fallback = {
            let mut entries = self.lock();
            match entries.get_mut(&ticket.key) {
                Some(entry) if entry.in_flight == Some(ticket.fetch_id) => {
                    entry.loading = false;
                    entry.in_flight = None;
                    match entry.data {
                        Some(ref data) => {
                            entry.is_offline_data = true;
                            Some(data.clone())
                        }
                        None => {
                            entry.timestamp = STALE_TIMESTAMP;
                            None
                        }
                    }
                }
                Some(entry) => return entry.data.clone(),
                None => return None,
            }
        };
        self.changes.bump();
        fallback
    }

    /// Recompute the data of an idle, populated entry in place.
    ///
    /// A fresh entry has its timestamp moved to `now`. A stale entry stays
    /// stale so the next read still refetches it.
    pub fn refresh_existing(&self, key: &str, now: i64, f: impl FnOnce(&T) -> T) -> bool {
        let refreshed = {
            let mut entries = self.lock();
            match entries.get_mut(key) {
                Some(entry) if !entry.loading => match entry.data {
                    Some(ref data) => {
                        entry.data = Some(f(data));
                        if entry.timestamp != STALE_TIMESTAMP {
                            entry.timestamp = now;
                            entry.is_offline_data = false;
                        }
                        true
                    }
                    None => false,
                },
                _ => false,
            }
        };
        if refreshed {
            self.changes.bump();
        }
        refreshed
    }

    /// Remove idle entries whose TTL has elapsed. Returns how many were removed.
    pub fn sweep_expired(&self, now: i64) -> usize {
        let removed = {
            let mut entries = self.lock();
            let before = entries.len();
            entries.retain(|_, entry| entry.loading || freshness::is_valid(entry.timestamp, now));
            before - entries.len()
        };
        if removed > 0 {
            self.changes.bump();
        }
        removed
    }

    pub fn snapshot(&self) -> HashMap<String, CacheEntry<T>> {
        self.lock()
            .iter()
            .filter(|(_, entry)| entry.has_data())
            .map(|(key, entry)| {
                let mut entry = entry.clone();
                entry.loading = false;
                entry.in_flight = None;
                (key.clone(), entry)
            })
            .collect()
    }

    /// Load entries from a snapshot. Keys already present in memory win.
    pub fn restore(&self, saved: HashMap<String, CacheEntry<T>>) -> usize {
        let mut restored = 0;
        {
            let mut entries = self.lock();
            for (key, mut entry) in saved {
                if entries.contains_key(&key) {
                    continue;
                }
                entry.loading = false;
                entry.in_flight = None;
                entry.epoch = self.next_seq();
                entries.insert(key, entry);
                restored += 1;
            }
        }
        if restored > 0 {
            self.changes.bump();
        }
        restored
    }
}

// ============================================================================
// Store
// ============================================================================

/// All cached curriculum state for one session.
pub struct CacheStore {
    pub user_curricula: Namespace<Vec<Curriculum>>,
    pub individual_curriculum: Namespace<Option<Curriculum>>,
    pub dashboard: Namespace<DashboardData>,
    changes: Arc<ChangeNotifier>,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        let changes = Arc::new(ChangeNotifier::new());
        Self {
            user_curricula: Namespace::new(CacheKind::UserCurricula, Arc::clone(&changes)),
            individual_curriculum: Namespace::new(
                CacheKind::IndividualCurriculum,
                Arc::clone(&changes),
            ),
            dashboard: Namespace::new(CacheKind::Dashboard, Arc::clone(&changes)),
            changes,
            last_sync: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> StoreSubscription {
        StoreSubscription {
            rx: self.changes.tx.subscribe(),
        }
    }

    /// Wake subscribers without changing anything.
    pub fn notify(&self) {
        self.changes.bump();
    }

    pub fn clear(&self) {
        self.user_curricula.clear();
        self.individual_curriculum.clear();
        self.dashboard.clear();
    }

    pub fn sweep_expired(&self, now: i64) -> usize {
        self.user_curricula.sweep_expired(now)
            + self.individual_curriculum.sweep_expired(now)
            + self.dashboard.sweep_expired(now)
    }

    pub fn record_sync(&self, at: DateTime<Utc>) {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn entry_counts(&self) -> [(CacheKind, usize); 3] {
        [
            (CacheKind::UserCurricula, self.user_curricula.len()),
            (CacheKind::IndividualCurriculum, self.individual_curriculum.len()),
            (CacheKind::Dashboard, self.dashboard.len()),
        ]
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            user_curricula: self.user_curricula.snapshot(),
            individual_curriculum: self.individual_curriculum.snapshot(),
            dashboard: self.dashboard.snapshot(),
            last_sync: self.last_sync(),
        }
    }

    pub fn restore(&self, snapshot: CacheSnapshot) -> usize {
        if let Some(at) = snapshot.last_sync {
            let mut last = self.last_sync.lock().unwrap_or_else(PoisonError::into_inner);
            if last.map_or(true, |current| current < at) {
                *last = Some(at);
            }
        }
        self.user_curricula.restore(snapshot.user_curricula)
            + self.individual_curriculum.restore(snapshot.individual_curriculum)
            + self.dashboard.restore(snapshot.dashboard)
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
