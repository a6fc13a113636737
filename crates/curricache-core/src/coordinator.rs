//! Fetch coordination.
//!
//! `CurriculumCache` is the single entry point for curriculum reads. Each
//! accessor consults the store, issues at most one remote call per key at a
//! time, and folds the result (or the failure) back into the store.
//!
//! While a fetch is in flight, other readers of the same key get whatever is
//! cached right now (or an empty default) instead of waiting. Callers that
//! need the fetched value subscribe to store changes and read again.

use std::future::Future;
use std::sync::Arc;

use chrono::DateTime;
use tracing::{debug, info, warn};

use crate::api::{ApiError, CurriculumSource};
use crate::cache::{
    CacheEntry, CacheKind, CacheSnapshot, CacheStore, Claim, Commit, Namespace, StoreSubscription,
};
use crate::connectivity::ConnectivityMonitor;
use crate::dashboard::aggregate;
use crate::error::CacheError;
use crate::freshness::{Clock, SystemClock};
use crate::models::{Curriculum, DashboardData};
use crate::sync::{InvalidationScope, SyncBridge, SyncMessage};

/// A write made elsewhere that makes cached curriculum data out of date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurriculumWrite {
    Saved {
        user_id: String,
        curriculum_id: String,
    },
    Deleted {
        user_id: String,
        curriculum_id: String,
    },
    /// A copy was created for the user; no existing curriculum changed.
    Forked { user_id: String },
}

pub struct CurriculumCache {
    store: Arc<CacheStore>,
    source: Arc<dyn CurriculumSource>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<ConnectivityMonitor>,
    bridge: SyncBridge,
}

impl CurriculumCache {
    pub fn new(source: Arc<dyn CurriculumSource>) -> Self {
        Self {
            store: Arc::new(CacheStore::new()),
            source,
            clock: Arc::new(SystemClock),
            connectivity: Arc::new(ConnectivityMonitor::default()),
            bridge: SyncBridge::detached(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Announce invalidations through `bridge`. The connectivity monitor
    /// uses the same bridge for reconnect resyncs.
    pub fn with_sync_bridge(mut self, bridge: SyncBridge) -> Self {
        self.connectivity.attach_bridge(bridge.clone());
        self.bridge = bridge;
        self
    }

    /// Use a shared monitor. An attached sync bridge is carried over to it.
    pub fn with_connectivity(mut self, connectivity: Arc<ConnectivityMonitor>) -> Self {
        if self.bridge.is_attached() {
            connectivity.attach_bridge(self.bridge.clone());
        }
        self.connectivity = connectivity;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Observe every store mutation, including loading-state changes.
    pub fn subscribe(&self) -> StoreSubscription {
        self.store.subscribe()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Curricula owned by `user_id`.
    pub async fn user_curricula(
        &self,
        user_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<Curriculum>, CacheError> {
        let (curricula, fetched) = self
            .get_or_fetch(
                &self.store.user_curricula,
                user_id,
                force_refresh,
                self.source.fetch_user_curricula(user_id),
            )
            .await?;

        if fetched {
            self.refresh_dashboard(user_id, &curricula);
        }
        Ok(curricula)
    }

    /// A single curriculum. `Ok(None)` when the remote has no such id.
    pub async fn curriculum(
        &self,
        id: &str,
        force_refresh: bool,
    ) -> Result<Option<Curriculum>, CacheError> {
        let (curriculum, _) = self
            .get_or_fetch(
                &self.store.individual_curriculum,
                id,
                force_refresh,
                self.source.fetch_curriculum_by_id(id),
            )
            .await?;
        Ok(curriculum)
    }

    /// Dashboard aggregate for `user_id`.
    ///
    /// Reuses fresh cached curricula when available; completions are always
    /// fetched.
    pub async fn dashboard(
        &self,
        user_id: &str,
        force_refresh: bool,
    ) -> Result<DashboardData, CacheError> {
        let fetch = async {
            let cached = if force_refresh {
                None
            } else {
                let now = self.clock.now_millis();
                self.store
                    .user_curricula
                    .get(user_id)
                    .filter(|entry| !entry.loading && entry.is_valid(now))
                    .and_then(|entry| entry.data)
            };

            let (curricula, completions) = match cached {
                Some(curricula) => {
                    debug!(user_id, "Building dashboard from cached curricula");
                    let completions = self.source.fetch_all_module_completions(user_id).await?;
                    (curricula, completions)
                }
                None => {
                    futures::try_join!(
                        self.source.fetch_user_curricula(user_id),
                        self.source.fetch_all_module_completions(user_id),
                    )?
                }
            };
            Ok::<_, ApiError>(aggregate(&curricula, &completions))
        };

        let (dashboard, _) = self
            .get_or_fetch(&self.store.dashboard, user_id, force_refresh, fetch)
            .await?;
        Ok(dashboard)
    }

    pub fn user_curricula_entry(&self, user_id: &str) -> Option<CacheEntry<Vec<Curriculum>>> {
        self.store.user_curricula.get(user_id)
    }

    pub fn curriculum_entry(&self, id: &str) -> Option<CacheEntry<Option<Curriculum>>> {
        self.store.individual_curriculum.get(id)
    }

    pub fn dashboard_entry(&self, user_id: &str) -> Option<CacheEntry<DashboardData>> {
        self.store.dashboard.get(user_id)
    }

    /// Shared read path. Returns the data and whether it came from a fetch
    /// that was committed to the store.
    async fn get_or_fetch<T, F>(
        &self,
        namespace: &Namespace<T>,
        key: &str,
        force_refresh: bool,
        fetch: F,
    ) -> Result<(T, bool), CacheError>
    where
        T: Clone + Default,
        F: Future<Output = Result<T, ApiError>>,
    {
        let kind = namespace.kind();
        let now = self.clock.now_millis();

        let ticket = match namespace.claim(key, force_refresh, self.is_online(), now) {
            Claim::Hit(data) => {
                debug!(namespace = %kind, key, "Cache hit");
                return Ok((data, false));
            }
            Claim::InFlight(data) => {
                debug!(namespace = %kind, key, "Fetch already in flight, serving current data");
                return Ok((data.unwrap_or_default(), false));
            }
            Claim::Offline(data) => {
                debug!(namespace = %kind, key, "Offline, serving cached data");
                return Ok((data, false));
            }
            Claim::Fetch(ticket) => ticket,
        };

        debug!(namespace = %kind, key, force_refresh, "Fetching from remote");
        match fetch.await {
            Ok(data) => {
                let now = self.clock.now_millis();
                let committed = namespace.complete(ticket, data.clone(), now) == Commit::Committed;
                if committed {
                    if let Some(at) = DateTime::from_timestamp_millis(now) {
                        self.store.record_sync(at);
                    }
                }
                Ok((data, committed))
            }
            Err(e) => match namespace.fail(ticket) {
                Some(prior) => {
                    warn!(namespace = %kind, key, error = %e, "Fetch failed, serving cached data");
                    Ok((prior, false))
                }
                None => {
                    warn!(namespace = %kind, key, error = %e, "Fetch failed with nothing cached");
                    Err(CacheError::NoCachedFallback {
                        namespace: kind,
                        key: key.to_string(),
                        source: e,
                    })
                }
            },
        }
    }

    /// Re-derive an existing dashboard from freshly fetched curricula.
    fn refresh_dashboard(&self, user_id: &str, curricula: &[Curriculum]) {
        let now = self.clock.now_millis();
        let refreshed = self.store.dashboard.refresh_existing(user_id, now, |previous| {
            aggregate(curricula, &previous.module_completions)
        });
        if refreshed {
            debug!(user_id, "Dashboard re-derived from new curricula");
        }
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Mark a user's curriculum list and dashboard stale.
    pub fn invalidate_user(&self, user_id: &str) {
        for kind in [CacheKind::UserCurricula, CacheKind::Dashboard] {
            self.invalidate_key(kind, user_id, Some(user_id), true);
        }
    }

    pub fn invalidate_curriculum(&self, curriculum_id: &str) {
        self.invalidate_key(CacheKind::IndividualCurriculum, curriculum_id, None, true);
    }

    pub fn invalidate_dashboard(&self, user_id: &str) {
        self.invalidate_key(CacheKind::Dashboard, user_id, Some(user_id), true);
    }

    /// Drop everything. Used when the reach of a change is unknown.
    pub fn invalidate_all(&self) {
        self.clear_all(true);
    }

    /// Soft-invalidate whatever a write elsewhere in the system touched.
    pub fn record_write(&self, write: &CurriculumWrite) {
        debug!(?write, "Invalidating after write");
        match write {
            CurriculumWrite::Saved {
                user_id,
                curriculum_id,
            }
            | CurriculumWrite::Deleted {
                user_id,
                curriculum_id,
            } => {
                self.invalidate_user(user_id);
                self.invalidate_key(
                    CacheKind::IndividualCurriculum,
                    curriculum_id,
                    Some(user_id),
                    true,
                );
            }
            CurriculumWrite::Forked { user_id } => self.invalidate_user(user_id),
        }
    }

    /// Apply an inbound message from the sync agent.
    ///
    /// Invalidations announced by other sessions are applied locally without
    /// being announced again.
    pub fn handle_sync_message(&self, message: SyncMessage) {
        match message {
            SyncMessage::SyncCurriculumData => {
                info!("Sync agent requested full resync");
                self.invalidate_all();
            }
            SyncMessage::CacheInvalidate { cache_key, user_id } => {
                match InvalidationScope::parse(&cache_key) {
                    Some(InvalidationScope::All) => self.clear_all(false),
                    Some(InvalidationScope::Key { kind, key }) => {
                        self.invalidate_key(kind, &key, user_id.as_deref(), false)
                    }
                    None => warn!(cache_key = %cache_key, "Ignoring invalidation for unknown cache key"),
                }
            }
        }
    }

    fn invalidate_key(&self, kind: CacheKind, key: &str, user_id: Option<&str>, announce: bool) {
        debug!(namespace = %kind, key, announce, "Marking stale");
        match kind {
            CacheKind::UserCurricula => self.store.user_curricula.mark_stale(key),
            CacheKind::IndividualCurriculum => self.store.individual_curriculum.mark_stale(key),
            CacheKind::Dashboard => self.store.dashboard.mark_stale(key),
        }
        if announce {
            let scope = InvalidationScope::Key {
                kind,
                key: key.to_string(),
            };
            self.bridge.notify_invalidation(&scope, user_id);
        }
    }

    fn clear_all(&self, announce: bool) {
        info!(announce, "Clearing all curriculum caches");
        self.store.clear();
        if announce {
            self.bridge.notify_invalidation(&InvalidationScope::All, None);
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Delete idle entries past their TTL. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.store.sweep_expired(self.clock.now_millis());
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.store.snapshot()
    }

    pub fn restore(&self, snapshot: CacheSnapshot) -> usize {
        let restored = self.store.restore(snapshot);
        debug!(restored, "Restored cache entries from snapshot");
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use futures::future::{join_all, BoxFuture, FutureExt};
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::sync::Notify;

    use crate::freshness::{ManualClock, CACHE_TTL_MS};
    use crate::models::{CurriculumType, DailyModule, FullCurriculumData, ModuleCompletion};
    use crate::sync::{spawn_sync_listener, ChannelSyncAgent, BACKGROUND_SYNC_TAG};

    const START: i64 = 1_700_000_000_000;

    /// Holds a fetch open until the test releases it.
    #[derive(Default)]
    struct Gate {
        started: Notify,
        release: Notify,
    }

    #[derive(Default)]
    struct MockSource {
        curricula: Mutex<Vec<Curriculum>>,
        completions: Mutex<Vec<ModuleCompletion>>,
        fail: AtomicBool,
        gate: Mutex<Option<Arc<Gate>>>,
        list_calls: AtomicUsize,
        by_id_calls: AtomicUsize,
        completion_calls: AtomicUsize,
    }

    impl MockSource {
        fn set_curricula(&self, curricula: Vec<Curriculum>) {
            *self.curricula.lock().unwrap() = curricula;
        }

        fn gate(&self) -> Arc<Gate> {
            let gate = Arc::new(Gate::default());
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        async fn pass_gate(&self) {
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.started.notify_one();
                gate.release.notified().await;
            }
        }

        fn check(&self) -> Result<(), ApiError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(ApiError::Remote("connection reset".to_string()))
            } else {
                Ok(())
            }
        }

        fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }
    }

    impl CurriculumSource for MockSource {
        fn fetch_user_curricula<'a>(
            &'a self,
            _user_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<Curriculum>, ApiError>> {
            async move {
                self.list_calls.fetch_add(1, Ordering::SeqCst);
                self.pass_gate().await;
                self.check()?;
                Ok(self.curricula.lock().unwrap().clone())
            }
            .boxed()
        }

        fn fetch_curriculum_by_id<'a>(
            &'a self,
            id: &'a str,
        ) -> BoxFuture<'a, Result<Option<Curriculum>, ApiError>> {
            async move {
                self.by_id_calls.fetch_add(1, Ordering::SeqCst);
                self.check()?;
                Ok(self.curricula.lock().unwrap().iter().find(|c| c.id == id).cloned())
            }
            .boxed()
        }

        fn fetch_all_module_completions<'a>(
            &'a self,
            _user_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<ModuleCompletion>, ApiError>> {
            async move {
                self.completion_calls.fetch_add(1, Ordering::SeqCst);
                self.check()?;
                Ok(self.completions.lock().unwrap().clone())
            }
            .boxed()
        }
    }

    fn curriculum(id: &str, title: &str) -> Curriculum {
        Curriculum {
            id: id.to_string(),
            user_id: Some("user1".to_string()),
            title: title.to_string(),
            curriculum_type: CurriculumType::Text,
            primary_resource_title: Some(format!("{} book", title)),
            primary_resource_author: None,
            primary_resource_isbn: None,
            primary_resource_year: None,
            full_curriculum_data: Some(FullCurriculumData {
                daily_modules: vec![DailyModule {
                    day: 1,
                    date: Some("2024-01-01".to_string()),
                    title: "Day one".to_string(),
                    ..Default::default()
                }],
            }),
            created_at: None,
            updated_at: None,
        }
    }

    fn setup() -> (Arc<MockSource>, Arc<ManualClock>, CurriculumCache) {
        let source = Arc::new(MockSource::default());
        source.set_curricula(vec![curriculum("1", "Systems")]);
        let clock = Arc::new(ManualClock::new(START));
        let cache = CurriculumCache::new(source.clone()).with_clock(clock.clone());
        (source, clock, cache)
    }

    fn with_agent(cache: CurriculumCache) -> (CurriculumCache, UnboundedReceiver<SyncMessage>) {
        let (agent, rx) = ChannelSyncAgent::new();
        (cache.with_sync_bridge(SyncBridge::new(Arc::new(agent))), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<SyncMessage>) -> Vec<String> {
        let mut keys = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let SyncMessage::CacheInvalidate { cache_key, .. } = message {
                keys.push(cache_key);
            }
        }
        keys
    }

    #[tokio::test]
    async fn test_fetch_then_stale_then_refetch() {
        let (source, _clock, cache) = setup();

        let data = cache.user_curricula("user1", false).await.unwrap();
        assert_eq!(data.len(), 1);
        let entry = cache.user_curricula_entry("user1").unwrap();
        assert!(entry.timestamp > 0);
        assert!(!entry.loading);
        assert_eq!(entry.data.as_ref().map(Vec::len), Some(1));
        assert!(cache.store().last_sync().is_some());

        source.set_curricula(vec![curriculum("1", "Systems"), curriculum("2", "Networks")]);
        cache.invalidate_user("user1");
        let entry = cache.user_curricula_entry("user1").unwrap();
        assert_eq!(entry.timestamp, 0);
        assert_eq!(entry.data.as_ref().map(Vec::len), Some(1));

        let data = cache.user_curricula("user1", false).await.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(source.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_from_cache() {
        let (source, clock, cache) = setup();
        cache.user_curricula("user1", false).await.unwrap();
        clock.advance(CACHE_TTL_MS - 1);
        cache.user_curricula("user1", false).await.unwrap();
        assert_eq!(source.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let (source, clock, cache) = setup();
        cache.user_curricula("user1", false).await.unwrap();
        clock.advance(CACHE_TTL_MS);
        cache.user_curricula("user1", false).await.unwrap();
        assert_eq!(source.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_fresh_entry() {
        let (source, _clock, cache) = setup();
        cache.user_curricula("user1", false).await.unwrap();
        cache.user_curricula("user1", true).await.unwrap();
        assert_eq!(source.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_reads_issue_one_remote_call() {
        let (source, _clock, cache) = setup();
        let cache = Arc::new(cache);
        let gate = source.gate();

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.user_curricula("user1", false).await }
        });
        gate.started.notified().await;

        // Readers during the fetch get the current (empty) value immediately
        // rather than the eventual result.
        let others = join_all((0..5).map(|_| cache.user_curricula("user1", false))).await;
        for result in others {
            assert!(result.unwrap().is_empty());
        }
        assert!(cache.user_curricula_entry("user1").unwrap().loading);

        let mut sub = cache.subscribe();
        gate.release.notify_one();
        assert_eq!(first.await.unwrap().unwrap().len(), 1);
        assert!(sub.changed().await);

        // Re-reading after the change notification sees the fetched data.
        assert_eq!(cache.user_curricula("user1", false).await.unwrap().len(), 1);
        assert_eq!(source.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_read_serves_previous_data() {
        let (source, _clock, cache) = setup();
        let cache = Arc::new(cache);
        cache.user_curricula("user1", false).await.unwrap();
        let gate = source.gate();

        let refresh = tokio::spawn({
            let cache = cache.clone();
            async move { cache.user_curricula("user1", true).await }
        });
        gate.started.notified().await;

        assert_eq!(cache.user_curricula("user1", true).await.unwrap().len(), 1);
        gate.release.notify_one();
        refresh.await.unwrap().unwrap();
        assert_eq!(source.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_offline_serves_expired_without_remote_call() {
        let (source, clock, cache) = setup();
        cache.user_curricula("user1", false).await.unwrap();

        clock.advance(10 * CACHE_TTL_MS);
        cache.connectivity().set_online(false);

        let data = cache.user_curricula("user1", false).await.unwrap();
        assert_eq!(data.len(), 1);
        let forced = cache.user_curricula("user1", true).await.unwrap();
        assert_eq!(forced.len(), 1);
        assert_eq!(source.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_offline_without_data_still_tries_remote() {
        let (source, _clock, cache) = setup();
        cache.connectivity().set_online(false);
        source.fail.store(true, Ordering::SeqCst);

        assert!(cache.user_curricula("user1", false).await.is_err());
        assert_eq!(source.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_with_prior_data_degrades() {
        let (source, clock, cache) = setup();
        cache.user_curricula("user1", false).await.unwrap();
        clock.advance(CACHE_TTL_MS);
        source.fail.store(true, Ordering::SeqCst);

        let data = cache.user_curricula("user1", false).await.unwrap();
        assert_eq!(data, vec![curriculum("1", "Systems")]);
        let entry = cache.user_curricula_entry("user1").unwrap();
        assert!(entry.is_offline_data);
        assert!(!entry.loading);

        source.fail.store(false, Ordering::SeqCst);
        cache.user_curricula("user1", false).await.unwrap();
        assert!(!cache.user_curricula_entry("user1").unwrap().is_offline_data);
    }

    #[tokio::test]
    async fn test_failure_without_prior_data_errors_and_clears() {
        let (source, _clock, cache) = setup();
        source.fail.store(true, Ordering::SeqCst);

        let err = cache.user_curricula("user1", false).await.unwrap_err();
        match err {
            CacheError::NoCachedFallback {
                namespace,
                ref key,
                ..
            } => {
                assert_eq!(namespace, CacheKind::UserCurricula);
                assert_eq!(key, "user1");
            }
        }
        assert!(matches!(err.api_error(), ApiError::Remote(_)));

        let entry = cache.user_curricula_entry("user1").unwrap();
        assert_eq!(entry.data, None);
        assert_eq!(entry.timestamp, 0);
        assert!(!entry.loading);
    }

    #[tokio::test]
    async fn test_missing_curriculum_is_cached_as_none() {
        let (source, _clock, cache) = setup();
        assert!(cache.curriculum("404", false).await.unwrap().is_none());
        assert!(cache.curriculum("404", false).await.unwrap().is_none());
        assert_eq!(source.by_id_calls.load(Ordering::SeqCst), 1);

        let found = cache.curriculum("1", false).await.unwrap();
        assert_eq!(found.map(|c| c.title), Some("Systems".to_string()));
    }

    #[tokio::test]
    async fn test_dashboard_fetches_curricula_and_completions() {
        let (source, _clock, cache) = setup();
        *source.completions.lock().unwrap() = vec![ModuleCompletion {
            curriculum_id: "1".to_string(),
            day_number: 1,
            completed: true,
            completed_at: None,
        }];

        let dashboard = cache.dashboard("user1", false).await.unwrap();
        assert_eq!(dashboard.curricula.len(), 1);
        assert_eq!(dashboard.daily_modules.len(), 1);
        assert!(dashboard.daily_modules[0].completed);
        assert_eq!(dashboard.book_resources.len(), 1);
        assert_eq!(source.list_calls(), 1);
        assert_eq!(source.completion_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dashboard_reuses_fresh_curricula() {
        let (source, _clock, cache) = setup();
        cache.user_curricula("user1", false).await.unwrap();
        cache.dashboard("user1", false).await.unwrap();
        assert_eq!(source.list_calls(), 1);

        cache.dashboard("user1", true).await.unwrap();
        assert_eq!(source.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_curricula_fetch_rederives_dashboard() {
        let (source, clock, cache) = setup();
        *source.completions.lock().unwrap() = vec![ModuleCompletion {
            curriculum_id: "2".to_string(),
            day_number: 1,
            completed: true,
            completed_at: None,
        }];
        cache.dashboard("user1", false).await.unwrap();

        source.set_curricula(vec![curriculum("1", "Systems"), curriculum("2", "Networks")]);
        clock.advance(1_000);
        cache.user_curricula("user1", true).await.unwrap();

        let entry = cache.dashboard_entry("user1").unwrap();
        let dashboard = entry.data.unwrap();
        assert_eq!(dashboard.curricula.len(), 2);
        assert_eq!(dashboard.daily_modules.len(), 2);
        assert!(dashboard.modules_for("2").all(|m| m.completed));
        assert_eq!(entry.timestamp, START + 1_000);
        assert_eq!(source.completion_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidated_dashboard_stays_stale_after_list_fetch() {
        let (source, clock, cache) = setup();
        cache.dashboard("user1", false).await.unwrap();

        *source.completions.lock().unwrap() = vec![ModuleCompletion {
            curriculum_id: "1".to_string(),
            day_number: 1,
            completed: true,
            completed_at: None,
        }];
        cache.invalidate_dashboard("user1");
        clock.advance(1_000);
        cache.user_curricula("user1", true).await.unwrap();
        assert_eq!(cache.dashboard_entry("user1").unwrap().timestamp, 0);

        let dashboard = cache.dashboard("user1", false).await.unwrap();
        assert_eq!(source.completion_calls.load(Ordering::SeqCst), 2);
        assert!(dashboard.modules_for("1").all(|m| m.completed));
    }

    #[tokio::test]
    async fn test_invalidation_during_fetch_discards_result() {
        let (source, _clock, cache) = setup();
        let cache = Arc::new(cache);
        let gate = source.gate();

        let fetch = tokio::spawn({
            let cache = cache.clone();
            async move { cache.user_curricula("user1", false).await }
        });
        gate.started.notified().await;
        cache.invalidate_user("user1");
        gate.release.notify_one();

        // The caller still gets what it fetched, but the store keeps the key stale.
        assert_eq!(fetch.await.unwrap().unwrap().len(), 1);
        let entry = cache.user_curricula_entry("user1").unwrap();
        assert_eq!(entry.data, None);
        assert_eq!(entry.timestamp, 0);
        assert!(!entry.loading);

        *source.gate.lock().unwrap() = None;
        cache.user_curricula("user1", false).await.unwrap();
        assert_eq!(source.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidations_are_announced() {
        let (_source, _clock, cache) = setup();
        let (cache, mut rx) = with_agent(cache);

        cache.invalidate_user("user1");
        cache.invalidate_curriculum("c9");
        cache.invalidate_dashboard("user2");
        cache.invalidate_all();

        assert_eq!(
            drain(&mut rx),
            vec![
                "userCurricula:user1",
                "dashboard:user1",
                "individualCurriculum:c9",
                "dashboard:user2",
                "all",
            ]
        );
    }

    #[tokio::test]
    async fn test_invalidation_notifies_even_when_nothing_cached() {
        let (_source, _clock, cache) = setup();
        let mut sub = cache.subscribe();
        let before = sub.generation();
        cache.invalidate_curriculum("nothing-here");
        assert!(sub.changed().await);
        assert!(sub.generation() > before);
    }

    #[tokio::test]
    async fn test_record_write_saved() {
        let (_source, _clock, cache) = setup();
        let (cache, mut rx) = with_agent(cache);
        cache.user_curricula("user1", false).await.unwrap();
        cache.curriculum("1", false).await.unwrap();

        cache.record_write(&CurriculumWrite::Saved {
            user_id: "user1".to_string(),
            curriculum_id: "1".to_string(),
        });

        assert_eq!(cache.user_curricula_entry("user1").unwrap().timestamp, 0);
        assert_eq!(cache.curriculum_entry("1").unwrap().timestamp, 0);
        assert!(cache.curriculum_entry("1").unwrap().data.is_some());
        assert_eq!(
            drain(&mut rx),
            vec!["userCurricula:user1", "dashboard:user1", "individualCurriculum:1"]
        );
    }

    #[tokio::test]
    async fn test_record_write_forked_leaves_curriculum_entries() {
        let (_source, _clock, cache) = setup();
        cache.curriculum("1", false).await.unwrap();
        cache.record_write(&CurriculumWrite::Forked {
            user_id: "user1".to_string(),
        });
        assert!(cache.curriculum_entry("1").unwrap().timestamp > 0);
    }

    #[tokio::test]
    async fn test_inbound_sync_clears_everything() {
        let (_source, _clock, cache) = setup();
        let (cache, mut rx) = with_agent(cache);
        cache.user_curricula("user1", false).await.unwrap();
        cache.curriculum("1", false).await.unwrap();

        cache.handle_sync_message(SyncMessage::SyncCurriculumData);

        assert!(cache.user_curricula_entry("user1").is_none());
        assert!(cache.curriculum_entry("1").is_none());
        assert_eq!(drain(&mut rx), vec!["all"]);
    }

    #[tokio::test]
    async fn test_inbound_invalidate_is_applied_without_echo() {
        let (_source, _clock, cache) = setup();
        let (cache, mut rx) = with_agent(cache);
        cache.user_curricula("user1", false).await.unwrap();

        cache.handle_sync_message(SyncMessage::CacheInvalidate {
            cache_key: "userCurricula:user1".to_string(),
            user_id: Some("user1".to_string()),
        });
        cache.handle_sync_message(SyncMessage::CacheInvalidate {
            cache_key: "bogus".to_string(),
            user_id: None,
        });

        let entry = cache.user_curricula_entry("user1").unwrap();
        assert_eq!(entry.timestamp, 0);
        assert!(entry.data.is_some());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_sync_listener_applies_resync() {
        let (_source, _clock, cache) = setup();
        let cache = Arc::new(cache);
        cache.user_curricula("user1", false).await.unwrap();
        cache.curriculum("1", false).await.unwrap();
        cache.dashboard("user1", false).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let listener = spawn_sync_listener(cache.clone(), rx);
        tx.send(SyncMessage::SyncCurriculumData).unwrap();
        drop(tx);
        listener.await.unwrap();

        assert!(cache.store().user_curricula.is_empty());
        assert!(cache.store().individual_curriculum.is_empty());
        assert!(cache.store().dashboard.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_resyncs_through_attached_agent() {
        let (_source, _clock, cache) = setup();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (agent, _outbound) = ChannelSyncAgent::new();
        let agent = Arc::new(agent.with_resync(inbound_tx));
        let cache = Arc::new(cache.with_sync_bridge(SyncBridge::new(agent.clone())));
        cache.user_curricula("user1", false).await.unwrap();

        let listener = spawn_sync_listener(cache.clone(), inbound_rx);
        let mut sub = cache.subscribe();
        cache.connectivity().set_online(false);
        cache.connectivity().set_online(true);
        assert_eq!(agent.registered_tags(), vec![BACKGROUND_SYNC_TAG.to_string()]);

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !cache.store().user_curricula.is_empty() {
                assert!(sub.changed().await);
            }
        })
        .await
        .unwrap();
        listener.abort();
    }

    #[test]
    fn test_shared_monitor_inherits_sync_bridge() {
        let (agent, _outbound) = ChannelSyncAgent::new();
        let agent = Arc::new(agent);
        let monitor = Arc::new(ConnectivityMonitor::new(false, SyncBridge::detached()));

        let cache = CurriculumCache::new(Arc::new(MockSource::default()))
            .with_sync_bridge(SyncBridge::new(agent.clone()))
            .with_connectivity(monitor.clone());
        monitor.set_online(true);

        assert!(cache.is_online());
        assert_eq!(agent.registered_tags(), vec![BACKGROUND_SYNC_TAG.to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (_source, clock, cache) = setup();
        cache.user_curricula("user1", false).await.unwrap();
        clock.advance(CACHE_TTL_MS / 2);
        cache.curriculum("1", false).await.unwrap();

        clock.advance(CACHE_TTL_MS / 2);
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.user_curricula_entry("user1").is_none());
        assert!(cache.curriculum_entry("1").is_some());
    }

    #[tokio::test]
    async fn test_snapshot_restores_offline_fallback() {
        let (source, clock, cache) = setup();
        cache.user_curricula("user1", false).await.unwrap();
        let snapshot = cache.snapshot();

        let restored = CurriculumCache::new(source.clone()).with_clock(clock.clone());
        assert_eq!(restored.restore(snapshot), 1);
        restored.connectivity().set_online(false);
        clock.advance(10 * CACHE_TTL_MS);

        assert_eq!(restored.user_curricula("user1", false).await.unwrap().len(), 1);
        assert_eq!(source.list_calls(), 1);
    }
}
