//! Periodic removal of expired entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::CurriculumCache;

/// How often expired entries are swept when no interval is configured.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running cleanup loop. The loop stops when this is dropped.
pub struct CleanupTask {
    handle: JoinHandle<()>,
}

impl CleanupTask {
    pub fn stop(self) {}
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.handle.abort();
        debug!("Cache cleanup stopped");
    }
}

/// Sweep expired entries from `cache` every `interval`.
pub fn spawn_cleanup(cache: Arc<CurriculumCache>, interval: Duration) -> CleanupTask {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cache.sweep_expired();
        }
    });
    CleanupTask { handle }
}
