use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::entry::CacheEntry;
use crate::models::{Curriculum, DashboardData};

/// Snapshot file name in the cache directory
const SNAPSHOT_FILE: &str = "curricula";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_display(&self) -> String {
        age_display(self.cached_at)
    }
}

/// Human-readable age of a timestamp, e.g. "5m ago" or "2d ago".
pub fn age_display(at: DateTime<Utc>) -> String {
    let minutes = (Utc::now() - at).num_minutes();
    if minutes < 1 {
        // Includes negative ages from clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

/// Serializable copy of every populated cache entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSnapshot {
    #[serde(default)]
    pub user_curricula: HashMap<String, CacheEntry<Vec<Curriculum>>>,
    #[serde(default)]
    pub individual_curriculum: HashMap<String, CacheEntry<Option<Curriculum>>>,
    #[serde(default)]
    pub dashboard: HashMap<String, CacheEntry<DashboardData>>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl CacheSnapshot {
    pub fn entry_count(&self) -> usize {
        self.user_curricula.len() + self.individual_curriculum.len() + self.dashboard.len()
    }
}

/// Persists cache snapshots as JSON so offline fallback survives restarts.
pub struct SnapshotStore {
    cache_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", name))?;

        let cached: CachedData<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", name))?;

        Ok(Some(cached))
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let cached = CachedData::new(data);
        let path = self.cache_path(name);
        let contents = serde_json::to_string_pretty(&cached)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write cache file: {}", name))?;
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<Option<CachedData<CacheSnapshot>>> {
        self.load(SNAPSHOT_FILE)
    }

    pub fn save_snapshot(&self, snapshot: &CacheSnapshot) -> Result<()> {
        debug!(entries = snapshot.entry_count(), "Saving cache snapshot");
        self.save(SNAPSHOT_FILE, snapshot)
    }

    /// Age of the saved snapshot for status display, logging errors without failing.
    pub fn snapshot_age(&self) -> Option<String> {
        match self.load_snapshot() {
            Ok(Some(cached)) => Some(cached.age_display()),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "Failed to load snapshot for age display");
                None
            }
        }
    }

    pub fn remove_snapshot(&self) -> Result<()> {
        let path = self.cache_path(SNAPSHOT_FILE);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
