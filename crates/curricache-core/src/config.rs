//! Application configuration management.
//!
//! This module handles loading and saving the configuration, which includes
//! the backend URL, the last user looked at and cache tuning knobs.
//!
//! Configuration is stored at `~/.config/curricache/config.json`. A few
//! fields can be overridden from the environment (or a `.env` file loaded by
//! the binary).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::cleanup::DEFAULT_CLEANUP_INTERVAL;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "curricache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_API_URL: &str = "CURRICACHE_API_URL";
pub const ENV_TOKEN: &str = "CURRICACHE_TOKEN";
pub const ENV_USER: &str = "CURRICACHE_USER";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub last_user_id: Option<String>,
    /// Bearer token. Prefer `CURRICACHE_TOKEN` over storing it here.
    pub api_token: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
    pub offline_mode: bool,
    pub log_to_file: bool,
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Persist `user_id` as the default user. Only the file's own values are
    /// written back, never environment overrides.
    pub fn remember_user(user_id: &str) -> Result<()> {
        let mut file = Self::load_file()?;
        if file.last_user_id.as_deref() == Some(user_id) {
            return Ok(());
        }
        file.last_user_id = Some(user_id.to_string());
        file.save()
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    /// Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_API_URL) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = get(ENV_TOKEN) {
            self.api_token = Some(token);
        }
        if let Some(user) = get(ENV_USER) {
            self.last_user_id = Some(user);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CLEANUP_INTERVAL)
    }
}
