//! Configuration management.
//!
//! Holds the cache version string, the manifest, the base URL relative
//! identifiers resolve against, and the HTTP timeout.
//!
//! Configuration is stored at `~/.config/piko-cache/config.json`.
//! `PIKO_CACHE_NAME`, `PIKO_BASE_URL` and `PIKO_CACHE_DIR` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::manifest::{Manifest, DEFAULT_CACHE_NAME};
use crate::net::http::DEFAULT_TIMEOUT_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "piko-cache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_CACHE_NAME: &str = "PIKO_CACHE_NAME";
pub const ENV_BASE_URL: &str = "PIKO_BASE_URL";
pub const ENV_CACHE_DIR: &str = "PIKO_CACHE_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache_name: String,
    pub manifest: Manifest,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            manifest: Manifest::default(),
            base_url: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_dir: None,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a key lookup. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(name) = get(ENV_CACHE_NAME) {
            self.cache_name = name;
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.base_url = Some(url);
        }
        if let Some(dir) = get(ENV_CACHE_DIR) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Directory holding bucket files.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
