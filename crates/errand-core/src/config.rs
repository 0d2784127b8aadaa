//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, where credentials are kept, timeouts and
//! the last used email address.
//!
//! Configuration is stored at `~/.config/errand/config.json`. The
//! `ERRAND_API_BASE` and `ERRAND_TOKEN_STORAGE` environment variables
//! override the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{FileBackend, KeyringBackend, MemoryBackend, TokenBackend};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "errand";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Refresh exchange timeout in seconds.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 30;

pub const ENV_API_BASE: &str = "ERRAND_API_BASE";
pub const ENV_TOKEN_STORAGE: &str = "ERRAND_TOKEN_STORAGE";

/// Where the credential pair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStorage {
    /// OS keychain
    Keyring,
    /// `session.json` in the cache directory
    #[default]
    File,
    /// Process memory only
    Memory,
}

impl FromStr for TokenStorage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" | "keychain" => Ok(TokenStorage::Keyring),
            "file" => Ok(TokenStorage::File),
            "memory" => Ok(TokenStorage::Memory),
            other => Err(anyhow::anyhow!("Unknown token storage: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base: String,
    pub token_storage: TokenStorage,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token_storage: TokenStorage::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            last_email: None,
        }
    }
}

impl Config {
    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

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

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup(ENV_API_BASE).filter(|b| !b.trim().is_empty()) {
            self.api_base = base;
        }
        if let Some(storage) = lookup(ENV_TOKEN_STORAGE) {
            self.token_storage = storage
                .parse()
                .with_context(|| format!("Invalid {}", ENV_TOKEN_STORAGE))?;
        }
        Ok(())
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

    pub fn endpoints(&self) -> ApiEndpoints {
        ApiEndpoints::from_base(&self.api_base)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Build the configured credential backend.
    pub fn token_backend(&self) -> Result<Box<dyn TokenBackend>> {
        Ok(match self.token_storage {
            TokenStorage::Keyring => Box::new(KeyringBackend::new()),
            TokenStorage::File => Box::new(FileBackend::in_dir(&self.cache_dir()?)),
            TokenStorage::Memory => Box::<MemoryBackend>::default(),
        })
    }
}

/// Base URL of each API group. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    pub users: String,
    pub tasks: String,
    pub appointments: String,
    pub contacts: String,
}

impl ApiEndpoints {
    pub fn from_base(base: &str) -> Self {
        let base = base.trim().trim_end_matches('/');
        Self {
            users: format!("{}/users/", base),
            tasks: format!("{}/tasks/", base),
            appointments: format!("{}/appointments/", base),
            contacts: format!("{}/contacts/", base),
        }
    }

    /// URL below the users group, e.g. `user_path("token/refresh/")`.
    pub fn user_path(&self, path: &str) -> String {
        format!("{}{}", self.users, path.trim_start_matches('/'))
    }

    pub fn token_url(&self) -> String {
        self.user_path("token/")
    }

    pub fn refresh_url(&self) -> String {
        self.user_path("token/refresh/")
    }

    pub fn me_url(&self) -> String {
        self.user_path("me/")
    }
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self::from_base(DEFAULT_API_BASE)
    }
}
