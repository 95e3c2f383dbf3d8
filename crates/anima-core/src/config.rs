//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: which
//! backend to talk to, where the session token lives, how often the session
//! monitor polls, and the last email used to sign in.
//!
//! Configuration is stored at `~/.config/anima/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::monitor::DEFAULT_POLL_INTERVAL;
use crate::store::{CredentialStore, FileBackend, KeyringBackend, MemoryBackend, StoreError};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "anima";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the backend URL
pub const API_URL_ENV: &str = "ANIMA_API_URL";

/// Backend used when nothing else is configured (local development server)
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// Where the session token is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageScope {
    /// OS keychain
    #[default]
    Keyring,
    /// Plain file in the cache directory
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_url: Option<String>,
    #[serde(default)]
    pub storage: StorageScope,
    pub poll_interval_secs: Option<u64>,
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
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

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf, StoreError> {
        let cache_dir = dirs::cache_dir().ok_or(StoreError::NoCacheDir)?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Backend URL: `ANIMA_API_URL`, then the config file, then the local default
    pub fn api_url(&self) -> String {
        resolve_api_url(std::env::var(API_URL_ENV).ok(), self.api_url.as_deref())
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// Credential store for the configured scope.
    ///
    /// The scope that is not selected is registered as legacy, so a token
    /// written there by an earlier configuration gets purged instead of
    /// lingering.
    pub fn credential_store(&self) -> Result<CredentialStore, StoreError> {
        let file = FileBackend::new(Self::cache_dir()?);
        let keyring = KeyringBackend::new();
        Ok(match self.storage {
            StorageScope::Keyring => CredentialStore::new(keyring).with_legacy(file),
            StorageScope::File => CredentialStore::new(file).with_legacy(keyring),
        })
    }

    /// In-memory store; nothing outlives the process
    pub fn ephemeral_store() -> CredentialStore {
        CredentialStore::new(MemoryBackend::new())
    }
}

fn resolve_api_url(from_env: Option<String>, configured: Option<&str>) -> String {
    from_env
        .filter(|url| !url.trim().is_empty())
        .or_else(|| {
            configured
                .filter(|url| !url.trim().is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}
