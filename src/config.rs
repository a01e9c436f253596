//! Configuration management for the note sync engine.
//!
//! Handles loading and saving engine configuration to/from a JSON file.
//! The config directory can be customized.
//!
//! Sync-related configuration:
//! - client_id: UUID7 identifying this replica (generated on first run)
//! - client_name: human-readable device name
//! - sync: interval, timeout, and retry settings

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NoteError, NoteResult};

/// Sync tuning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_sync_enabled")]
    pub enabled: bool,
    /// Seconds between background sync attempts
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Wall-clock bound on one sync cycle, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bounded retry count for transient remote failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_sync_enabled() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    180
}

fn default_max_retries() -> u32 {
    3
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: default_sync_enabled(),
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    /// Directory holding the note store
    #[serde(default)]
    pub data_dir: String,
    /// Client ID (UUID7 hex), stable for this replica
    #[serde(default = "generate_client_id")]
    pub client_id: String,
    /// Human-readable device name
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Sync settings
    #[serde(default)]
    pub sync: SyncSettings,
}

fn generate_client_id() -> String {
    Uuid::now_v7().simple().to_string()
}

fn default_client_name() -> String {
    match hostname::get() {
        Ok(name) => format!("Notes on {}", name.to_string_lossy()),
        Err(_) => "Notes Device".to_string(),
    }
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            client_id: generate_client_id(),
            client_name: default_client_name(),
            sync: SyncSettings::default(),
        }
    }
}

/// Configuration manager
pub struct EngineConfig {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl EngineConfig {
    /// Create a configuration manager, loading the existing config file or
    /// writing a fresh default one.
    pub fn new(config_dir: Option<PathBuf>) -> NoteResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .ok_or_else(|| NoteError::Config("no config directory available".to_string()))?
                .join("notecore"),
        };

        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let data = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            serde_json::from_str(&content).unwrap_or_else(|_| default_data(&config_dir))
        } else {
            default_data(&config_dir)
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };

        if !config.config_file.exists() {
            config.save()?;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> NoteResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Directory holding the local note store
    pub fn data_dir(&self) -> &str {
        &self.data.data_dir
    }

    /// Get the client ID as hex string
    pub fn client_id(&self) -> &str {
        &self.data.client_id
    }

    /// Get the human-readable client name
    pub fn client_name(&self) -> &str {
        &self.data.client_name
    }

    /// Set the client name
    pub fn set_client_name(&mut self, name: &str) -> NoteResult<()> {
        self.data.client_name = name.to_string();
        self.save()
    }

    /// Get sync settings
    pub fn sync(&self) -> &SyncSettings {
        &self.data.sync
    }

    /// Check if sync is enabled
    pub fn is_sync_enabled(&self) -> bool {
        self.data.sync.enabled
    }

    /// Enable or disable sync
    pub fn set_sync_enabled(&mut self, enabled: bool) -> NoteResult<()> {
        self.data.sync.enabled = enabled;
        self.save()
    }

    /// Wall-clock bound on one sync cycle
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.data.sync.timeout_secs)
    }

    /// Bounded retry count for transient remote failures
    pub fn max_retries(&self) -> u32 {
        self.data.sync.max_retries
    }
}

fn default_data(config_dir: &Path) -> ConfigData {
    let mut data = ConfigData::default();
    data.data_dir = config_dir.join("notes").to_string_lossy().to_string();
    data
}
