//! Persisted user settings the engine reads and writes.

use std::collections::HashSet;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::SdkError;
use crate::servers::Encryption;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub encryption: Encryption,
    /// Browse individual nodes instead of hubs.
    pub show_nodes: bool,
    /// Id of the selected server or hub, in the scope chosen by `show_nodes`.
    pub server_id: Option<usize>,
    /// Cursor used by favourite navigation.
    pub favorite: Option<usize>,
    /// Favourite entries by address; ids do not survive reloads.
    pub favorites: HashSet<String>,
    pub ping_enabled: bool,
    /// Suppresses probing.
    pub testing: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            encryption: Encryption::Rsa,
            show_nodes: false,
            server_id: None,
            favorite: None,
            favorites: HashSet::new(),
            ping_enabled: true,
            testing: false,
        }
    }
}

impl Settings {
    pub fn probing_allowed(&self) -> bool {
        self.ping_enabled && !self.testing
    }
}

/// Where settings live between runs.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings, SdkError>;
    fn save(&self, settings: &Settings) -> Result<(), SdkError>;
}

/// Keeps settings in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<Settings>>,
}

impl MemoryStore {
    pub fn new(initial: Settings) -> Self {
        Self {
            saved: Mutex::new(Some(initial)),
        }
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Settings, SdkError> {
        Ok(self.saved.lock().clone().unwrap_or_default())
    }

    fn save(&self, settings: &Settings) -> Result<(), SdkError> {
        *self.saved.lock() = Some(settings.clone());
        Ok(())
    }
}

/// JSON file store; a missing file loads as defaults.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<Settings, SdkError> {
        if !self.path.exists() {
            log::debug!("Settings file {:?} missing, using defaults", self.path);
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| SdkError::Storage(format!("Failed to read settings: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| SdkError::Storage(format!("Failed to parse settings: {}", e)))
    }

    fn save(&self, settings: &Settings) -> Result<(), SdkError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SdkError::Storage(format!("Failed to create settings dir: {}", e)))?;
        }
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| SdkError::Storage(e.to_string()))?;
        std::fs::write(&self.path, content)
            .map_err(|e| SdkError::Storage(format!("Failed to write settings: {}", e)))
    }
}
