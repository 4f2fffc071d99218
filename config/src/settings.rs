//! Application settings management

use crate::PathManager;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_CONTENT_LENGTH_THRESHOLD: usize = 10_000;
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_CLEANUP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;

/// Application settings stored in settings.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Storage strategy settings (the `[storage]` table)
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Knobs for the content storage strategy engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Origin of the chunk store API (e.g., "https://app.example.com")
    pub api_base_url: String,
    /// Content length (in characters) at which a block moves to external storage
    pub content_length_threshold: usize,
    /// Target chunk size in bytes
    pub chunk_size: usize,
    /// How long background orphan cleanup may run before it is abandoned
    pub cleanup_timeout_secs: u64,
    /// Run orphan cleanup inline instead of in the background
    pub blocking_cleanup: bool,
    /// Quiet window before an edit is persisted
    pub debounce_ms: u64,
    /// Fail a sync when the store reports a different size than was uploaded
    pub verify_upload_size: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            content_length_threshold: DEFAULT_CONTENT_LENGTH_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cleanup_timeout_secs: DEFAULT_CLEANUP_TIMEOUT_SECS,
            blocking_cleanup: false,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            verify_upload_size: true,
        }
    }
}

impl Settings {
    /// Load settings from the settings file, or return defaults if not found.
    /// Environment overrides are applied on top.
    pub fn load() -> Self {
        let mut settings = PathManager::settings_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        settings.apply_env_overrides();
        settings
    }

    /// Load settings from a specific file, returning defaults if it is missing or invalid
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };

        toml::from_str(&content).unwrap_or_default()
    }

    /// Save settings to the settings file
    pub fn save(&self) -> Result<(), String> {
        let path = PathManager::settings_path().ok_or("Could not determine settings path")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))?;
        Ok(())
    }

    /// Apply `FLOWSTORE_*` environment variables over the loaded values.
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("FLOWSTORE_API_BASE_URL") {
            self.storage.api_base_url = url;
        }
        if let Some(threshold) = lookup("FLOWSTORE_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.storage.content_length_threshold = threshold;
        }
        if let Some(size) = lookup("FLOWSTORE_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            self.storage.chunk_size = size;
        }
    }
}
