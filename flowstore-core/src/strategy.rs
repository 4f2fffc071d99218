//! Storage strategy configuration

use config::StorageSettings;
use std::time::Duration;

/// How orphan cleanup runs relative to the sync that triggered it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupMode {
    /// Spawned task raced against `timeout`; the sync does not wait for it
    Background { timeout: Duration },
    /// Awaited inline before the manifest is written
    Blocking,
}

impl Default for CleanupMode {
    fn default() -> Self {
        CleanupMode::Background {
            timeout: Duration::from_secs(config::settings::DEFAULT_CLEANUP_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrategyConfig {
    /// Content length (chars) at or above which content is stored externally
    pub content_length_threshold: usize,
    /// Target chunk size in bytes (soft limit for structured content)
    pub chunk_size: usize,
    pub cleanup_mode: CleanupMode,
    /// Reject uploads whose store-reported size differs from the bytes sent
    pub verify_upload_size: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::from_settings(&StorageSettings::default())
    }
}

impl StrategyConfig {
    pub fn from_settings(settings: &StorageSettings) -> Self {
        let cleanup_mode = if settings.blocking_cleanup {
            CleanupMode::Blocking
        } else {
            CleanupMode::Background {
                timeout: Duration::from_secs(settings.cleanup_timeout_secs),
            }
        };

        Self {
            content_length_threshold: settings.content_length_threshold,
            chunk_size: settings.chunk_size,
            cleanup_mode,
            verify_upload_size: settings.verify_upload_size,
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.content_length_threshold = threshold;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_cleanup_mode(mut self, cleanup_mode: CleanupMode) -> Self {
        self.cleanup_mode = cleanup_mode;
        self
    }
}
