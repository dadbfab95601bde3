//! Configuration module for TASLink-RS
//!
//! This module handles:
//! - Link and playback settings (`settings.toml`)
//! - Run documents (see [`run_file`]) holding a saved run's full configuration
//!
//! # Settings Location
//!
//! Settings are read from `--config <path>` when given, otherwise from the
//! platform configuration directory under `taslink-rs`:
//!
//! - **Linux**: `~/.config/taslink-rs/settings.toml`
//! - **macOS**: `~/Library/Application Support/taslink-rs/settings.toml`
//! - **Windows**: `%APPDATA%\taslink-rs\settings.toml`
//!
//! A missing file means built-in defaults. Every field is optional.
//!
//! # Example
//!
//! ```ignore
//! use taslink_rs::config::Settings;
//!
//! let settings = Settings::load_or_default(None);
//! println!("prebuffer: {} frames", settings.playback.prebuffer);
//! ```

pub mod run_file;

pub use run_file::RunDocument;

use crate::error::{Result, TasLinkError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for the configuration directory
pub const APP_ID: &str = "taslink-rs";

/// Settings filename
pub const SETTINGS_FILE: &str = "settings.toml";

/// Default serial speed of the adapter
pub const DEFAULT_BAUD: u32 = 2_000_000;

/// Default bound on one blocking read, in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 50;

/// Default frames sent at run start before any latch
pub const DEFAULT_PREBUFFER: usize = 60;

/// Default per-port latch count above which a burst is reported
pub const DEFAULT_LATCH_HIGH_WATER: usize = 60;

/// Default console reset pulse width, in milliseconds
pub const DEFAULT_RESET_HOLD_MS: u64 = 20;

/// Longest allowed reset pulse; the engine holds the registry lock for it
pub const MAX_RESET_HOLD_MS: u64 = 100;

// ==================== Config Directory ====================

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path of the default settings file
pub fn settings_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(SETTINGS_FILE))
}

// ==================== Link Settings ====================

/// Serial link parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Serial speed in baud
    pub baud: u32,
    /// Bound on each blocking read, so the engine notices shutdown promptly
    pub read_timeout_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

// ==================== Playback Settings ====================

/// Realtime playback parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Frames sent at run start and after a reset, before any latch
    pub prebuffer: usize,
    /// Per-port latch count in one read above which a warning is logged
    pub latch_high_water: usize,
    /// How long the console reset line is held during a pulse
    pub reset_hold_ms: u64,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            prebuffer: DEFAULT_PREBUFFER,
            latch_high_water: DEFAULT_LATCH_HIGH_WATER,
            reset_hold_ms: DEFAULT_RESET_HOLD_MS,
        }
    }
}

impl PlaybackSettings {
    /// Reject values the realtime path cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.reset_hold_ms > MAX_RESET_HOLD_MS {
            return Err(TasLinkError::Configuration(format!(
                "reset_hold_ms = {} is above the {} ms limit",
                self.reset_hold_ms, MAX_RESET_HOLD_MS
            )));
        }
        Ok(())
    }
}

// ==================== Settings ====================

/// Complete settings file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Serial link
    pub link: LinkSettings,
    /// Playback
    pub playback: PlaybackSettings,
}

impl Settings {
    /// Load settings from `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TasLinkError::Persistence(format!("Failed to read settings {:?}: {}", path, e))
        })?;

        let settings: Self = toml::from_str(&content).map_err(|e| {
            TasLinkError::Persistence(format!("Failed to parse settings {:?}: {}", path, e))
        })?;
        settings.playback.validate()?;
        Ok(settings)
    }

    /// Load settings from `path`, else the default location, else built-in defaults
    ///
    /// An explicitly given file that cannot be read is an error; a broken
    /// file in the default location only logs a warning.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        Ok(Self::load_or_default(settings_path().as_deref()))
    }

    /// Load settings, returning defaults on any error
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save settings to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TasLinkError::Persistence(format!("Failed to create settings directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            TasLinkError::Persistence(format!("Failed to write settings {:?}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.link.baud, 2_000_000);
        assert_eq!(settings.link.read_timeout_ms, 50);
        assert_eq!(settings.playback.prebuffer, 60);
        assert_eq!(settings.playback.latch_high_water, 60);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings: Settings = toml::from_str("[playback]\nprebuffer = 10\n").unwrap();
        assert_eq!(settings.playback.prebuffer, 10);
        assert_eq!(settings.playback.reset_hold_ms, DEFAULT_RESET_HOLD_MS);
        assert_eq!(settings.link, LinkSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let mut settings = Settings::default();
        settings.link.baud = 115_200;
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
        assert_eq!(Settings::resolve(Some(&path)).unwrap(), settings);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(Settings::resolve(Some(&missing)).is_err());
        assert_eq!(Settings::load_or_default(Some(&missing)), Settings::default());
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "[link]\nbaud = \"fast\"\n").unwrap();
        assert!(matches!(Settings::load(&path), Err(TasLinkError::Persistence(_))));
        assert_eq!(Settings::load_or_default(Some(&path)), Settings::default());
    }

    #[test]
    fn test_long_reset_hold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "[playback]\nreset_hold_ms = 5000\n").unwrap();
        assert!(matches!(Settings::load(&path), Err(TasLinkError::Configuration(_))));

        std::fs::write(&path, "[playback]\nreset_hold_ms = 100\n").unwrap();
        assert_eq!(Settings::load(&path).unwrap().playback.reset_hold_ms, 100);
    }
}
