//! Saved run documents
//!
//! A run is saved as a small TOML document that can be edited by hand:
//!
//! ```toml
//! ports = [1, 2]
//! controller_type = "normal"
//! controller_bits = 8
//! input_file = "smb.r08"
//! overread = false
//! window_ms = 0.0
//! dpcm_fix = false
//! dummy_frames = 2
//! blank_frames = []
//! header = "none"
//! saved_at = "2026-10-18T12:00:00Z"
//!
//! [[transitions]]
//! frame = 4500
//! dpcm_fix = true
//! window_ms = 2.0
//! reset = false
//! ```
//!
//! `ports`, `controller_type`, `controller_bits` and `input_file` are
//! required. Every other field may be missing; missing fields get their
//! defaults once, at load time, and the run is flagged as needing a re-save.
//! A transition without `dpcm_fix` or `window_ms` inherits the run's value.
//! `blank_frames` offsets count from the first recorded frame, after the
//! header and dummy frames.
//! A document of the wrong shape is rejected as a whole.

use crate::error::{Result, ResultExt, TasLinkError};
use crate::session::RunConfig;
use crate::types::{ControllerType, ControllerWidth, EventWindow, FlashCartHeader, Transition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Flash-cart header setting as written in a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderSetting {
    None,
    EverDrive,
    Sd2Snes,
}

impl From<Option<FlashCartHeader>> for HeaderSetting {
    fn from(header: Option<FlashCartHeader>) -> Self {
        match header {
            None => HeaderSetting::None,
            Some(FlashCartHeader::EverDrive) => HeaderSetting::EverDrive,
            Some(FlashCartHeader::Sd2Snes) => HeaderSetting::Sd2Snes,
        }
    }
}

impl From<HeaderSetting> for Option<FlashCartHeader> {
    fn from(setting: HeaderSetting) -> Self {
        match setting {
            HeaderSetting::None => None,
            HeaderSetting::EverDrive => Some(FlashCartHeader::EverDrive),
            HeaderSetting::Sd2Snes => Some(FlashCartHeader::Sd2Snes),
        }
    }
}

/// One scheduled transition in a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEntry {
    /// Recorded-input frame the transition fires at
    pub frame: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpcm_fix: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<EventWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,
}

/// A saved run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDocument {
    /// Console ports, one controller each
    pub ports: Vec<u8>,
    /// Peripheral type on every port
    pub controller_type: ControllerType,
    /// Bits per controller: 8, 16, 24 or 32
    pub controller_bits: u32,
    /// Capture file
    pub input_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overread: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<EventWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpcm_fix: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dummy_frames: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blank_frames: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderSetting>,
    /// When the document was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Vec<TransitionEntry>>,
}

/// A run configuration read from a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedRun {
    /// Configuration with every default applied
    pub config: RunConfig,
    /// Names of the fields that were missing and defaulted
    pub defaulted: Vec<String>,
}

impl LoadedRun {
    /// Whether the document should be saved again
    pub fn needs_resave(&self) -> bool {
        !self.defaulted.is_empty()
    }
}

impl RunDocument {
    /// Document with every field written out
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            ports: config.ports.clone(),
            controller_type: config.controller_type,
            controller_bits: config.width.bits(),
            input_file: config.input_file.clone(),
            overread: Some(config.overread),
            window_ms: Some(config.window),
            dpcm_fix: Some(config.dpcm_fix),
            dummy_frames: Some(config.dummy_frames),
            blank_frames: Some(config.blank_frames.clone()),
            header: Some(config.header.into()),
            saved_at: Some(Utc::now()),
            transitions: Some(
                config
                    .transitions
                    .iter()
                    .map(|t| TransitionEntry {
                        frame: t.frame,
                        dpcm_fix: Some(t.dpcm_fix),
                        window_ms: Some(t.window),
                        reset: Some(t.reset),
                    })
                    .collect(),
            ),
        }
    }

    /// Turn the document into a run configuration, applying defaults once
    pub fn into_config(self) -> Result<LoadedRun> {
        let mut defaulted = Vec::new();
        let mut take = |name: &str, present: bool| {
            if !present {
                defaulted.push(name.to_string());
            }
        };

        take("overread", self.overread.is_some());
        take("window_ms", self.window_ms.is_some());
        take("dpcm_fix", self.dpcm_fix.is_some());
        take("dummy_frames", self.dummy_frames.is_some());
        take("blank_frames", self.blank_frames.is_some());
        take("header", self.header.is_some());
        take("transitions", self.transitions.is_some());

        let width = ControllerWidth::try_from(self.controller_bits)
            .context("Invalid controller_bits in run document")?;
        let window = self.window_ms.unwrap_or(EventWindow::NONE);
        let dpcm_fix = self.dpcm_fix.unwrap_or(false);

        let mut transitions = Vec::new();
        for (i, entry) in self.transitions.unwrap_or_default().into_iter().enumerate() {
            let mut take_field = |name: &str, present: bool| {
                if !present {
                    defaulted.push(format!("transitions[{}].{}", i, name));
                }
            };
            take_field("dpcm_fix", entry.dpcm_fix.is_some());
            take_field("window_ms", entry.window_ms.is_some());
            take_field("reset", entry.reset.is_some());
            transitions.push(Transition {
                frame: entry.frame,
                dpcm_fix: entry.dpcm_fix.unwrap_or(dpcm_fix),
                window: entry.window_ms.unwrap_or(window),
                reset: entry.reset.unwrap_or(false),
            });
        }
        transitions.sort_by_key(|t| t.frame);

        let config = RunConfig {
            ports: self.ports,
            controller_type: self.controller_type,
            width,
            overread: self.overread.unwrap_or(false),
            window,
            input_file: self.input_file,
            dpcm_fix,
            dummy_frames: self.dummy_frames.unwrap_or(0),
            blank_frames: self.blank_frames.unwrap_or_default(),
            header: self.header.unwrap_or(HeaderSetting::None).into(),
            transitions,
        };
        config
            .validate()
            .context("Run document describes an invalid run")?;

        Ok(LoadedRun { config, defaulted })
    }

    /// Parse a document from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read a document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TasLinkError::Persistence(format!("Failed to read run file {:?}: {}", path, e))
        })?;
        Self::parse(&content).with_context(|| format!("Failed to parse run file {:?}", path))
    }

    /// Read a document and turn it into a run configuration
    pub fn load_config(path: impl AsRef<Path>) -> Result<LoadedRun> {
        let path = path.as_ref();
        let loaded = Self::load(path)?.into_config()?;
        if loaded.needs_resave() {
            tracing::warn!(
                "Run file {:?} is missing {}; defaults applied, save it again to keep them",
                path,
                loaded.defaulted.join(", ")
            );
        }
        Ok(loaded)
    }

    /// Write the document to disk
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            TasLinkError::Persistence(format!("Failed to write run file {:?}: {}", path, e))
        })
    }
}
