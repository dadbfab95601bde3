//! Core data types for TASLink-RS
//!
//! This module contains the vocabulary shared by the allocator, the encoder,
//! the run sessions and the device command layer.
//!
//! # Main Types
//!
//! - [`ControllerType`] - Peripheral plugged into a console port (normal, y-cable, ...)
//! - [`ControllerWidth`] - Bits of data clocked out per controller per latch
//! - [`CaptureFormat`] - Layout of a recorded input file, chosen by extension
//! - [`StreamMask`] - One of the four stream letters the adapter routes frames by
//! - [`EventWindow`] - Latch debounce window in quarter milliseconds
//! - [`FlashCartHeader`] - Boot sequence for flash-cart hardware
//! - [`Transition`] - A scheduled mid-run change of device settings
//!
//! # Ports and Lanes
//!
//! The adapter has four console ports and eight data lanes. Ports 1 and 2
//! each reach four lanes (so they can host a multitap), while ports 3 and 4
//! reach two. Ports 1/3 and 2/4 share their upper lanes, which is why the
//! allocator tracks lanes separately from ports.

use crate::error::{Result, TasLinkError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Number of physical console ports on the adapter
pub const NUM_PORTS: usize = 4;

/// Number of data lanes on the adapter
pub const NUM_LANES: usize = 8;

/// Lanes reachable from each port, in claim order. Index 0 is unused.
pub const PORT_LANES: [&[u8]; NUM_PORTS + 1] = [&[], &[1, 2, 5, 6], &[3, 4, 7, 8], &[5, 6], &[7, 8]];

/// Returns true if `port` names a physical console port
pub fn is_valid_port(port: u8) -> bool {
    (1..=NUM_PORTS as u8).contains(&port)
}

/// Peripheral type plugged into a console port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerType {
    /// A single controller
    #[default]
    Normal,
    /// Y-cable: two controllers on one port (half a multitap)
    YCable,
    /// Multitap: four controllers, ports 1 and 2 only (SNES)
    Multitap,
    /// Four-score (NES); lanes are claimed but input data is not encoded
    FourScore,
}

impl ControllerType {
    /// Code sent in the `sp` command
    pub fn code(&self) -> u8 {
        match self {
            ControllerType::Normal => 0,
            ControllerType::YCable => 1,
            ControllerType::Multitap => 2,
            ControllerType::FourScore => 3,
        }
    }

    /// Number of adapter lanes a port of this type occupies
    pub fn lanes_per_port(&self) -> usize {
        match self {
            ControllerType::Normal => 1,
            ControllerType::YCable | ControllerType::FourScore => 2,
            ControllerType::Multitap => 4,
        }
    }

    /// Number of data lanes the encoder emits per logical controller
    pub fn data_lanes(&self) -> usize {
        match self {
            ControllerType::Normal | ControllerType::FourScore => 1,
            ControllerType::YCable => 2,
            ControllerType::Multitap => 4,
        }
    }

    /// Whether this type may be plugged into `port`
    pub fn allowed_on_port(&self, port: u8) -> bool {
        match self {
            ControllerType::Multitap => port == 1 || port == 2,
            _ => is_valid_port(port),
        }
    }

    /// Lanes claimed when this type occupies `port`
    ///
    /// Returns an empty slice for ports the type cannot use.
    pub fn lanes_for_port(&self, port: u8) -> &'static [u8] {
        if !self.allowed_on_port(port) {
            return &[];
        }
        &PORT_LANES[port as usize][..self.lanes_per_port()]
    }

    /// Display name for the type
    pub fn display_name(&self) -> &'static str {
        match self {
            ControllerType::Normal => "normal",
            ControllerType::YCable => "y-cable",
            ControllerType::Multitap => "multitap",
            ControllerType::FourScore => "four-score",
        }
    }
}

impl std::fmt::Display for ControllerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for ControllerType {
    type Err = TasLinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "n" => Ok(ControllerType::Normal),
            "y" | "y-cable" => Ok(ControllerType::YCable),
            "multitap" | "m" => Ok(ControllerType::Multitap),
            "four-score" | "f" => Ok(ControllerType::FourScore),
            other => Err(TasLinkError::Configuration(format!(
                "unknown controller type '{}'",
                other
            ))),
        }
    }
}

/// Bits of data per controller per latch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum ControllerWidth {
    /// 8 bits (NES)
    #[default]
    Bits8,
    /// 16 bits (SNES)
    Bits16,
    /// 24 bits
    Bits24,
    /// 32 bits
    Bits32,
}

impl ControllerWidth {
    /// Width in bits
    pub fn bits(&self) -> u32 {
        match self {
            ControllerWidth::Bits8 => 8,
            ControllerWidth::Bits16 => 16,
            ControllerWidth::Bits24 => 24,
            ControllerWidth::Bits32 => 32,
        }
    }

    /// Whole bytes per controller sample
    pub fn bytes(&self) -> usize {
        (self.bits() / 8) as usize
    }

    /// Size field of the `sc` lane byte
    pub fn size_code(&self) -> u8 {
        match self {
            ControllerWidth::Bits8 => 0b00,
            ControllerWidth::Bits16 => 0b01,
            ControllerWidth::Bits24 => 0b10,
            ControllerWidth::Bits32 => 0b11,
        }
    }
}

impl TryFrom<u32> for ControllerWidth {
    type Error = TasLinkError;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(ControllerWidth::Bits8),
            16 => Ok(ControllerWidth::Bits16),
            24 => Ok(ControllerWidth::Bits24),
            32 => Ok(ControllerWidth::Bits32),
            other => Err(TasLinkError::Configuration(format!(
                "controller width must be 8, 16, 24 or 32 bits, got {}",
                other
            ))),
        }
    }
}

impl From<ControllerWidth> for u32 {
    fn from(width: ControllerWidth) -> Self {
        width.bits()
    }
}

/// Recorded input file layout, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureFormat {
    /// `.r08`: two controllers, one byte each per frame
    R08,
    /// `.r16m` / `.r16`: eight controllers, two bytes each per frame
    R16,
    /// Anything else: one record of the run's data width per frame
    Unknown,
}

impl CaptureFormat {
    /// Pick the format from a file's extension
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("r08") => CaptureFormat::R08,
            Some("r16") | Some("r16m") => CaptureFormat::R16,
            _ => CaptureFormat::Unknown,
        }
    }

    /// Maximum controller slots stored per frame
    pub fn slots(&self) -> usize {
        match self {
            CaptureFormat::R08 => 2,
            CaptureFormat::R16 => 8,
            CaptureFormat::Unknown => 1,
        }
    }

    /// Bytes per slot, if fixed by the format
    pub fn bytes_per_slot(&self) -> Option<usize> {
        match self {
            CaptureFormat::R08 => Some(1),
            CaptureFormat::R16 => Some(2),
            CaptureFormat::Unknown => None,
        }
    }

    /// Console ports represented in one file frame, if fixed by the format
    pub fn port_blocks(&self) -> Option<usize> {
        match self {
            CaptureFormat::R08 | CaptureFormat::R16 => Some(2),
            CaptureFormat::Unknown => None,
        }
    }
}

/// One of the four stream letters the adapter routes frames by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamMask(u8);

impl StreamMask {
    /// The fixed set of stream letters, in allocation order
    pub const LETTERS: [u8; 4] = *b"ABCD";

    /// Stream letter by allocation index (0..4)
    pub fn from_index(index: usize) -> Option<Self> {
        (index < Self::LETTERS.len()).then_some(StreamMask(index as u8))
    }

    /// Allocation index of this letter
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// ASCII byte of this letter, as sent on the wire
    pub fn letter(&self) -> u8 {
        Self::LETTERS[self.index()]
    }
}

impl TryFrom<char> for StreamMask {
    type Error = TasLinkError;

    fn try_from(c: char) -> Result<Self> {
        Self::LETTERS
            .iter()
            .position(|&l| l as char == c)
            .and_then(Self::from_index)
            .ok_or_else(|| TasLinkError::Configuration(format!("'{}' is not a stream letter", c)))
    }
}

impl std::fmt::Display for StreamMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter() as char)
    }
}

/// Latch event window, stored in quarter milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct EventWindow {
    quarters: u8,
}

impl EventWindow {
    /// Largest window the adapter accepts (15.75 ms)
    pub const MAX_QUARTERS: u8 = 63;

    /// Window disabled
    pub const NONE: EventWindow = EventWindow { quarters: 0 };

    /// Build a window from milliseconds
    ///
    /// The value must be a multiple of 0.25 ms between 0 and 15.75 ms.
    pub fn from_millis(ms: f64) -> Result<Self> {
        if !ms.is_finite() || ms < 0.0 || ms > f64::from(Self::MAX_QUARTERS) / 4.0 {
            return Err(TasLinkError::Configuration(format!(
                "window {} ms is outside [0, 15.75]",
                ms
            )));
        }
        let quarters = ms * 4.0;
        if quarters.fract() != 0.0 {
            return Err(TasLinkError::Configuration(format!(
                "window {} ms is not a multiple of 0.25 ms",
                ms
            )));
        }
        Ok(Self {
            quarters: quarters as u8,
        })
    }

    /// Window in quarter milliseconds
    pub fn quarters(&self) -> u8 {
        self.quarters
    }

    /// Window in milliseconds
    pub fn millis(&self) -> f64 {
        f64::from(self.quarters) / 4.0
    }
}

impl TryFrom<f64> for EventWindow {
    type Error = TasLinkError;

    fn try_from(ms: f64) -> Result<Self> {
        Self::from_millis(ms)
    }
}

impl From<EventWindow> for f64 {
    fn from(window: EventWindow) -> Self {
        window.millis()
    }
}

impl std::fmt::Display for EventWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.millis())
    }
}

/// Boot sequence required by flash-cart hardware before the recording starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashCartHeader {
    /// EverDrive: neutral frames, then Start
    EverDrive,
    /// SD2SNES: neutral frames, Start, neutral frames, then A
    Sd2Snes,
}

impl FlashCartHeader {
    /// Display name for the header
    pub fn display_name(&self) -> &'static str {
        match self {
            FlashCartHeader::EverDrive => "everdrive",
            FlashCartHeader::Sd2Snes => "sd2snes",
        }
    }
}

impl std::fmt::Display for FlashCartHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for FlashCartHeader {
    type Err = TasLinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "everdrive" => Ok(FlashCartHeader::EverDrive),
            "sd2snes" => Ok(FlashCartHeader::Sd2Snes),
            other => Err(TasLinkError::Configuration(format!(
                "unknown flash-cart header '{}'",
                other
            ))),
        }
    }
}

/// Device-facing settings that transitions change mid-run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceState {
    /// DPCM fix enabled on the run's ports
    pub dpcm_fix: bool,
    /// Latch event window of the run
    pub window: EventWindow,
}

/// A scheduled change of device settings at a frame boundary
///
/// `frame` counts recorded-input frames, i.e. it is relative to the playback
/// position after any flash-cart header and dummy frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Frame at which the change takes effect
    pub frame: u64,
    /// DPCM fix setting from this frame on
    pub dpcm_fix: bool,
    /// Event window from this frame on
    pub window: EventWindow,
    /// Pulse the console reset line when firing
    pub reset: bool,
}

impl Transition {
    /// Create a transition without a console reset
    pub fn new(frame: u64, dpcm_fix: bool, window: EventWindow) -> Self {
        Self {
            frame,
            dpcm_fix,
            window,
            reset: false,
        }
    }

    /// Also pulse the console reset line when this transition fires
    pub fn with_reset(mut self) -> Self {
        self.reset = true;
        self
    }

    /// Target device state after this transition
    pub fn target_state(&self) -> DeviceState {
        DeviceState {
            dpcm_fix: self.dpcm_fix,
            window: self.window,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_lanes_for_port() {
        assert_eq!(ControllerType::Normal.lanes_for_port(1), &[1]);
        assert_eq!(ControllerType::YCable.lanes_for_port(3), &[5, 6]);
        assert_eq!(ControllerType::Multitap.lanes_for_port(2), &[3, 4, 7, 8]);
        assert!(ControllerType::Multitap.lanes_for_port(3).is_empty());
        assert!(ControllerType::Normal.lanes_for_port(0).is_empty());
        assert!(ControllerType::Normal.lanes_for_port(5).is_empty());
    }

    #[test]
    fn test_controller_type_parse() {
        assert_eq!("n".parse::<ControllerType>().unwrap(), ControllerType::Normal);
        assert_eq!("Y".parse::<ControllerType>().unwrap(), ControllerType::YCable);
        assert_eq!("multitap".parse::<ControllerType>().unwrap(), ControllerType::Multitap);
        assert_eq!("f".parse::<ControllerType>().unwrap(), ControllerType::FourScore);
        assert!("gamepad".parse::<ControllerType>().is_err());
    }

    #[test]
    fn test_controller_width() {
        assert_eq!(ControllerWidth::try_from(16).unwrap().bytes(), 2);
        assert_eq!(ControllerWidth::Bits32.size_code(), 0b11);
        assert!(ControllerWidth::try_from(12).is_err());
    }

    #[test]
    fn test_capture_format_from_extension() {
        assert_eq!(CaptureFormat::from_path(&PathBuf::from("smb.r08")), CaptureFormat::R08);
        assert_eq!(CaptureFormat::from_path(&PathBuf::from("smw.r16m")), CaptureFormat::R16);
        assert_eq!(CaptureFormat::from_path(&PathBuf::from("smw.R16")), CaptureFormat::R16);
        assert_eq!(CaptureFormat::from_path(&PathBuf::from("movie.bk2")), CaptureFormat::Unknown);
        assert_eq!(CaptureFormat::from_path(&PathBuf::from("noext")), CaptureFormat::Unknown);
    }

    #[test]
    fn test_event_window_validation() {
        assert_eq!(EventWindow::from_millis(0.0).unwrap(), EventWindow::NONE);
        assert_eq!(EventWindow::from_millis(15.75).unwrap().quarters(), 63);
        assert_eq!(EventWindow::from_millis(1.25).unwrap().quarters(), 5);
        assert!(EventWindow::from_millis(16.0).is_err());
        assert!(EventWindow::from_millis(-0.25).is_err());
        assert!(EventWindow::from_millis(0.3).is_err());
        assert!(EventWindow::from_millis(f64::NAN).is_err());
    }

    #[test]
    fn test_stream_mask_letters() {
        let letters: Vec<char> = (0..4)
            .filter_map(StreamMask::from_index)
            .map(|m| m.letter() as char)
            .collect();
        assert_eq!(letters, vec!['A', 'B', 'C', 'D']);
        assert!(StreamMask::from_index(4).is_none());
        assert_eq!(StreamMask::try_from('C').unwrap().index(), 2);
        assert!(StreamMask::try_from('Z').is_err());
    }
}
