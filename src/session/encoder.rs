//! Capture file to device frame encoding
//!
//! A capture file stores one fixed-size record per console frame, with
//! buttons active-high. The adapter wants one data frame per latch: the
//! run's stream letter followed by the controller bytes, active-low. The
//! [`FrameEncoder`] walks the file record by record, complements every byte
//! and keeps only the bytes belonging to the run's controllers.
//!
//! # Layout
//!
//! | Format | Record | Controller `i` reads |
//! |--------|--------|----------------------|
//! | `.r08` | 2 bytes | 1 byte at offset `i` |
//! | `.r16m` | 16 bytes (two 8-byte port blocks) | `lanes x bytes` at offset `8 i` |
//! | other | the run's data width | `lanes x bytes` at offset `i x span` |
//!
//! A trailing partial record is dropped. Recorded blank frames are spliced
//! into the recording first, then the dummy frames and the flash-cart header
//! go in front of it.

use crate::error::{Result, ResultExt, TasLinkError};
use crate::session::RunConfig;
use crate::types::{CaptureFormat, ControllerType};
use std::path::Path;

/// Selector byte used before a run is bound to a stream letter
pub const UNBOUND_SELECTOR: u8 = b'Z';

/// Data byte of a frame with nothing pressed
pub const NEUTRAL_BYTE: u8 = 0xFF;

/// An ordered sequence of fixed-length device frames
///
/// Frames are stored back to back so a run of frames can be written to the
/// link as one slice. Every frame starts with the same selector byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Stream letter at the start of every frame
    selector: u8,
    /// Bytes per frame, selector included
    frame_len: usize,
    /// Frames, back to back
    bytes: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer of frames carrying `data_len` data bytes each
    pub fn new(selector: u8, data_len: usize) -> Self {
        Self {
            selector,
            frame_len: data_len + 1,
            bytes: Vec::new(),
        }
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.bytes.len() / self.frame_len
    }

    /// Whether the buffer holds no frames
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes per frame, selector included
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Data bytes per frame
    pub fn data_len(&self) -> usize {
        self.frame_len - 1
    }

    /// Selector byte every frame starts with
    pub fn selector(&self) -> u8 {
        self.selector
    }

    /// Rewrite the selector byte of every frame
    pub fn set_selector(&mut self, selector: u8) {
        self.selector = selector;
        for frame in self.bytes.chunks_exact_mut(self.frame_len) {
            frame[0] = selector;
        }
    }

    /// Frame at `index`, selector included
    pub fn frame(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.frame_len)?;
        self.bytes.get(start..start + self.frame_len)
    }

    /// Iterate over frames
    pub fn frames(&self) -> impl Iterator<Item = &[u8]> {
        self.bytes.chunks_exact(self.frame_len)
    }

    /// Append a frame built from `data`
    ///
    /// `data` must be exactly [`Self::data_len`] bytes.
    pub fn push_data(&mut self, data: &[u8]) -> Result<()> {
        self.check_data(data)?;
        self.bytes.push(self.selector);
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    /// Insert `count` copies of the frame built from `data` before frame `at`
    ///
    /// `at` is clamped to the buffer length.
    pub fn insert_data(&mut self, at: usize, data: &[u8], count: usize) -> Result<()> {
        self.check_data(data)?;
        let at = at.min(self.len()) * self.frame_len;
        let mut block = Vec::with_capacity(count * self.frame_len);
        for _ in 0..count {
            block.push(self.selector);
            block.extend_from_slice(data);
        }
        self.bytes.splice(at..at, block);
        Ok(())
    }

    /// Insert `count` neutral frames before frame `at`
    pub fn insert_neutral(&mut self, at: usize, count: usize) {
        let neutral = vec![NEUTRAL_BYTE; self.data_len()];
        let at = at.min(self.len()) * self.frame_len;
        let mut block = Vec::with_capacity(count * self.frame_len);
        for _ in 0..count {
            block.push(self.selector);
            block.extend_from_slice(&neutral);
        }
        self.bytes.splice(at..at, block);
    }

    /// Remove up to `count` frames starting at frame `at`; returns how many were removed
    pub fn remove_frames(&mut self, at: usize, count: usize) -> usize {
        let len = self.len();
        let start = at.min(len);
        let end = start.saturating_add(count).min(len);
        self.bytes.drain(start * self.frame_len..end * self.frame_len);
        end - start
    }

    /// Bytes of up to `count` frames starting at frame `start`, clamped to the buffer
    pub fn slice_frames(&self, start: usize, count: usize) -> &[u8] {
        let len = self.len();
        let start = start.min(len);
        let end = start.saturating_add(count).min(len);
        &self.bytes[start * self.frame_len..end * self.frame_len]
    }

    fn check_data(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.data_len() {
            return Err(TasLinkError::Configuration(format!(
                "frame carries {} data bytes, buffer expects {}",
                data.len(),
                self.data_len()
            )));
        }
        Ok(())
    }
}

/// Byte geometry shared by a run's capture file and its device frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Bytes per record in the capture file
    pub record_len: usize,
    /// Distance between consecutive controllers' data in a record
    pub controller_stride: usize,
    /// Bytes each controller contributes to a device frame
    pub controller_span: usize,
    /// Number of controllers in the run
    pub controllers: usize,
}

impl FrameLayout {
    /// Work out the layout for a run, rejecting combinations the file cannot carry
    pub fn for_config(config: &RunConfig) -> Result<Self> {
        if config.controller_type == ControllerType::FourScore {
            return Err(TasLinkError::Unsupported(
                "four-score input data has no known frame layout".to_string(),
            ));
        }

        let format = config.format();
        let controllers = config.controller_count();
        let span = config.controller_type.data_lanes() * config.width.bytes();

        let (record_len, stride) = match (format.bytes_per_slot(), format.port_blocks()) {
            (Some(slot_bytes), Some(blocks)) => {
                let record_len = format.slots() * slot_bytes;
                let stride = record_len / blocks;
                if controllers > blocks {
                    return Err(TasLinkError::Configuration(format!(
                        "{:?} files hold {} ports, run uses {}",
                        format, blocks, controllers
                    )));
                }
                if span > stride {
                    return Err(TasLinkError::Configuration(format!(
                        "{} controllers at {} bits need {} bytes per port, {:?} files carry {}",
                        config.controller_type,
                        config.width.bits(),
                        span,
                        format,
                        stride
                    )));
                }
                (record_len, stride)
            }
            _ => (span * controllers, span),
        };

        Ok(Self {
            record_len,
            controller_stride: stride,
            controller_span: span,
            controllers,
        })
    }

    /// Data bytes per device frame
    pub fn data_len(&self) -> usize {
        self.controllers * self.controller_span
    }
}

/// Builds a run's frame buffer from its capture file
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    config: RunConfig,
    layout: FrameLayout,
    selector: u8,
}

impl FrameEncoder {
    /// Create an encoder for a run
    pub fn new(config: &RunConfig) -> Result<Self> {
        config.validate()?;
        let layout = FrameLayout::for_config(config)?;
        Ok(Self {
            config: config.clone(),
            layout,
            selector: UNBOUND_SELECTOR,
        })
    }

    /// Stamp frames with `selector` instead of the unbound placeholder
    pub fn with_selector(mut self, selector: u8) -> Self {
        self.selector = selector;
        self
    }

    /// Read and encode the run's capture file
    pub fn encode_file(&self) -> Result<FrameBuffer> {
        let path: &Path = &self.config.input_file;
        let capture = std::fs::read(path)
            .map_err(TasLinkError::from)
            .with_context(|| format!("Failed to read capture file {:?}", path))?;
        self.encode_bytes(&capture)
    }

    /// Encode capture bytes already in memory
    pub fn encode_bytes(&self, capture: &[u8]) -> Result<FrameBuffer> {
        let layout = self.layout;
        let mut buffer = FrameBuffer::new(self.selector, layout.data_len());
        let mut data = Vec::with_capacity(layout.data_len());

        for record in capture.chunks_exact(layout.record_len) {
            data.clear();
            for controller in 0..layout.controllers {
                let start = controller * layout.controller_stride;
                data.extend(
                    record[start..start + layout.controller_span]
                        .iter()
                        .map(|b| !b),
                );
            }
            buffer.push_data(&data)?;
        }

        let recorded = buffer.len();
        let trailing = capture.len() % layout.record_len;
        if trailing != 0 {
            tracing::debug!("Dropped {} trailing bytes of a partial record", trailing);
        }

        for &offset in &self.config.blank_frames {
            if offset > buffer.len() {
                return Err(TasLinkError::Configuration(format!(
                    "blank frame at {} is past the end of the recording ({} frames)",
                    offset,
                    buffer.len()
                )));
            }
            buffer.insert_neutral(offset, 1);
        }

        buffer.insert_neutral(0, self.config.dummy_frames);

        if let Some(header) = self.config.header {
            header.insert_into(&mut buffer)?;
        }

        tracing::debug!(
            "Encoded {} recorded frames ({} total, {} bytes each)",
            recorded,
            buffer.len(),
            buffer.frame_len()
        );

        Ok(buffer)
    }
}
