//! Run configuration and playback session

use crate::backend::commands::{lane_mask, transition_commands, DeviceLink};
use crate::error::{Result, TasLinkError};
use crate::session::encoder::FrameBuffer;
use crate::types::{
    is_valid_port, CaptureFormat, ControllerType, ControllerWidth, DeviceState, EventWindow,
    FlashCartHeader, StreamMask, Transition,
};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Everything needed to set up and encode one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Console ports used, one controller per port
    pub ports: Vec<u8>,
    /// Peripheral type on every port
    pub controller_type: ControllerType,
    /// Bits per controller
    pub width: ControllerWidth,
    /// Overread flag for the run's lanes
    pub overread: bool,
    /// Latch event window at run start
    pub window: EventWindow,
    /// Capture file
    pub input_file: PathBuf,
    /// DPCM fix at run start
    pub dpcm_fix: bool,
    /// Neutral frames between the header and the recording
    pub dummy_frames: usize,
    /// Single blank frames inserted into the recording, in order
    ///
    /// Offsets count from the first recorded frame, so header and dummy
    /// edits never move them.
    pub blank_frames: Vec<usize>,
    /// Flash-cart boot header, if any
    pub header: Option<FlashCartHeader>,
    /// Scheduled setting changes, ordered by frame
    pub transitions: Vec<Transition>,
}

impl RunConfig {
    /// Number of controllers (one per port)
    pub fn controller_count(&self) -> usize {
        self.ports.len()
    }

    /// Capture format, from the input file's extension
    pub fn format(&self) -> CaptureFormat {
        CaptureFormat::from_path(&self.input_file)
    }

    /// Port whose latch events drive this run (the lowest claimed port)
    pub fn event_port(&self) -> u8 {
        self.ports.iter().copied().min().unwrap_or(1)
    }

    /// Lane mask covering every lane of the run
    pub fn lane_mask(&self) -> u8 {
        lane_mask(&self.ports, self.controller_type)
    }

    /// Device settings at run start
    pub fn initial_state(&self) -> DeviceState {
        DeviceState {
            dpcm_fix: self.dpcm_fix,
            window: self.window,
        }
    }

    /// Frames the header occupies
    pub fn header_frames(&self) -> usize {
        self.header.map(|h| h.frame_count()).unwrap_or(0)
    }

    /// Buffer index of the first recorded frame
    pub fn recording_start(&self) -> usize {
        self.header_frames() + self.dummy_frames
    }

    /// Check the structural rules every run must follow
    pub fn validate(&self) -> Result<()> {
        if self.ports.is_empty() {
            return Err(TasLinkError::Configuration("a run needs at least one port".to_string()));
        }
        for (i, &port) in self.ports.iter().enumerate() {
            if !is_valid_port(port) {
                return Err(TasLinkError::Configuration(format!(
                    "port {} is not between 1 and 4",
                    port
                )));
            }
            if self.ports[..i].contains(&port) {
                return Err(TasLinkError::Configuration(format!(
                    "port {} is listed more than once",
                    port
                )));
            }
            if !self.controller_type.allowed_on_port(port) {
                return Err(TasLinkError::Configuration(format!(
                    "{} is not supported on port {}",
                    self.controller_type, port
                )));
            }
        }
        Ok(())
    }

    /// Insert a transition keeping frame order; equal frames keep insertion order
    pub fn insert_transition(&mut self, transition: Transition) -> usize {
        let index = self
            .transitions
            .partition_point(|t| t.frame <= transition.frame);
        self.transitions.insert(index, transition);
        index
    }
}

/// Playback state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Prebuffered, waiting for the first latch
    Buffering,
    /// Sending frames on latches
    Playing,
    /// Every frame has been sent
    Finished,
}

impl RunState {
    /// Display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            RunState::Buffering => "buffering",
            RunState::Playing => "playing",
            RunState::Finished => "finished",
        }
    }
}

/// Stable identity of a run for its whole lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u32);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// What one dispatch cycle did for a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Transitions applied, in trigger order
    pub transitions: Vec<Transition>,
    /// Frames actually written
    pub frames_sent: usize,
    /// The run reached its last frame during this cycle
    pub finished: bool,
}

/// One active run: its buffer, cursor and device-facing state
#[derive(Debug)]
pub struct RunSession {
    id: RunId,
    config: RunConfig,
    buffer: FrameBuffer,
    mask: StreamMask,
    /// Frames already sent
    cursor: usize,
    state: RunState,
    /// Device settings last sent for this run
    applied: DeviceState,
    /// Fired flag per transition, parallel to `config.transitions`
    fired: Vec<bool>,
    /// Unsaved edits
    modified: bool,
}

impl RunSession {
    /// Wrap an encoded buffer bound to `mask`
    pub fn new(id: RunId, mut config: RunConfig, buffer: FrameBuffer, mask: StreamMask) -> Self {
        config.transitions.sort_by_key(|t| t.frame);
        let fired = vec![false; config.transitions.len()];
        let applied = config.initial_state();
        Self {
            id,
            config,
            buffer,
            mask,
            cursor: 0,
            state: RunState::Buffering,
            applied,
            fired,
            modified: false,
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn mask(&self) -> StreamMask {
        self.mask
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn applied_state(&self) -> DeviceState {
        self.applied
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Buffer index where the dummy frames start
    fn dummy_start(&self) -> usize {
        self.config.header_frames()
    }

    /// Insert `n` neutral frames right after the header block
    pub fn prepend_dummy_frames(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let at = self.dummy_start();
        self.buffer.insert_neutral(at, n);
        self.config.dummy_frames += n;
        self.modified = true;
    }

    /// Remove `n` dummy frames from right after the header block
    pub fn shrink_dummy_frames(&mut self, n: usize) -> Result<()> {
        if n > self.config.dummy_frames {
            return Err(TasLinkError::Configuration(format!(
                "cannot remove {} dummy frames, run has {}",
                n, self.config.dummy_frames
            )));
        }
        if n == 0 {
            return Ok(());
        }
        let at = self.dummy_start();
        self.buffer.remove_frames(at, n);
        self.config.dummy_frames -= n;
        self.modified = true;
        Ok(())
    }

    /// Grow or shrink the dummy block to exactly `count` frames
    pub fn set_dummy_frames(&mut self, count: usize) -> Result<()> {
        let current = self.config.dummy_frames;
        if count >= current {
            self.prepend_dummy_frames(count - current);
            Ok(())
        } else {
            self.shrink_dummy_frames(current - count)
        }
    }

    /// Insert one neutral frame at absolute buffer index `offset`
    ///
    /// The offset must fall in the recording, after the header and dummy
    /// frames.
    pub fn insert_blank_frame(&mut self, offset: usize) -> Result<()> {
        let start = self.config.recording_start();
        if offset < start {
            return Err(TasLinkError::Configuration(format!(
                "frame {} is inside the header and dummy frames (recording starts at {})",
                offset, start
            )));
        }
        if offset > self.buffer.len() {
            return Err(TasLinkError::Configuration(format!(
                "frame {} is past the end of the run ({} frames)",
                offset,
                self.buffer.len()
            )));
        }
        self.buffer.insert_neutral(offset, 1);
        self.config.blank_frames.push(offset - start);
        self.modified = true;
        Ok(())
    }

    /// Replace the flash-cart header (or remove it with `None`)
    pub fn set_header(&mut self, header: Option<FlashCartHeader>) -> Result<()> {
        if header == self.config.header {
            return Ok(());
        }
        if let Some(new) = header {
            // Check the new header fits before touching the buffer.
            let mut scratch = FrameBuffer::new(self.buffer.selector(), self.buffer.data_len());
            new.insert_into(&mut scratch)?;
        }
        if let Some(old) = self.config.header.take() {
            old.remove_from(&mut self.buffer);
        }
        if let Some(new) = header {
            new.insert_into(&mut self.buffer)?;
        }
        self.config.header = header;
        self.modified = true;
        Ok(())
    }

    /// Schedule a transition
    pub fn add_transition(&mut self, transition: Transition) {
        let index = self.config.insert_transition(transition);
        self.fired.insert(index, false);
        self.modified = true;
    }

    /// Drop a scheduled transition by position
    pub fn remove_transition(&mut self, index: usize) -> Result<Transition> {
        if index >= self.config.transitions.len() {
            return Err(TasLinkError::Configuration(format!(
                "run has no transition #{}",
                index + 1
            )));
        }
        self.fired.remove(index);
        self.modified = true;
        Ok(self.config.transitions.remove(index))
    }

    /// Absolute frame count at which `transition` fires
    pub fn trigger_index(&self, transition: &Transition, prebuffer: usize) -> u64 {
        transition.frame
            + (self.config.header_frames() + self.config.dummy_frames + prebuffer) as u64
    }

    /// Positions of unfired transitions due within the next `latches` frames
    pub fn due_transitions(&self, latches: usize, prebuffer: usize) -> Vec<usize> {
        let start = self.cursor as u64;
        let end = start + latches as u64;
        self.config
            .transitions
            .iter()
            .enumerate()
            .filter(|(i, t)| {
                let trigger = self.trigger_index(t, prebuffer);
                !self.fired[*i] && start <= trigger && trigger < end
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Send whatever commands move the device to `transition`'s settings
    ///
    /// Repeating an identical transition sends nothing.
    pub fn apply_transition(
        &mut self,
        link: &mut DeviceLink,
        transition: &Transition,
        reset_hold: Duration,
    ) -> Result<()> {
        let target = transition.target_state();
        link.send_all(&transition_commands(&self.config, self.applied, target))?;
        if transition.reset {
            link.pulse_reset(reset_hold)?;
        }
        self.applied = target;
        Ok(())
    }

    /// Send up to `count` frames from the cursor without leaving the buffering state
    pub fn prebuffer(&mut self, link: &mut DeviceLink, count: usize) -> Result<bool> {
        self.send_from_cursor(link, count)
    }

    /// Send the next `n` frames; returns true the one time the run finishes
    pub fn advance(&mut self, link: &mut DeviceLink, n: usize) -> Result<bool> {
        if n > 0 && self.state == RunState::Buffering {
            self.state = RunState::Playing;
        }
        self.send_from_cursor(link, n)
    }

    fn send_from_cursor(&mut self, link: &mut DeviceLink, n: usize) -> Result<bool> {
        let bytes = self.buffer.slice_frames(self.cursor, n);
        let frames = bytes.len() / self.buffer.frame_len();
        link.send_frames(bytes, frames)?;
        self.cursor += frames;

        if self.cursor >= self.buffer.len() && self.state != RunState::Finished && n > 0 {
            self.state = RunState::Finished;
            tracing::info!("{} finished after {} frames", self.id, self.cursor);
            return Ok(true);
        }
        Ok(false)
    }

    /// Frames still to send
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.cursor)
    }

    /// One realtime cycle: fire due transitions, then send `latches` frames
    pub fn dispatch(
        &mut self,
        link: &mut DeviceLink,
        latches: usize,
        prebuffer: usize,
        reset_hold: Duration,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        for index in self.due_transitions(latches, prebuffer) {
            let transition = self.config.transitions[index];
            self.apply_transition(link, &transition, reset_hold)?;
            self.fired[index] = true;
            tracing::info!(
                "{} transition at frame {}: dpcm_fix={} window={}{}",
                self.id,
                transition.frame,
                transition.dpcm_fix,
                transition.window,
                if transition.reset { " +reset" } else { "" }
            );
            report.transitions.push(transition);
        }
        if latches > 0 {
            let before = self.cursor;
            report.finished = self.advance(link, latches)?;
            report.frames_sent = self.cursor - before;
        }
        Ok(report)
    }

    /// Rewind to frame 0 and restore the run's starting device settings
    ///
    /// The caller clears the lanes and prebuffers again afterwards.
    pub fn rewind(&mut self, link: &mut DeviceLink) -> Result<()> {
        let initial = self.config.initial_state();
        link.send_all(&transition_commands(&self.config, self.applied, initial))?;
        self.applied = initial;
        self.cursor = 0;
        self.state = RunState::Buffering;
        self.fired.iter_mut().for_each(|f| *f = false);
        Ok(())
    }
}
