//! Session registry
//!
//! The registry owns everything the command thread and the realtime engine
//! both touch: the [`PortLaneAllocator`], the active [`RunSession`]s and the
//! [`DeviceLink`] writer. It lives behind one [`Mutex`] ([`SharedRegistry`]);
//! every public method is one short critical section, and nothing slow
//! (file I/O, operator input) happens while the lock is held.
//!
//! # Run numbers
//!
//! The shell addresses runs by number, 1-based, in creation order. Removing
//! a run renumbers the ones after it. [`RunId`]s never change and are what
//! engine events carry.
//!
//! # Creating runs
//!
//! Capture files are encoded by [`PreparedRun::encode`] before the lock is
//! taken. The buffer is stamped with a placeholder selector; the registry
//! binds the real stream letter once it has allocated one.

use crate::backend::allocator::PortLaneAllocator;
use crate::backend::commands::{setup_commands, DeviceCommand, DeviceLink, LatchCounts};
use crate::backend::link_trait::LinkStats;
use crate::config::PlaybackSettings;
use crate::error::{Result, TasLinkError};
use crate::session::encoder::{FrameBuffer, FrameEncoder};
use crate::session::run::{DispatchReport, RunConfig, RunId, RunSession};
use crate::types::{FlashCartHeader, Transition};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Registry shared between the command thread and the engine thread
pub type SharedRegistry = Arc<Mutex<SessionRegistry>>;

/// A run encoded and ready to register
#[derive(Debug, Clone)]
pub struct PreparedRun {
    /// Run configuration
    pub config: RunConfig,
    /// Encoded frames, placeholder selector
    pub buffer: FrameBuffer,
    /// Load applied defaults; the run should be saved again
    pub needs_resave: bool,
}

impl PreparedRun {
    /// Read and encode the run's capture file
    pub fn encode(config: RunConfig) -> Result<Self> {
        let buffer = FrameEncoder::new(&config)?.encode_file()?;
        Ok(Self {
            config,
            buffer,
            needs_resave: false,
        })
    }

    /// Encode capture bytes already in memory
    pub fn from_capture(config: RunConfig, capture: &[u8]) -> Result<Self> {
        let buffer = FrameEncoder::new(&config)?.encode_bytes(capture)?;
        Ok(Self {
            config,
            buffer,
            needs_resave: false,
        })
    }

    /// Mark the run as needing a re-save once registered
    pub fn with_resave(mut self, needs_resave: bool) -> Self {
        self.needs_resave = needs_resave;
        self
    }
}

/// One run's share of a dispatch cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Run the latches were attributed to
    pub id: RunId,
    /// Latches seen on the run's event port
    pub latches: usize,
    /// What the run did with them
    pub report: DispatchReport,
}

/// Summary line for one run, for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// 1-based run number
    pub number: usize,
    pub id: RunId,
    pub config: RunConfig,
    pub mask: char,
    pub cursor: usize,
    pub frames: usize,
    pub state: &'static str,
    pub modified: bool,
    pub selected: bool,
}

/// A run accepted by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub id: RunId,
    /// The whole run fit in the prebuffer and has already been sent
    pub finished: bool,
}

/// Allocator, runs and device link under one lock
pub struct SessionRegistry {
    allocator: PortLaneAllocator,
    runs: Vec<RunSession>,
    selected: Option<RunId>,
    link: DeviceLink,
    playback: PlaybackSettings,
    next_id: u32,
}

impl SessionRegistry {
    /// Create a registry writing to `link`
    pub fn new(link: DeviceLink, playback: PlaybackSettings) -> Self {
        Self {
            allocator: PortLaneAllocator::new(),
            runs: Vec::new(),
            selected: None,
            link,
            playback,
            next_id: 1,
        }
    }

    /// Wrap the registry for sharing between threads
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Put the adapter in a known state: every latch event disabled
    pub fn initialize(&mut self) -> Result<()> {
        self.link.disable_all_events()?;
        tracing::info!("Adapter initialized on {}", self.link.name());
        Ok(())
    }

    fn reset_hold(&self) -> Duration {
        Duration::from_millis(self.playback.reset_hold_ms)
    }

    /// Register a prepared run: claim its resources, configure the adapter, prebuffer
    ///
    /// Availability of every port and a free stream letter are checked
    /// before anything is claimed or sent, so a refused run leaves no trace.
    pub fn register(&mut self, prepared: PreparedRun) -> Result<Registration> {
        let PreparedRun {
            config,
            mut buffer,
            needs_resave,
        } = prepared;
        config.validate()?;

        for &port in &config.ports {
            if !self.allocator.is_available(port, config.controller_type) {
                return Err(TasLinkError::ResourceConflict(format!(
                    "port {} cannot take a {} controller (claimed or unsupported)",
                    port, config.controller_type
                )));
            }
        }
        let mask = self.allocator.next_free_mask().ok_or_else(|| {
            TasLinkError::ResourceConflict("all four stream letters are in use".to_string())
        })?;
        for &port in &config.ports {
            self.allocator.claim(port, config.controller_type);
        }

        buffer.set_selector(mask.letter());
        let id = RunId(self.next_id);
        let mut run = RunSession::new(id, config, buffer, mask);
        run.set_modified(needs_resave);

        let setup = setup_commands(run.config(), mask);
        let prebuffer = self.playback.prebuffer;
        let sent = self
            .link
            .send_all(&setup)
            .and_then(|_| run.prebuffer(&mut self.link, prebuffer));
        let finished = match sent {
            Ok(finished) => finished,
            Err(e) => {
                self.release_resources(&run);
                return Err(e);
            }
        };

        self.next_id += 1;
        tracing::info!(
            "{} bound to stream {} on ports {:?} ({} frames)",
            id,
            mask,
            run.config().ports,
            run.buffer().len()
        );
        self.runs.push(run);
        self.selected = Some(id);
        Ok(Registration { id, finished })
    }

    /// Register a brand-new run; it starts out unsaved
    pub fn create_run(&mut self, prepared: PreparedRun) -> Result<Registration> {
        self.register(prepared.with_resave(true))
    }

    fn release_resources(&mut self, run: &RunSession) {
        for &port in &run.config().ports {
            self.allocator.release(port, run.config().controller_type);
        }
        self.allocator.free_mask(run.mask());
    }

    fn index_of(&self, number: usize) -> Result<usize> {
        if number == 0 || number > self.runs.len() {
            return Err(TasLinkError::UnknownRun(number));
        }
        Ok(number - 1)
    }

    /// Run number for `number`, or the selected run when `None`
    pub fn resolve(&self, number: Option<usize>) -> Result<usize> {
        match number {
            Some(n) => self.index_of(n).map(|i| i + 1),
            None => self
                .selected
                .and_then(|id| self.runs.iter().position(|r| r.id() == id))
                .map(|i| i + 1)
                .ok_or(TasLinkError::UnknownRun(0)),
        }
    }

    fn run_mut(&mut self, number: Option<usize>) -> Result<&mut RunSession> {
        let index = self.resolve(number)? - 1;
        Ok(&mut self.runs[index])
    }

    /// Remove a run, release its resources and clear its lanes
    pub fn remove_run(&mut self, number: Option<usize>) -> Result<RunId> {
        let index = self.resolve(number)? - 1;
        let run = self.runs.remove(index);
        self.release_resources(&run);
        self.selected = self.runs.last().map(|r| r.id());
        self.link.send(&DeviceCommand::ClearLanes {
            lanes: run.config().lane_mask(),
        })?;
        tracing::info!("{} removed", run.id());
        Ok(run.id())
    }

    /// Rewind one run to frame 0, restore its settings and prebuffer again
    pub fn reset_run(&mut self, number: Option<usize>) -> Result<RunId> {
        let index = self.resolve(number)? - 1;
        let prebuffer = self.playback.prebuffer;
        let run = &mut self.runs[index];
        run.rewind(&mut self.link)?;
        self.link.send(&DeviceCommand::ClearLanes {
            lanes: run.config().lane_mask(),
        })?;
        run.prebuffer(&mut self.link, prebuffer)?;
        tracing::info!("{} reset", run.id());
        Ok(run.id())
    }

    /// Rewind every run with a single global clear
    pub fn reset_all(&mut self) -> Result<()> {
        for run in &mut self.runs {
            run.rewind(&mut self.link)?;
        }
        self.link.send(&DeviceCommand::ClearAll)?;
        let prebuffer = self.playback.prebuffer;
        for run in &mut self.runs {
            run.prebuffer(&mut self.link, prebuffer)?;
        }
        tracing::info!("All {} runs reset", self.runs.len());
        Ok(())
    }

    /// Set a run's dummy frame count; returns the previous count
    pub fn modify_dummy_frames(&mut self, number: Option<usize>, count: usize) -> Result<usize> {
        let run = self.run_mut(number)?;
        let previous = run.config().dummy_frames;
        run.set_dummy_frames(count)?;
        Ok(previous)
    }

    /// Schedule a transition on a run
    pub fn add_transition(&mut self, number: Option<usize>, transition: Transition) -> Result<()> {
        self.run_mut(number)?.add_transition(transition);
        Ok(())
    }

    /// Drop a run's transition by 1-based position
    pub fn remove_transition(&mut self, number: Option<usize>, position: usize) -> Result<Transition> {
        let run = self.run_mut(number)?;
        if position == 0 {
            return Err(TasLinkError::Configuration(
                "transitions are numbered from 1".to_string(),
            ));
        }
        run.remove_transition(position - 1)
    }

    /// Insert one blank frame in a run at an absolute buffer index
    pub fn add_blank_frame(&mut self, number: Option<usize>, offset: usize) -> Result<()> {
        self.run_mut(number)?.insert_blank_frame(offset)
    }

    /// Set or clear a run's flash-cart header
    pub fn set_header(
        &mut self,
        number: Option<usize>,
        header: Option<FlashCartHeader>,
    ) -> Result<()> {
        self.run_mut(number)?.set_header(header)
    }

    /// Hold (`false`) or release (`true`) the console reset line
    pub fn console_power(&mut self, on: bool) -> Result<()> {
        self.link.send(&DeviceCommand::ConsoleReset { asserted: !on })
    }

    /// Power the console off, reset a run, and power the console back on
    pub fn restart_console(&mut self, number: Option<usize>) -> Result<RunId> {
        self.console_power(false)?;
        let id = self.reset_run(number)?;
        self.console_power(true)?;
        Ok(id)
    }

    /// Make a run the default target of run commands
    pub fn select(&mut self, number: usize) -> Result<RunId> {
        let index = self.index_of(number)?;
        let id = self.runs[index].id();
        self.selected = Some(id);
        Ok(id)
    }

    /// Number of active runs
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Active run by number
    pub fn run(&self, number: usize) -> Option<&RunSession> {
        number.checked_sub(1).and_then(|i| self.runs.get(i))
    }

    /// Active runs in creation order
    pub fn runs(&self) -> &[RunSession] {
        &self.runs
    }

    /// Listing of every active run
    pub fn list(&self) -> Vec<RunSummary> {
        self.runs
            .iter()
            .enumerate()
            .map(|(i, run)| RunSummary {
                number: i + 1,
                id: run.id(),
                config: run.config().clone(),
                mask: run.mask().letter() as char,
                cursor: run.cursor(),
                frames: run.buffer().len(),
                state: run.state().display_name(),
                modified: run.is_modified(),
                selected: self.selected == Some(run.id()),
            })
            .collect()
    }

    /// Copy of a run's configuration, for saving outside the lock
    pub fn config_snapshot(&self, number: Option<usize>) -> Result<(RunId, RunConfig)> {
        let index = self.resolve(number)? - 1;
        let run = &self.runs[index];
        Ok((run.id(), run.config().clone()))
    }

    /// Clear a run's unsaved flag after a successful save
    pub fn mark_saved(&mut self, id: RunId) {
        if let Some(run) = self.runs.iter_mut().find(|r| r.id() == id) {
            run.set_modified(false);
        }
    }

    /// Numbers of runs with unsaved edits
    pub fn unsaved_runs(&self) -> Vec<usize> {
        self.runs
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_modified())
            .map(|(i, _)| i + 1)
            .collect()
    }

    /// Feed one read's latches to the runs
    ///
    /// Each run takes the count of its event port. Runs sharing nothing are
    /// handled in creation order.
    pub fn dispatch(&mut self, counts: &LatchCounts) -> Result<Vec<DispatchOutcome>> {
        let prebuffer = self.playback.prebuffer;
        let hold = self.reset_hold();
        let mut outcomes = Vec::new();
        for run in &mut self.runs {
            let latches = counts.for_port(run.config().event_port());
            if latches == 0 {
                continue;
            }
            let report = run.dispatch(&mut self.link, latches, prebuffer, hold)?;
            outcomes.push(DispatchOutcome {
                id: run.id(),
                latches,
                report,
            });
        }
        Ok(outcomes)
    }

    /// Record bytes read by the engine
    pub fn record_read(&mut self, bytes: usize, counts: &LatchCounts) {
        let stats = self.link.stats_mut();
        stats.record_read(bytes, counts.total());
    }

    /// Record a latch burst over the high-water mark
    pub fn record_burst(&mut self) {
        self.link.stats_mut().latch_bursts += 1;
    }

    /// Traffic counters
    pub fn stats(&self) -> LinkStats {
        self.link.stats().clone()
    }

    /// Name of the adapter link
    pub fn link_name(&self) -> String {
        self.link.name()
    }
}
