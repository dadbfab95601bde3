//! Realtime stream engine
//!
//! This module contains the loop that runs on its own thread for as long as
//! the adapter is connected. It is the only reader of the serial link.
//!
//! # Cycle
//!
//! 1. Block on the link until bytes arrive or the read timeout passes. The
//!    timeout bounds how long a shutdown request can go unnoticed.
//! 2. Take everything already buffered in the same read.
//! 3. Tally latch bytes per port and log any port over the high-water mark.
//! 4. Lock the registry and dispatch: every run takes the count of its
//!    event port, fires due transitions, then sends that many frames.
//!
//! The registry lock is only taken once bytes are in hand, so the command
//! thread is never blocked behind a pending read.
//!
//! # Failure
//!
//! Any error out of a cycle means the link can no longer be trusted. The
//! engine reports [`EngineEvent::LinkFailed`], clears the running flag and
//! exits; there is no reconnect.

use crate::backend::commands::LatchCounts;
use crate::backend::link_trait::SerialLink;
use crate::error::{Result, TasLinkError};
use crate::session::{RunId, SharedRegistry};
use crate::types::Transition;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Messages sent from the engine to the command thread
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A run sent its last frame
    RunFinished { id: RunId },
    /// A port latched more often in one read than the high-water mark allows
    LatchBurst { port: u8, count: usize },
    /// A scheduled transition was applied
    TransitionApplied { id: RunId, transition: Transition },
    /// The link failed; the engine has stopped
    LinkFailed(String),
    /// The engine loop exited
    Stopped,
}

/// The realtime dispatch loop
pub struct StreamEngine {
    /// Read side of the adapter link
    reader: Box<dyn SerialLink>,
    /// Runs, allocator and the write side of the link
    registry: SharedRegistry,
    /// Event sender to the command thread
    event_tx: Sender<EngineEvent>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Per-port latch count above which a burst is reported
    high_water: usize,
    /// Reused read buffer
    read_buf: Vec<u8>,
}

impl StreamEngine {
    /// Create an engine reading from `reader`
    pub fn new(
        reader: Box<dyn SerialLink>,
        registry: SharedRegistry,
        event_tx: Sender<EngineEvent>,
        running: Arc<AtomicBool>,
        high_water: usize,
    ) -> Self {
        Self {
            reader,
            registry,
            event_tx,
            running,
            high_water,
            read_buf: Vec::with_capacity(256),
        }
    }

    /// Run until shutdown is requested or the link fails
    pub fn run(&mut self) {
        tracing::info!("Stream engine started on {}", self.reader.name());

        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.cycle() {
                tracing::error!("Stream engine stopping: {}", e);
                self.send_event(EngineEvent::LinkFailed(e.to_string()));
                self.running.store(false, Ordering::SeqCst);
            }
        }

        self.send_event(EngineEvent::Stopped);
        tracing::info!("Stream engine stopped");
    }

    /// One read-and-dispatch cycle; returns the number of latches seen
    pub fn cycle(&mut self) -> Result<usize> {
        self.read_buf.clear();
        let read = self.reader.read_available(&mut self.read_buf)?;
        if read == 0 {
            return Ok(0);
        }

        let counts = LatchCounts::from_bytes(&self.read_buf);
        tracing::trace!("Read {} bytes, {} latches", read, counts.total());

        let mut events = Vec::new();
        {
            let mut registry = self
                .registry
                .lock()
                .map_err(|_| TasLinkError::Channel("session registry lock poisoned".to_string()))?;
            registry.record_read(read, &counts);

            for (port, count) in counts.bursts(self.high_water) {
                tracing::warn!(
                    "Port {} latched {} times in one read (high-water {}), playback may have slipped",
                    port,
                    count,
                    self.high_water
                );
                registry.record_burst();
                events.push(EngineEvent::LatchBurst { port, count });
            }

            for outcome in registry.dispatch(&counts)? {
                for transition in outcome.report.transitions {
                    events.push(EngineEvent::TransitionApplied {
                        id: outcome.id,
                        transition,
                    });
                }
                if outcome.report.finished {
                    events.push(EngineEvent::RunFinished { id: outcome.id });
                }
            }
        }

        for event in events {
            self.send_event(event);
        }
        Ok(counts.total())
    }

    /// Send an event without blocking; a full or closed queue drops it
    fn send_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            tracing::debug!("Engine event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::commands::DeviceLink;
    use crate::backend::{MockLink, MockLinkHandle};
    use crate::config::PlaybackSettings;
    use crate::session::{PreparedRun, RunConfig, SessionRegistry};
    use crate::types::{ControllerType, ControllerWidth, EventWindow};
    use crossbeam_channel::{bounded, Receiver};
    use std::path::PathBuf;
    use std::time::Duration;

    fn create_test_engine() -> (StreamEngine, Receiver<EngineEvent>, MockLinkHandle, SharedRegistry) {
        let link = MockLink::new().with_read_timeout(Duration::from_millis(1));
        let handle = link.handle();
        let reader = link.try_clone_link().unwrap();
        let playback = PlaybackSettings {
            prebuffer: 1,
            latch_high_water: 3,
            reset_hold_ms: 0,
        };
        let registry = SessionRegistry::new(DeviceLink::new(Box::new(link)), playback).into_shared();
        let (event_tx, event_rx) = bounded(64);
        let running = Arc::new(AtomicBool::new(true));
        let engine = StreamEngine::new(reader, registry.clone(), event_tx, running, 3);
        (engine, event_rx, handle, registry)
    }

    fn add_run(registry: &SharedRegistry, port: u8, frames: usize, transitions: Vec<Transition>) {
        let config = RunConfig {
            ports: vec![port],
            controller_type: ControllerType::Normal,
            width: ControllerWidth::Bits8,
            overread: false,
            window: EventWindow::NONE,
            input_file: PathBuf::from("run.r08"),
            dpcm_fix: false,
            dummy_frames: 0,
            blank_frames: Vec::new(),
            header: None,
            transitions,
        };
        let prepared = PreparedRun::from_capture(config, &vec![0u8; frames * 2]).unwrap();
        registry.lock().unwrap().create_run(prepared).unwrap();
    }

    #[test]
    fn test_idle_cycle() {
        let (mut engine, events, _, _) = create_test_engine();
        assert_eq!(engine.cycle().unwrap(), 0);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_latches_advance_run() {
        let (mut engine, events, handle, registry) = create_test_engine();
        add_run(&registry, 1, 3, Vec::new());
        handle.clear_writes();

        handle.push_input(b"ff");
        assert_eq!(engine.cycle().unwrap(), 2);
        assert_eq!(handle.written(), b"A\xFFA\xFF".to_vec());
        assert_eq!(events.try_recv().unwrap(), EngineEvent::RunFinished { id: RunId(1) });

        let stats = registry.lock().unwrap().stats();
        assert_eq!(stats.latches, 2);
        assert_eq!(stats.bytes_read, 2);
    }

    #[test]
    fn test_burst_is_reported() {
        let (mut engine, events, handle, registry) = create_test_engine();
        add_run(&registry, 1, 100, Vec::new());

        handle.push_input(b"ffff");
        engine.cycle().unwrap();
        assert_eq!(events.try_recv().unwrap(), EngineEvent::LatchBurst { port: 1, count: 4 });
        assert_eq!(registry.lock().unwrap().stats().latch_bursts, 1);
    }

    #[test]
    fn test_transition_event() {
        let (mut engine, events, handle, registry) = create_test_engine();
        let transition = Transition::new(0, true, EventWindow::NONE);
        add_run(&registry, 2, 10, vec![transition]);

        // Trigger at 0 + 1 prebuffered frame.
        handle.push_input(b"g");
        engine.cycle().unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            EngineEvent::TransitionApplied {
                id: RunId(1),
                transition
            }
        );
    }

    #[test]
    fn test_link_failure_stops_engine() {
        let (mut engine, events, handle, _) = create_test_engine();
        handle.close();
        engine.run();

        assert!(!engine.running.load(Ordering::SeqCst));
        assert!(matches!(events.try_recv().unwrap(), EngineEvent::LinkFailed(_)));
        assert_eq!(events.try_recv().unwrap(), EngineEvent::Stopped);
    }

    #[test]
    fn test_shutdown_flag_stops_engine() {
        let (mut engine, events, _, _) = create_test_engine();
        engine.running.store(false, Ordering::SeqCst);
        engine.run();
        assert_eq!(events.try_recv().unwrap(), EngineEvent::Stopped);
    }
}
