//! Backend module for the TASLink adapter link
//!
//! This module handles everything that touches the adapter: port and lane
//! bookkeeping, the wire protocol, the serial link itself, and the realtime
//! engine that runs on its own thread.
//!
//! # Architecture
//!
//! The engine runs in a separate thread from the command shell:
//!
//! - [`StreamEngine`] - Realtime loop: reads latches, dispatches frames
//! - [`EngineEvent`] - Messages sent from the engine to the command thread
//! - [`EngineHandle`] - Command-side handle: registry access, events, shutdown
//! - [`LinkBackend`] - Entry point that wires the link, registry and engine
//!
//! # Components
//!
//! - [`PortLaneAllocator`] - Claimed ports, lanes and stream letters
//! - [`DeviceCommand`] / [`DeviceLink`] - Wire protocol encoder and writer
//! - [`SerialLink`] - Byte-level seam over the serial port
//! - [`SerialPortLink`] - Real serial port
//! - [`MockLink`] - In-memory link for tests and dry runs (feature-gated)
//!
//! # Example
//!
//! ```ignore
//! use taslink_rs::backend::{LinkBackend, SerialPortLink};
//! use taslink_rs::config::Settings;
//!
//! let settings = Settings::default();
//! let link = SerialPortLink::open("/dev/ttyUSB0", &settings.link)?;
//! let (backend, handle) = LinkBackend::new(Box::new(link), &settings)?;
//!
//! let engine_thread = backend.spawn()?;
//!
//! // Register runs through the shared registry
//! handle.registry().lock().unwrap().create_run(prepared)?;
//!
//! // React to engine events
//! for event in handle.drain() {
//!     println!("{:?}", event);
//! }
//!
//! handle.shutdown();
//! engine_thread.join().ok();
//! ```

pub mod allocator;
pub mod commands;
pub mod engine;
pub mod link_trait;
#[cfg(any(test, feature = "mock-link"))]
pub mod mock_link;
pub mod serial;

pub use allocator::PortLaneAllocator;
pub use commands::{DeviceCommand, DeviceLink, LatchCounts, LATCH_BYTES};
pub use engine::{EngineEvent, StreamEngine};
pub use link_trait::{LinkStats, SerialLink};
#[cfg(any(test, feature = "mock-link"))]
pub use mock_link::{MockLink, MockLinkHandle};
pub use serial::SerialPortLink;

use crate::config::Settings;
use crate::error::{Result, TasLinkError};
use crate::session::{SessionRegistry, SharedRegistry};
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Capacity of the engine event queue
const EVENT_QUEUE: usize = 1024;

/// Command-side handle to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    /// Registry shared with the engine
    registry: SharedRegistry,
    /// Events from the engine
    events: Receiver<EngineEvent>,
    /// Running flag shared with the engine
    running: Arc<AtomicBool>,
}

impl EngineHandle {
    /// The shared session registry
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Receiver for engine events, for use in `select!`
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.events.try_recv().ok()
    }

    /// Receive all pending events
    pub fn drain(&self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Whether the engine is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the engine to stop; it exits within one read timeout
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// The adapter backend, ready to run its engine on a thread
pub struct LinkBackend {
    engine: StreamEngine,
    running: Arc<AtomicBool>,
}

impl LinkBackend {
    /// Split `link` into a reader for the engine and a writer for the registry
    ///
    /// The adapter is initialized (all latch events disabled) before this
    /// returns.
    pub fn new(link: Box<dyn SerialLink>, settings: &Settings) -> Result<(Self, EngineHandle)> {
        settings.playback.validate()?;
        let reader = link.try_clone_link()?;
        let mut registry = SessionRegistry::new(DeviceLink::new(link), settings.playback.clone());
        registry.initialize()?;
        let registry = registry.into_shared();

        let (event_tx, event_rx) = bounded(EVENT_QUEUE);
        let running = Arc::new(AtomicBool::new(true));

        let engine = StreamEngine::new(
            reader,
            registry.clone(),
            event_tx,
            running.clone(),
            settings.playback.latch_high_water,
        );

        let handle = EngineHandle {
            registry,
            events: event_rx,
            running: running.clone(),
        };

        Ok((Self { engine, running }, handle))
    }

    /// Run the engine loop on the current thread
    pub fn run(mut self) {
        self.engine.run();
    }

    /// Run the engine loop on a new thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("stream-engine".to_string())
            .spawn(move || self.run())
            .map_err(|e| TasLinkError::Channel(format!("Failed to spawn engine thread: {}", e)))
    }

    /// Get a handle to stop the engine
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}
