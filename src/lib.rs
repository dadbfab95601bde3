//! # TASLink-RS: controller input replay over the TASLink adapter
//!
//! Plays recorded controller input back into a real game console, one frame
//! per console latch, through the TASLink serial adapter. Several runs can
//! play at once on different console ports.
//!
//! ## Architecture
//!
//! - **Backend**: port/lane bookkeeping, the adapter wire protocol, the serial
//!   link, and the realtime [`StreamEngine`](backend::StreamEngine) thread
//! - **Session**: capture file encoding, run sessions with their buffers and
//!   scheduled transitions, and the [`SessionRegistry`] shared by both threads
//! - **Config**: TOML settings and saved run documents
//! - **Shell**: the operator's line-oriented command interface
//! - **Communication**: one mutex around the registry, crossbeam channels for
//!   engine events and operator input
//!
//! ## Configuration
//!
//! Settings are read from the platform configuration directory under
//! `taslink-rs` (see [`config`]), or from a file given with `--config`.
//!
//! ## Example
//!
//! ```ignore
//! use taslink_rs::{
//!     backend::{LinkBackend, SerialPortLink},
//!     config::Settings,
//!     shell::Shell,
//! };
//!
//! fn main() -> taslink_rs::Result<()> {
//!     let settings = Settings::load_or_default(None);
//!     let link = SerialPortLink::open("/dev/ttyUSB0", &settings.link)?;
//!     let (backend, handle) = LinkBackend::new(Box::new(link), &settings)?;
//!
//!     let engine = backend.spawn()?;
//!     Shell::new(handle.clone(), std::io::stdout())
//!         .run(std::io::BufReader::new(std::io::stdin()))?;
//!
//!     handle.shutdown();
//!     engine.join().ok();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod session;
pub mod shell;
pub mod types;

// Re-export commonly used types
pub use backend::{EngineEvent, EngineHandle, LinkBackend, PortLaneAllocator};
pub use config::{RunDocument, Settings};
pub use error::{Result, TasLinkError};
pub use session::{FrameBuffer, FrameEncoder, RunConfig, RunSession, SessionRegistry};
pub use types::{ControllerType, ControllerWidth, EventWindow, FlashCartHeader, Transition};
