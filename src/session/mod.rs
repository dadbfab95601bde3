//! Run sessions
//!
//! This module turns capture files into device frames and owns everything a
//! run needs while it plays.
//!
//! # Components
//!
//! - [`FrameEncoder`] / [`FrameBuffer`] - capture file to device frames
//! - [`RunConfig`] - what a run is: ports, controller type, width, file, edits
//! - [`RunSession`] - one active run: buffer, cursor, transitions, device state
//! - [`SessionRegistry`] - every active run plus the allocator and the link,
//!   shared between the command thread and the engine behind one lock
//!
//! # Example
//!
//! ```ignore
//! use taslink_rs::session::{PreparedRun, SessionRegistry};
//!
//! // Encode outside the lock...
//! let prepared = PreparedRun::encode(config)?;
//! // ...then register in one short critical section.
//! let id = registry.lock().unwrap().create_run(prepared)?.id;
//! ```

pub mod encoder;
pub mod header;
pub mod registry;
pub mod run;

pub use encoder::{FrameBuffer, FrameEncoder, FrameLayout, NEUTRAL_BYTE, UNBOUND_SELECTOR};
pub use registry::{
    DispatchOutcome, PreparedRun, Registration, RunSummary, SessionRegistry, SharedRegistry,
};
pub use run::{DispatchReport, RunConfig, RunId, RunSession, RunState};
