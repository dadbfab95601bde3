//! SerialLink trait for a unified adapter interface
//!
//! This module provides the byte-level seam between the core and the
//! physical serial port, so the realtime engine and the run sessions can be
//! driven by the real port ([`crate::backend::SerialPortLink`]) or by an
//! in-memory mock in tests and dry runs.

use crate::error::Result;

/// Counters for traffic over the link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Total bytes written to the adapter
    pub bytes_written: u64,
    /// Number of write calls
    pub writes: u64,
    /// Data frames transmitted
    pub frames_sent: u64,
    /// Total bytes read from the adapter
    pub bytes_read: u64,
    /// Latch signals observed
    pub latches: u64,
    /// Read cycles whose latch count exceeded the high-water mark
    pub latch_bursts: u64,
}

impl LinkStats {
    /// Record a write of `bytes` bytes
    pub fn record_write(&mut self, bytes: usize) {
        self.writes += 1;
        self.bytes_written += bytes as u64;
    }

    /// Record a read of `bytes` bytes carrying `latches` latch signals
    pub fn record_read(&mut self, bytes: usize, latches: usize) {
        self.bytes_read += bytes as u64;
        self.latches += latches as u64;
    }
}

impl std::fmt::Display for LinkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "written {} B in {} writes ({} frames), read {} B ({} latches, {} bursts)",
            self.bytes_written,
            self.writes,
            self.frames_sent,
            self.bytes_read,
            self.latches,
            self.latch_bursts
        )
    }
}

/// Unified interface for the adapter's serial link
///
/// Implementations must be `Send`: one handle writes from whichever thread
/// holds the session registry lock, and a cloned handle reads on the
/// realtime thread.
#[cfg_attr(test, mockall::automock)]
pub trait SerialLink: Send {
    /// Write every byte of `data`, failing if the link cannot take them
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Wait up to the link's read timeout for input, then append everything
    /// currently available to `buf`
    ///
    /// Returns the number of bytes appended; `Ok(0)` means the timeout
    /// elapsed with nothing to read. A closed link is an error.
    fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize>;

    /// Open a second handle to the same link
    fn try_clone_link(&self) -> Result<Box<dyn SerialLink>>;

    /// Human-readable name of the link (device path)
    fn name(&self) -> String;
}
