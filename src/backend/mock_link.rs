//! Mock Link Implementation for Testing
//!
//! This module provides an in-memory [`SerialLink`] that records every write
//! and replays scripted input, so the engine, the run sessions and the shell
//! can be exercised without an adapter plugged in.
//!
//! # Example
//!
//! ```ignore
//! use taslink_rs::backend::MockLink;
//!
//! let link = MockLink::new();
//! let handle = link.handle();
//!
//! // Pretend the console latched port 1 three times
//! handle.push_input(b"fff");
//!
//! // ... run the engine with `link` ...
//!
//! let sent = handle.written();
//! ```
//!
//! # Enabling
//!
//! The mock link is compiled with the `mock-link` feature (on by default),
//! which also enables the binary's `--dry-run` flag.

use crate::backend::link_trait::SerialLink;
use crate::error::{Result, TasLinkError};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default time a read waits for scripted input
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5);

/// State shared between all clones of a mock link and its handles
#[derive(Debug, Default)]
struct Shared {
    /// Every write, in order
    writes: Mutex<Vec<Vec<u8>>>,
    /// Link closed: reads fail once input is drained
    closed: AtomicBool,
    /// Writes fail while set
    fail_writes: AtomicBool,
    /// Writes are accepted but not recorded
    discard_writes: AtomicBool,
}

/// In-memory serial link
#[derive(Debug, Clone)]
pub struct MockLink {
    shared: Arc<Shared>,
    input_tx: Sender<Vec<u8>>,
    input_rx: Receiver<Vec<u8>>,
    read_timeout: Duration,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    /// Create a mock link with no scripted input
    pub fn new() -> Self {
        let (input_tx, input_rx) = unbounded();
        Self {
            shared: Arc::new(Shared::default()),
            input_tx,
            input_rx,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Set how long a read waits for scripted input
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Accept writes without recording them, for long dry runs
    pub fn discarding_writes(self) -> Self {
        self.shared.discard_writes.store(true, Ordering::SeqCst);
        self
    }

    /// Get a handle for scripting input and inspecting output
    pub fn handle(&self) -> MockLinkHandle {
        MockLinkHandle {
            shared: self.shared.clone(),
            input_tx: self.input_tx.clone(),
        }
    }
}

impl SerialLink for MockLink {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TasLinkError::LinkFailure("mock link closed".to_string()));
        }
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(TasLinkError::LinkFailure("mock write failure".to_string()));
        }
        if self.shared.discard_writes.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Ok(mut writes) = self.shared.writes.lock() {
            writes.push(data.to_vec());
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let first = match self.input_rx.recv_timeout(self.read_timeout) {
            Ok(bytes) => bytes,
            Err(RecvTimeoutError::Timeout) => {
                if self.shared.closed.load(Ordering::SeqCst) {
                    return Err(TasLinkError::LinkFailure("mock link closed".to_string()));
                }
                return Ok(0);
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(TasLinkError::LinkFailure("mock link closed".to_string()));
            }
        };
        let mut total = first.len();
        buf.extend_from_slice(&first);
        while let Ok(more) = self.input_rx.try_recv() {
            total += more.len();
            buf.extend_from_slice(&more);
        }
        Ok(total)
    }

    fn try_clone_link(&self) -> Result<Box<dyn SerialLink>> {
        Ok(Box::new(self.clone()))
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

/// Test-side handle to a [`MockLink`]
#[derive(Debug, Clone)]
pub struct MockLinkHandle {
    shared: Arc<Shared>,
    input_tx: Sender<Vec<u8>>,
}

impl MockLinkHandle {
    /// Queue bytes for the next read
    pub fn push_input(&self, bytes: &[u8]) {
        let _ = self.input_tx.send(bytes.to_vec());
    }

    /// Every write so far, one entry per write call
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.shared
            .writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    /// All written bytes concatenated
    pub fn written(&self) -> Vec<u8> {
        self.writes().concat()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        if let Ok(mut writes) = self.shared.writes.lock() {
            writes.clear();
        }
    }

    /// Close the link: pending input is still delivered, then reads fail
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    /// Make subsequent writes fail
    pub fn fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_are_recorded() {
        let mut link = MockLink::new();
        let handle = link.handle();
        link.write_all(b"sp1\x00").unwrap();
        link.write_all(b"R").unwrap();
        assert_eq!(handle.writes().len(), 2);
        assert_eq!(handle.written(), b"sp1\x00R".to_vec());
    }

    #[test]
    fn test_reads_coalesce_pending_input() {
        let mut link = MockLink::new();
        let handle = link.handle();
        handle.push_input(b"ff");
        handle.push_input(b"g");

        let mut buf = Vec::new();
        assert_eq!(link.read_available(&mut buf).unwrap(), 3);
        assert_eq!(buf, b"ffg".to_vec());
    }

    #[test]
    fn test_read_times_out_empty() {
        let mut link = MockLink::new().with_read_timeout(Duration::from_millis(1));
        let mut buf = Vec::new();
        assert_eq!(link.read_available(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_closed_link_fails_after_draining() {
        let mut link = MockLink::new().with_read_timeout(Duration::from_millis(1));
        let handle = link.handle();
        handle.push_input(b"f");
        handle.close();

        let mut buf = Vec::new();
        assert_eq!(link.read_available(&mut buf).unwrap(), 1);
        assert!(link.read_available(&mut buf).is_err());
        assert!(link.write_all(b"R").is_err());
    }

    #[test]
    fn test_discarding_link_records_nothing() {
        let mut link = MockLink::new().discarding_writes();
        let handle = link.handle();
        link.write_all(b"sd0").unwrap();
        assert!(handle.writes().is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let link = MockLink::new();
        let handle = link.handle();
        let mut clone = link.try_clone_link().unwrap();
        clone.write_all(b"sd1").unwrap();
        assert_eq!(handle.written(), b"sd1".to_vec());
    }
}
