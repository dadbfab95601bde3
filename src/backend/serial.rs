//! Serial port backend for the TASLink adapter
//!
//! This module opens the adapter's serial device with the `serialport`
//! crate and implements [`SerialLink`] on top of it.
//!
//! # Reads
//!
//! The port is opened with a bounded read timeout. A read blocks until the
//! adapter sends at least one byte or the timeout elapses, then drains
//! whatever else is already buffered so that a burst of latch signals is
//! handled in one dispatch cycle. The timeout is what lets the realtime
//! loop notice a shutdown request while the console is idle.

use crate::backend::link_trait::SerialLink;
use crate::config::LinkSettings;
use crate::error::{Result, TasLinkError};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Size of the scratch buffer used per read call
const READ_CHUNK: usize = 1024;

/// Serial port connected to the adapter
pub struct SerialPortLink {
    /// Open port handle
    port: Box<dyn SerialPort>,
    /// Device path the port was opened from
    path: String,
}

impl SerialPortLink {
    /// Open the adapter at `path`
    ///
    /// A port that is already in use by another process surfaces as a
    /// [`TasLinkError::LinkFailure`].
    pub fn open(path: &str, settings: &LinkSettings) -> Result<Self> {
        let port = serialport::new(path, settings.baud)
            .timeout(Duration::from_millis(settings.read_timeout_ms))
            .open()
            .map_err(|e| {
                TasLinkError::LinkFailure(format!("cannot open {} (is it in use?): {}", path, e))
            })?;

        tracing::info!("Opened {} at {} baud", path, settings.baud);

        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    /// List serial devices present on this machine
    pub fn available_ports() -> Vec<String> {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(e) => {
                tracing::warn!("Serial port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }
}

impl SerialLink for SerialPortLink {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .map_err(|e| TasLinkError::LinkFailure(format!("write to {} failed: {}", self.path, e)))
    }

    fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let first = match self.port.read(&mut chunk) {
            Ok(0) => {
                return Err(TasLinkError::LinkFailure(format!("{} closed", self.path)));
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                return Ok(0);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(0),
            Err(e) => {
                return Err(TasLinkError::LinkFailure(format!(
                    "read from {} failed: {}",
                    self.path, e
                )));
            }
        };
        buf.extend_from_slice(&chunk[..first]);

        // Coalesce whatever else arrived while we were waking up.
        let mut total = first;
        loop {
            let pending = self.port.bytes_to_read()? as usize;
            if pending == 0 {
                break;
            }
            let want = pending.min(READ_CHUNK);
            let n = self.port.read(&mut chunk[..want]).map_err(|e| {
                TasLinkError::LinkFailure(format!("read from {} failed: {}", self.path, e))
            })?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            total += n;
        }
        Ok(total)
    }

    fn try_clone_link(&self) -> Result<Box<dyn SerialLink>> {
        let port = self.port.try_clone()?;
        Ok(Box::new(SerialPortLink {
            port,
            path: self.path.clone(),
        }))
    }

    fn name(&self) -> String {
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_is_link_failure() {
        let settings = LinkSettings::default();
        let result = SerialPortLink::open("/dev/taslink-does-not-exist", &settings);
        match result {
            Err(TasLinkError::LinkFailure(msg)) => assert!(msg.contains("taslink-does-not-exist")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opening a missing device should fail"),
        }
    }

    #[test]
    #[ignore = "Port enumeration touches platform services"]
    fn test_available_ports_does_not_panic() {
        let _ = SerialPortLink::available_ports();
    }
}
