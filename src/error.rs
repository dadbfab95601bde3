//! Error handling for TASLink-RS
//!
//! This module defines the error taxonomy shared by the allocator, the frame
//! encoder, the run sessions and the realtime engine, plus a Result alias.
//!
//! Resource and configuration errors are recoverable and are always raised
//! before any state is mutated or any device command is sent. Link failures
//! are terminal for the link and propagate out of the realtime loop.

use thiserror::Error;

/// Main error type for TASLink-RS operations
#[derive(Error, Debug)]
pub enum TasLinkError {
    /// A port, lane or stream letter is already claimed
    #[error("Resource conflict: {0}")]
    ResourceConflict(String),

    /// Invalid run parameters (port/type combination, window, width, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A configuration the hardware support does not cover
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    /// Serial write/read error or unexpected link closure
    #[error("Link failure: {0}")]
    LinkFailure(String),

    /// Malformed or structurally invalid run document
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A run number that does not name an active run
    #[error("No active run #{0}")]
    UnknownRun(usize),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TasLinkError>,
    },
}

impl TasLinkError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TasLinkError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error means the link can no longer be used
    pub fn is_fatal(&self) -> bool {
        match self {
            TasLinkError::LinkFailure(_) => true,
            TasLinkError::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

impl From<serialport::Error> for TasLinkError {
    fn from(err: serialport::Error) -> Self {
        TasLinkError::LinkFailure(err.to_string())
    }
}

impl From<toml::de::Error> for TasLinkError {
    fn from(err: toml::de::Error) -> Self {
        TasLinkError::Persistence(err.to_string())
    }
}

impl From<toml::ser::Error> for TasLinkError {
    fn from(err: toml::ser::Error) -> Self {
        TasLinkError::Persistence(err.to_string())
    }
}

/// Result type alias for TASLink-RS operations
pub type Result<T> = std::result::Result<T, TasLinkError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
