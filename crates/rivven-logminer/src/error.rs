//! Error types for LogMiner buffering
//!
//! Storage faults are always fatal for the buffer operation that hit them.
//! Session faults carry a [`SessionFaultKind`] so the retry classifier can
//! reason about them without inspecting message text alone.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Spill tier failures (I/O, corruption, closed store)
    Storage,
    /// Event encode/decode failures
    Serialization,
    /// Mining session failures
    Session,
    /// Configuration errors (invalid settings)
    Configuration,
    /// Downstream sink failures
    Sink,
    /// Other/unknown errors
    Other,
}

/// Flavor of a mining session failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFaultKind {
    /// Driver-level recoverable connection condition
    RecoverableConnection,
    /// Socket / stream level I/O failure
    Io,
    /// Error raised by the database (ORA-xxxxx and friends)
    Database,
    /// Anything else
    Other,
}

/// LogMiner buffering errors
#[derive(Error, Debug)]
pub enum LogMinerError {
    /// Spill store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Spill store used after shutdown
    #[error("Spill store is closed")]
    StoreClosed,

    /// Event could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Buffer index outside `[0, len)`
    #[error("Index {index} out of bounds for transaction {transaction_id} with {len} events")]
    IndexOutOfBounds {
        transaction_id: String,
        index: usize,
        len: usize,
    },

    /// A spill write failed halfway through moving events, so the buffer no
    /// longer matches the transaction
    #[error("Event buffer of transaction {transaction_id} is inconsistent after a failed spill write")]
    BufferPoisoned { transaction_id: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Mining session failure, optionally wrapping its cause
    #[error("Session error: {message}")]
    Session {
        kind: SessionFaultKind,
        message: String,
        #[source]
        source: Option<Box<LogMinerError>>,
    },

    /// Downstream sink rejected a batch
    #[error("Sink error: {0}")]
    Sink(String),

    /// Retry budget exhausted for a retriable session fault
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<LogMinerError>,
    },
}

impl LogMinerError {
    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new sink error
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Create a session error without a cause
    pub fn session(kind: SessionFaultKind, msg: impl Into<String>) -> Self {
        Self::Session {
            kind,
            message: msg.into(),
            source: None,
        }
    }

    /// Create a database-raised session error (e.g. `ORA-03135: connection lost`)
    pub fn database(msg: impl Into<String>) -> Self {
        Self::session(SessionFaultKind::Database, msg)
    }

    /// Create a recoverable connection session error
    pub fn recoverable_connection(msg: impl Into<String>) -> Self {
        Self::session(SessionFaultKind::RecoverableConnection, msg)
    }

    /// Attach a cause to a session error. Other variants are returned unchanged.
    pub fn caused_by(self, cause: LogMinerError) -> Self {
        match self {
            Self::Session { kind, message, .. } => Self::Session {
                kind,
                message,
                source: Some(Box::new(cause)),
            },
            other => other,
        }
    }

    /// Get the error category for metrics and alerting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Storage(_)
            | Self::StoreClosed
            | Self::IndexOutOfBounds { .. }
            | Self::BufferPoisoned { .. } => ErrorCategory::Storage,
            Self::Io(_) => ErrorCategory::Storage,
            Self::Codec(_) => ErrorCategory::Serialization,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Session { .. } | Self::RetriesExhausted { .. } => ErrorCategory::Session,
            Self::Sink(_) => ErrorCategory::Sink,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage_error",
            Self::StoreClosed => "store_closed",
            Self::Codec(_) => "codec_error",
            Self::IndexOutOfBounds { .. } => "index_out_of_bounds",
            Self::BufferPoisoned { .. } => "buffer_poisoned",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Session { .. } => "session_error",
            Self::Sink(_) => "sink_error",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

impl From<postcard::Error> for LogMinerError {
    fn from(e: postcard::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for LogMinerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Result type for LogMiner buffering operations
pub type Result<T> = std::result::Result<T, LogMinerError>;
