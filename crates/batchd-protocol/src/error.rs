//! Error types delivered to progress listeners.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Closed set of failure kinds a listener can observe.
///
/// These kinds are stable and let callers tell retryable outcomes
/// from fatal ones without matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Cache folder not writable, or the folder numbering space is exhausted.
    Capacity,
    /// Filesystem or transport I/O failure.
    Io,
    /// A worker reported success without delivering its declared outputs,
    /// or an engine call was made on state it did not produce.
    ContractViolation,
    /// Output files did not materialize in time.
    Timeout,
    /// The dispatched computation itself failed.
    Worker,
    /// The request could not be accepted (e.g. the dispatcher is not running).
    InvalidRequest,
}

impl ErrorKind {
    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Timeout | Self::Worker)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity => write!(f, "CAPACITY"),
            Self::Io => write!(f, "IO"),
            Self::ContractViolation => write!(f, "CONTRACT_VIOLATION"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Worker => write!(f, "WORKER"),
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
        }
    }
}

/// Failure payload carried by `on_failure`.
///
/// Cloneable so a fan-out can replay it to subscribers that join late.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct WorkError {
    /// Failure kind.
    pub kind: ErrorKind,
    /// Human-readable, single-line message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl WorkError {
    /// Create a new error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new error with additional data.
    pub fn with_data(kind: ErrorKind, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create a WORKER error (the computation failed).
    pub fn worker(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Worker, message)
    }

    /// Create an IO error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    /// Create a TIMEOUT error listing the files that never appeared.
    pub fn timeout(waited: Duration, missing: &[&Path]) -> Self {
        let missing: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
        Self::with_data(
            ErrorKind::Timeout,
            format!(
                "timeout after {:?} waiting for file collection: [{}]",
                waited,
                missing.join(", ")
            ),
            serde_json::json!({ "waited_ms": waited.as_millis() as u64, "missing": missing }),
        )
    }

    /// Create a CONTRACT_VIOLATION error for a declared output that was never produced.
    pub fn missing_output(file: &Path) -> Self {
        Self::with_data(
            ErrorKind::ContractViolation,
            format!(
                "output file {} did not exist although the worker signalled success",
                file.display()
            ),
            serde_json::json!({ "file": file.display().to_string() }),
        )
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }
}

impl From<std::io::Error> for WorkError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}
