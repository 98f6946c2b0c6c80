//! Progress payloads and the event sequence a listener observes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::WorkError;

/// A progress report emitted by a running computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressPayload {
    /// Free-form status line.
    Status { message: String },

    /// Completion estimate in `[0.0, 1.0]`.
    Percent { value: f32 },

    /// A new pair of log files was opened for the computation.
    ///
    /// Only the subscriber that owns the computation may receive this.
    NewLogFiles {
        log_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_log_id: Option<String>,
        output_log: PathBuf,
        error_log: PathBuf,
    },

    /// Results are available in a committed cache entry.
    CachedResult { folder: PathBuf, files: Vec<String> },

    /// Worker-specific structured data.
    Custom { data: serde_json::Value },
}

impl ProgressPayload {
    /// Create a status payload.
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    /// The message of a status payload.
    pub fn status_message(&self) -> Option<&str> {
        match self {
            Self::Status { message } => Some(message),
            _ => None,
        }
    }

    /// True for payloads that hand over ownership of a log file pair.
    pub fn is_log_ownership(&self) -> bool {
        matches!(self, Self::NewLogFiles { .. })
    }
}

/// One step of the start / progress* / terminal sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { host: String },
    Progress { payload: ProgressPayload },
    Succeeded,
    Failed { error: WorkError },
}

impl ProgressEvent {
    /// Whether this event ends the sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}
