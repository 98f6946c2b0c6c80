//! batchd protocol types
//!
//! Contracts shared by clients, the caching worker and the executors
//! behind it: cacheable packets, progress events, listeners and the
//! dispatch boundary.

pub mod dispatch;
pub mod error;
pub mod listener;
pub mod progress;
pub mod task;

pub use dispatch::WorkDispatcher;
pub use error::{ErrorKind, WorkError};
pub use listener::{ProgressListener, RecordingListener};
pub use progress::{ProgressEvent, ProgressPayload};
pub use task::{CacheableTask, Priority, WorkRequest, DEFAULT_PRIORITY};
