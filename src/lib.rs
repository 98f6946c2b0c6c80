//! batchd - result-caching batch daemon
//!
//! Ties the caching engine in `batchd-worker` to a concrete task type
//! ([`CommandTask`]) and an in-process dispatcher ([`LocalDispatcher`]),
//! plus the layered configuration and logging used by the `batchd` binary.

pub mod config;
pub mod local;
pub mod logging;
pub mod output;
pub mod task;

pub use batchd_protocol::{
    CacheableTask, ErrorKind, ProgressEvent, ProgressListener, ProgressPayload, WorkDispatcher,
    WorkError, WorkRequest,
};
pub use batchd_worker::{CacheStore, CachingWorker, WorkerConfig};
pub use config::{ConfigError, EffectiveConfig};
pub use local::LocalDispatcher;
pub use output::EventPrinter;
pub use task::{CommandTask, TaskError};
