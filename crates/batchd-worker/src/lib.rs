//! batchd Worker
//!
//! Result caching for the batch daemon. Requests whose outputs were already
//! computed are answered from a content-addressed folder cache; identical
//! requests arriving while a computation runs are attached to it.
//!
//! The crate is transport-agnostic: work leaves through a
//! [`WorkDispatcher`](batchd_protocol::WorkDispatcher) and results come back
//! through [`ProgressListener`](batchd_protocol::ProgressListener) callbacks.

pub mod cache;
pub mod caching_worker;
pub mod config;
pub mod dedup;
pub mod publish;
pub mod wait;

pub use cache::{
    CacheError, CacheResult, CacheStats, CacheStore, CommitError, CommittedEntry, EntryInfo,
    ReservedEntry, MARKER_FILE_NAME, MAX_CACHE_FOLDERS, TEMP_MARKER_FILE_NAME,
};
pub use caching_worker::CachingWorker;
pub use config::{local_host_name, WorkerConfig};
pub use dedup::{FanOut, InFlightTask, Registration, TaskRegistry};
pub use publish::{publish_result_files, PublishingListener};
pub use wait::{wait_for_files, WaitError};
