//! Content-addressed result cache
//!
//! Layout: `<root>/<hh>/<hh>/<N>/` where the two `hh` segments come from a
//! hash of the task description and `<N>` is a positive integer. Each leaf
//! holds the task's output files plus a `_task_description` marker whose
//! content is the literal description.
//!
//! ## Entry states
//!
//! | State     | Marker               | Visible to lookup |
//! |-----------|----------------------|-------------------|
//! | Reserved  | `_task_description~` | no                |
//! | Committed | `_task_description`  | yes               |
//!
//! The rename from the temporary marker to the final one is the single
//! step that publishes an entry, so readers never see a half-written
//! entry and no lock is needed on the filesystem side.

mod bucket;
mod entry;
mod store;

use std::io;
use std::path::PathBuf;

use batchd_protocol::{ErrorKind, WorkError};
use thiserror::Error;

pub use bucket::{bucket_path, bucket_segments, description_hash, is_bucket_name};
pub use entry::{
    CommittedEntry, EntryInfo, ReservedEntry, MARKER_FILE_NAME, TEMP_MARKER_FILE_NAME,
};
pub use store::{CacheStats, CacheStore, CommitError, MAX_CACHE_FOLDERS};

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors from cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("malformed cache: {0} is not a directory")]
    MalformedBucket(PathBuf),

    #[error("the cache directory {0} is not writable")]
    NotWritable(PathBuf),

    #[error("too many cached folders in {bucket}: limit of {limit} reached")]
    CapacityExhausted { bucket: PathBuf, limit: usize },

    #[error("temporary task description file does not exist in {0}; the folder was not produced by reserve_work_folder")]
    NotReserved(PathBuf),

    #[error("work folder {0} was reserved for a different task")]
    ReservationMismatch(PathBuf),

    #[error("cached output file {0} did not exist although the worker signalled success")]
    MissingOutput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// Failure kind reported to listeners.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotWritable(_) | Self::CapacityExhausted { .. } => ErrorKind::Capacity,
            Self::MalformedBucket(_) | Self::Io(_) => ErrorKind::Io,
            Self::NotReserved(_) | Self::ReservationMismatch(_) | Self::MissingOutput(_) => {
                ErrorKind::ContractViolation
            }
        }
    }
}

impl From<CacheError> for WorkError {
    fn from(err: CacheError) -> Self {
        match &err {
            CacheError::MissingOutput(path) => WorkError::missing_output(path),
            _ => WorkError::new(err.kind(), err.to_string()),
        }
    }
}
