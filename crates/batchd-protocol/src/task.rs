//! Cacheable work packets and the requests that carry them.

use std::path::{Path, PathBuf};

use crate::listener::ProgressListener;
use crate::progress::ProgressPayload;

/// A unit of work whose results can be stored in and served from the cache.
///
/// Two tasks with equal [`task_description`](Self::task_description) are the
/// same computation as far as the cache is concerned.
pub trait CacheableTask: Clone + Send + Sync + 'static {
    /// Canonical, stable encoding of every input that affects the output.
    fn task_description(&self) -> &str;

    /// Names of the files the computation produces, relative to its output folder.
    ///
    /// Order is significant: it pairs positionally with
    /// [`published_file_names`](Self::published_file_names).
    fn output_file_names(&self) -> Vec<String>;

    /// Ignore (and purge) any cached result for this description.
    fn is_from_scratch(&self) -> bool {
        false
    }

    /// Whether the cached outputs in `candidate` are out of date.
    fn is_stale(&self, candidate: &Path, output_file_names: &[String]) -> bool;

    /// The same task with its outputs redirected into `folder`.
    fn rebased_to(&self, folder: &Path) -> Self;

    /// Folder the caller wants the results copied into, if any.
    fn publish_target(&self) -> Option<PathBuf> {
        None
    }

    /// The caller's names for the published copies.
    fn published_file_names(&self) -> Vec<String> {
        self.output_file_names()
    }

    /// Report task-specific metadata for results sitting in `folder`.
    fn report_cached_result(
        &self,
        _listener: &dyn ProgressListener,
        _folder: &Path,
        _output_file_names: &[String],
    ) {
    }

    /// Persist anything worth keeping from `payload` into the work folder
    /// before the entry is committed.
    fn capture_progress(&self, _work_folder: &Path, _payload: &ProgressPayload) -> std::io::Result<()> {
        Ok(())
    }
}

/// Dispatch priority; higher runs sooner where the transport supports it.
pub type Priority = i32;

/// Default priority used when a request does not specify one.
pub const DEFAULT_PRIORITY: Priority = 5;

/// A message accepted by the caching worker.
#[derive(Debug, Clone)]
pub enum WorkRequest<T> {
    /// Compute (or serve from cache) a task.
    Task { task: T, priority: Priority },
    /// Delete every entry in the cache.
    WipeCache,
}

impl<T> WorkRequest<T> {
    /// A task request at the default priority.
    pub fn task(task: T) -> Self {
        Self::Task {
            task,
            priority: DEFAULT_PRIORITY,
        }
    }
}
