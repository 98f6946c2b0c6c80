//! On-disk cache store: lookup, reserve, commit, wipe.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use batchd_protocol::CacheableTask;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::bucket::{bucket_path, is_bucket_name};
use super::entry::{
    CommittedEntry, EntryInfo, ReservedEntry, MARKER_FILE_NAME, TEMP_MARKER_FILE_NAME,
};
use super::{CacheError, CacheResult};

/// Upper bound on numbered entries per bucket.
pub const MAX_CACHE_FOLDERS: usize = 10_000;

/// A failed commit, handing the reservation back so the caller can discard it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct CommitError {
    #[source]
    pub error: CacheError,
    pub reserved: ReservedEntry,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of committed entries
    pub entries: usize,
    /// Numbered folders without a final marker (in progress or abandoned)
    pub uncommitted: usize,
    /// Total size of all bucket contents in bytes
    pub total_size_bytes: u64,
}

/// Content-addressed store rooted at a single local directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    max_cache_folders: usize,
}

impl CacheStore {
    /// Create a store over `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_cache_folders: MAX_CACHE_FOLDERS,
        }
    }

    /// Override the per-bucket entry limit.
    pub fn with_max_cache_folders(mut self, max_cache_folders: usize) -> Self {
        self.max_cache_folders = max_cache_folders;
        self
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-bucket entry limit.
    pub fn max_cache_folders(&self) -> usize {
        self.max_cache_folders
    }

    /// Create the root directory if needed.
    pub fn install(&self) -> CacheResult<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Verify the root exists, is a directory and is writable.
    pub fn check(&self) -> CacheResult<()> {
        let metadata = match fs::metadata(&self.root) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotWritable(self.root.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_dir() || metadata.permissions().readonly() {
            return Err(CacheError::NotWritable(self.root.clone()));
        }
        Ok(())
    }

    /// Bucket directory for a task description.
    pub fn bucket_for(&self, task_description: &str) -> PathBuf {
        bucket_path(&self.root, task_description)
    }

    /// Find a committed, usable entry for `task`.
    ///
    /// Every entry matching the description that is stale, or any match
    /// at all when the task is from scratch, is deleted while scanning.
    /// A marker that cannot be read is logged and skipped.
    pub fn lookup<T: CacheableTask>(&self, task: &T) -> CacheResult<Option<CommittedEntry>> {
        let task_description = task.task_description();
        let bucket = self.bucket_for(task_description);
        if !bucket.exists() {
            return Ok(None);
        }
        if !bucket.is_dir() {
            return Err(CacheError::MalformedBucket(bucket));
        }

        let output_files = task.output_file_names();
        for candidate in Self::numbered_folders(&bucket)? {
            let marker = candidate.join(MARKER_FILE_NAME);
            if !marker.exists() || !all_files_exist(&candidate, &output_files) {
                continue;
            }

            let cached_description = match fs::read_to_string(&marker) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Cache cannot read task description {}: {}", marker.display(), e);
                    continue;
                }
            };
            if cached_description != task_description {
                continue;
            }

            if task.is_from_scratch() {
                info!(
                    "Cache deleting entry (rerun from scratch requested): {}",
                    candidate.display()
                );
                evict(&candidate)?;
            } else if task.is_stale(&candidate, &output_files) {
                info!(
                    "Cache deleting stale entry (inputs newer than outputs): {}",
                    candidate.display()
                );
                evict(&candidate)?;
            } else {
                debug!("Cache hit: {}", candidate.display());
                return Ok(Some(CommittedEntry::new(candidate)));
            }
        }

        Ok(None)
    }

    /// Reserve a fresh numbered folder in the task's bucket.
    ///
    /// The folder gets a temporary marker so it stays invisible to
    /// [`lookup`](Self::lookup) until [`commit`](Self::commit).
    pub fn reserve_work_folder<T: CacheableTask>(&self, task: &T) -> CacheResult<ReservedEntry> {
        let task_description = task.task_description();
        let bucket = self.bucket_for(task_description);

        if bucket.exists() && !bucket.is_dir() {
            return Err(CacheError::MalformedBucket(bucket));
        }
        // Fail early if the bucket cannot be created
        if fs::create_dir_all(&bucket).is_err() || !bucket.is_dir() {
            return Err(CacheError::NotWritable(bucket));
        }
        if fs::metadata(&bucket)?.permissions().readonly() {
            return Err(CacheError::NotWritable(bucket));
        }

        let folder = self.create_numbered_folder(&bucket)?;
        let reserved = ReservedEntry::new(folder, task_description.to_string());

        if let Err(e) = fs::write(reserved.temp_marker(), task_description) {
            // Not worth keeping a folder nobody can commit
            if let Err(discard_err) = reserved.discard() {
                warn!("Cache cannot discard unusable work folder: {}", discard_err);
            }
            return Err(e.into());
        }

        debug!("Reserved work folder {}", reserved.folder().display());
        Ok(reserved)
    }

    /// Publish a reserved folder as a committed entry.
    ///
    /// All declared outputs must be present as files. Renaming the
    /// temporary marker is the last step; until then nothing is visible.
    pub fn commit<T: CacheableTask>(
        &self,
        task: &T,
        reserved: ReservedEntry,
    ) -> Result<CommittedEntry, CommitError> {
        match Self::finalize(task, &reserved) {
            Ok(()) => Ok(CommittedEntry::new(reserved.folder().to_path_buf())),
            Err(error) => Err(CommitError { error, reserved }),
        }
    }

    fn finalize<T: CacheableTask>(task: &T, reserved: &ReservedEntry) -> CacheResult<()> {
        let folder = reserved.folder();
        let temp_marker = reserved.temp_marker();
        if !temp_marker.is_file() {
            return Err(CacheError::NotReserved(folder.to_path_buf()));
        }
        if reserved.task_description() != task.task_description() {
            return Err(CacheError::ReservationMismatch(folder.to_path_buf()));
        }

        for name in task.output_file_names() {
            let output = folder.join(&name);
            info!("Caching output file: {}", output.display());
            if !output.is_file() {
                return Err(CacheError::MissingOutput(output));
            }
        }

        fs::rename(&temp_marker, folder.join(MARKER_FILE_NAME))?;
        Ok(())
    }

    /// Delete every bucket under the root.
    ///
    /// Returns the number of top-level bucket directories removed.
    pub fn wipe(&self) -> CacheResult<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if !entry.file_type()?.is_dir() || !is_bucket_name(&name.to_string_lossy()) {
                continue;
            }
            fs::remove_dir_all(entry.path())?;
            removed += 1;
        }

        info!("Cache wiped: {} buckets removed from {}", removed, self.root.display());
        Ok(removed)
    }

    /// List all committed entries.
    pub fn list_entries(&self) -> CacheResult<Vec<EntryInfo>> {
        let mut entries = Vec::new();
        for folder in self.leaf_folders()? {
            let marker = folder.join(MARKER_FILE_NAME);
            if !marker.is_file() {
                continue;
            }
            let task_description = match fs::read_to_string(&marker) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Cache cannot read task description {}: {}", marker.display(), e);
                    continue;
                }
            };
            let committed_at = fs::metadata(&marker)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from);
            entries.push(EntryInfo {
                folder,
                task_description,
                committed_at,
            });
        }
        Ok(entries)
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheResult<CacheStats> {
        let mut stats = CacheStats::default();
        for folder in self.leaf_folders()? {
            if folder.join(MARKER_FILE_NAME).is_file() {
                stats.entries += 1;
            } else {
                stats.uncommitted += 1;
            }
            for file in WalkDir::new(&folder).into_iter().filter_map(Result::ok) {
                if file.file_type().is_file() {
                    stats.total_size_bytes += file.metadata().map(|m| m.len()).unwrap_or(0);
                }
            }
        }
        Ok(stats)
    }

    /// Create the first unused numbered folder, starting past the current count.
    fn create_numbered_folder(&self, bucket: &Path) -> CacheResult<PathBuf> {
        let existing = fs::read_dir(bucket)?.count();
        let mut number = existing + 1;
        loop {
            if number > self.max_cache_folders {
                return Err(CacheError::CapacityExhausted {
                    bucket: bucket.to_path_buf(),
                    limit: self.max_cache_folders,
                });
            }
            let folder = bucket.join(number.to_string());
            match fs::create_dir(&folder) {
                Ok(()) => return Ok(folder),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => number += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Subdirectories of a bucket, numbered ones first in numeric order.
    fn numbered_folders(bucket: &Path) -> CacheResult<Vec<PathBuf>> {
        let mut folders = Vec::new();
        for entry in fs::read_dir(bucket)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                folders.push(entry.path());
            }
        }
        folders.sort_by_key(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy().into_owned());
            let number = name.as_deref().and_then(|n| n.parse::<u64>().ok());
            (number.is_none(), number, name)
        });
        Ok(folders)
    }

    /// Every `<root>/<hh>/<hh>/<N>` directory.
    fn leaf_folders(&self) -> CacheResult<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut folders = Vec::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || e.depth() == 3
                    || (e.file_type().is_dir() && is_bucket_name(&e.file_name().to_string_lossy()))
            });
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_dir() {
                folders.push(entry.into_path());
            }
        }
        Ok(folders)
    }
}

/// Delete an evicted entry. Another lookup may have removed it first.
fn evict(candidate: &Path) -> CacheResult<()> {
    match fs::remove_dir_all(candidate) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Cache entry already evicted: {}", candidate.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// True if every named file exists inside `folder`.
fn all_files_exist(folder: &Path, names: &[String]) -> bool {
    names.iter().all(|name| folder.join(name).exists())
}
