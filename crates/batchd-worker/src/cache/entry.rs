//! Typed handles for the two phases of a cache entry's life.
//!
//! A [`ReservedEntry`] is a numbered folder holding only the temporary
//! marker; lookups cannot see it. [`CacheStore::commit`] consumes it and
//! hands back a [`CommittedEntry`], whose final marker makes it visible.
//!
//! [`CacheStore::commit`]: super::CacheStore::commit

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Marker holding the task description of a committed entry.
pub const MARKER_FILE_NAME: &str = "_task_description";

/// Marker written at reservation time, renamed to [`MARKER_FILE_NAME`] on commit.
pub const TEMP_MARKER_FILE_NAME: &str = "_task_description~";

/// A work folder reserved for a computation that has not been committed yet.
#[derive(Debug)]
#[must_use = "a reserved entry must be committed or discarded"]
pub struct ReservedEntry {
    folder: PathBuf,
    task_description: String,
}

impl ReservedEntry {
    pub(crate) fn new(folder: PathBuf, task_description: String) -> Self {
        Self {
            folder,
            task_description,
        }
    }

    /// Folder the computation should write its outputs into.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Description the folder was reserved for.
    pub fn task_description(&self) -> &str {
        &self.task_description
    }

    /// Delete the folder and everything written into it so far.
    pub fn discard(self) -> io::Result<()> {
        match fs::remove_dir_all(&self.folder) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub(crate) fn temp_marker(&self) -> PathBuf {
        self.folder.join(TEMP_MARKER_FILE_NAME)
    }
}

/// A committed, lookup-visible cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedEntry {
    folder: PathBuf,
}

impl CommittedEntry {
    pub(crate) fn new(folder: PathBuf) -> Self {
        Self { folder }
    }

    /// Folder holding the cached outputs.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Path of a cached output file.
    pub fn file(&self, name: &str) -> PathBuf {
        self.folder.join(name)
    }

    /// Consume the handle, returning the folder.
    pub fn into_path(self) -> PathBuf {
        self.folder
    }
}

/// Listing record for a committed entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    /// Entry folder.
    pub folder: PathBuf,
    /// Content of the marker file.
    pub task_description: String,
    /// When the marker was renamed into place, if the filesystem records it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,
}
