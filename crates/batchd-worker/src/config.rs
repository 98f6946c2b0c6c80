//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::MAX_CACHE_FOLDERS;

/// Caching worker configuration settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root directory of the result cache.
    pub cache_folder: PathBuf,
    /// Maximum numbered entries per bucket.
    pub max_cache_folders: usize,
    /// How long to wait for outputs to appear after a worker reports success.
    pub output_wait_timeout: Duration,
    /// Poll interval while waiting for outputs.
    pub output_poll_interval: Duration,
    /// Host reported in `on_start` for results served from the cache.
    pub host_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_folder: PathBuf::from("var/cache/batchd"),
            max_cache_folders: MAX_CACHE_FOLDERS,
            output_wait_timeout: Duration::from_secs(60),
            output_poll_interval: Duration::from_millis(100),
            host_name: local_host_name(),
        }
    }
}

impl WorkerConfig {
    /// Default settings over the given cache folder.
    pub fn with_cache_folder(cache_folder: impl Into<PathBuf>) -> Self {
        Self {
            cache_folder: cache_folder.into(),
            ..Default::default()
        }
    }
}

/// Best-effort name of this host.
pub fn local_host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
