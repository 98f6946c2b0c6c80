//! Copying cached results to the location a caller asked for.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use batchd_protocol::{ErrorKind, ProgressListener, ProgressPayload, WorkError};
use tracing::{debug, warn};

/// Copy `cache_names` from `folder` into `target`, renaming each file to
/// the caller's name at the same position.
pub fn publish_result_files(
    folder: &Path,
    cache_names: &[String],
    target: &Path,
    published_names: &[String],
) -> Result<(), WorkError> {
    if cache_names.len() != published_names.len() {
        return Err(WorkError::new(
            ErrorKind::ContractViolation,
            format!(
                "cannot pair {} cached files with {} published names",
                cache_names.len(),
                published_names.len()
            ),
        ));
    }

    fs::create_dir_all(target)?;
    for (cached, published) in cache_names.iter().zip(published_names) {
        let from = folder.join(cached);
        let to = target.join(published);
        debug!("Publishing {} -> {}", from.display(), to.display());
        fs::copy(&from, &to).map_err(|e| {
            WorkError::io(format!("failed to copy {} to {}: {}", from.display(), to.display(), e))
        })?;
    }
    Ok(())
}

/// Listener wrapper that publishes results before forwarding success.
///
/// The cache folder is learned from the `CachedResult` progress event the
/// engine emits right after a hit or a fresh commit.
pub struct PublishingListener {
    inner: Arc<dyn ProgressListener>,
    target: PathBuf,
    published_names: Vec<String>,
    cached: Mutex<Option<(PathBuf, Vec<String>)>>,
}

impl PublishingListener {
    /// Wrap `inner`, publishing into `target` under `published_names`.
    pub fn new(inner: Arc<dyn ProgressListener>, target: PathBuf, published_names: Vec<String>) -> Self {
        Self {
            inner,
            target,
            published_names,
            cached: Mutex::new(None),
        }
    }
}

impl ProgressListener for PublishingListener {
    fn on_start(&self, host: &str) {
        self.inner.on_start(host);
    }

    fn on_progress(&self, payload: &ProgressPayload) {
        if let ProgressPayload::CachedResult { folder, files } = payload {
            let mut cached = self.cached.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            *cached = Some((folder.clone(), files.clone()));
        }
        self.inner.on_progress(payload);
    }

    fn on_success(&self) {
        let cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let result = match cached {
            Some((folder, files)) => {
                publish_result_files(&folder, &files, &self.target, &self.published_names)
            }
            None => Err(WorkError::new(
                ErrorKind::ContractViolation,
                "success reported without a cached result to publish",
            )),
        };
        match result {
            Ok(()) => self.inner.on_success(),
            Err(error) => {
                warn!("Publishing to {} failed: {}", self.target.display(), error);
                self.inner.on_failure(&error);
            }
        }
    }

    fn on_failure(&self, error: &WorkError) {
        self.inner.on_failure(error);
    }
}
