//! Waiting for output files to become visible.
//!
//! A worker's success notification can overtake the filesystem: the files
//! it wrote may not be visible yet on this host (network mounts in
//! particular). The caching worker polls for them with a deadline.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use batchd_protocol::WorkError;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from waiting on files
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timeout after {waited:?} waiting for files: {missing:?}")]
    Timeout {
        waited: Duration,
        missing: Vec<PathBuf>,
    },
}

impl From<WaitError> for WorkError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout { waited, missing } => {
                let missing: Vec<&Path> = missing.iter().map(PathBuf::as_path).collect();
                WorkError::timeout(waited, &missing)
            }
        }
    }
}

/// Block until every path exists, polling every `poll_interval`.
///
/// Returns [`WaitError::Timeout`] listing the paths still missing once
/// `timeout` has elapsed.
pub fn wait_for_files(
    paths: &[PathBuf],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), WaitError> {
    let start = Instant::now();
    let mut warned = false;

    loop {
        let missing: Vec<PathBuf> = paths.iter().filter(|p| !p.exists()).cloned().collect();
        if missing.is_empty() {
            if warned {
                debug!(
                    "Files appeared after {:.1}s",
                    start.elapsed().as_secs_f64()
                );
            }
            return Ok(());
        }

        if start.elapsed() >= timeout {
            return Err(WaitError::Timeout {
                waited: timeout,
                missing,
            });
        }

        if !warned && start.elapsed() > Duration::from_millis(500) {
            warn!("Waiting for {} output files to appear, e.g. {}", missing.len(), missing[0].display());
            warned = true;
        }

        std::thread::sleep(poll_interval);
    }
}
