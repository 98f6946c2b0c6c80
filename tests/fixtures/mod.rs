//! Shared fixtures for the caching worker integration tests.
//!
//! - `Packet`: a cacheable task producing `file1.txt` and `file2.txt`, whose
//!   cache report echoes its request id
//! - `ScriptedDispatcher`: records submissions and lets a test drive each
//!   one through start / progress / success / failure by index

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use batchd_protocol::{
    CacheableTask, Priority, ProgressEvent, ProgressListener, ProgressPayload, WorkDispatcher,
    WorkError,
};
use batchd_worker::{CachingWorker, WorkerConfig};
use tempfile::TempDir;

pub const HOST: &str = "localhost";

/// Test work packet. Equal names are the same computation.
#[derive(Debug, Clone)]
pub struct Packet {
    pub name: String,
    pub request: String,
    pub folder: Option<PathBuf>,
    pub publish_to: Option<PathBuf>,
    pub from_scratch: bool,
    pub stale: Arc<AtomicBool>,
}

impl Packet {
    pub fn new(name: &str, request: &str, stale: &Arc<AtomicBool>) -> Self {
        Self {
            name: name.to_string(),
            request: request.to_string(),
            folder: None,
            publish_to: None,
            from_scratch: false,
            stale: Arc::clone(stale),
        }
    }
}

impl CacheableTask for Packet {
    fn task_description(&self) -> &str {
        &self.name
    }

    fn output_file_names(&self) -> Vec<String> {
        vec!["file1.txt".to_string(), "file2.txt".to_string()]
    }

    fn is_from_scratch(&self) -> bool {
        self.from_scratch
    }

    fn is_stale(&self, _candidate: &Path, _output_file_names: &[String]) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    fn rebased_to(&self, folder: &Path) -> Self {
        Self {
            folder: Some(folder.to_path_buf()),
            ..self.clone()
        }
    }

    fn publish_target(&self) -> Option<PathBuf> {
        self.publish_to.clone()
    }

    fn report_cached_result(
        &self,
        listener: &dyn ProgressListener,
        _folder: &Path,
        _output_file_names: &[String],
    ) {
        listener.on_progress(&ProgressPayload::status(format!("cache:{}", self.request)));
    }
}

type Submission = (Packet, Priority, Arc<dyn ProgressListener>);

/// Dispatcher that only records; tests play the remote worker's part.
pub struct ScriptedDispatcher {
    submitted: Mutex<Vec<Submission>>,
    running: AtomicBool,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn packet(&self, index: usize) -> Packet {
        self.submitted.lock().unwrap()[index].0.clone()
    }

    pub fn priority(&self, index: usize) -> Priority {
        self.submitted.lock().unwrap()[index].1
    }

    fn listener(&self, index: usize) -> Arc<dyn ProgressListener> {
        Arc::clone(&self.submitted.lock().unwrap()[index].2)
    }

    pub fn start(&self, index: usize) {
        self.listener(index).on_start(HOST);
    }

    /// Report the packet's request id as a status line.
    pub fn progress(&self, index: usize) {
        let request = self.packet(index).request;
        self.listener(index).on_progress(&ProgressPayload::status(request));
    }

    /// Write both outputs, then report success.
    pub fn success(&self, index: usize) {
        let folder = self.packet(index).folder.expect("dispatched packets are rebased");
        fs::write(folder.join("file1.txt"), format!("one:{}", index)).unwrap();
        fs::write(folder.join("file2.txt"), format!("two:{}", index)).unwrap();
        self.listener(index).on_success();
    }

    /// Report success without writing anything.
    pub fn success_without_outputs(&self, index: usize) {
        self.listener(index).on_success();
    }

    pub fn failure(&self, index: usize) {
        self.listener(index).on_failure(&WorkError::worker("Task failed"));
    }
}

impl WorkDispatcher<Packet> for ScriptedDispatcher {
    fn submit(
        &self,
        task: Packet,
        priority: Priority,
        listener: Arc<dyn ProgressListener>,
    ) -> Result<(), WorkError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(WorkError::invalid_request("The service is not running"));
        }
        self.submitted.lock().unwrap().push((task, priority, listener));
        Ok(())
    }
}

/// Worker over a fresh cache folder inside `temp_dir`.
pub fn make_worker(temp_dir: &TempDir, dispatcher: &Arc<ScriptedDispatcher>) -> CachingWorker<Packet> {
    let mut config = WorkerConfig::with_cache_folder(temp_dir.path().join("cache"));
    config.host_name = HOST.to_string();
    config.output_wait_timeout = Duration::from_millis(200);
    config.output_poll_interval = Duration::from_millis(10);
    let worker = CachingWorker::new(
        config,
        Arc::clone(dispatcher) as Arc<dyn WorkDispatcher<Packet>>,
    );
    worker.store().install().unwrap();
    worker
}

/// Status lines in arrival order.
pub fn statuses(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Progress { payload } => payload.status_message().map(str::to_string),
            _ => None,
        })
        .collect()
}

pub fn count_starts(events: &[ProgressEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Started { .. }))
        .count()
}

pub fn count_successes(events: &[ProgressEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Succeeded))
        .count()
}

pub fn count_failures(events: &[ProgressEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Failed { .. }))
        .count()
}
