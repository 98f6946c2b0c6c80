//! Caching worker
//!
//! Entry point tying the cache store and the deduplication registry to a
//! work dispatcher:
//!
//! 1. Serve a request from the cache if a usable entry exists.
//! 2. Otherwise join an identical in-flight computation if there is one.
//! 3. Otherwise reserve a work folder, dispatch the task into it and,
//!    once it succeeds, commit the folder and notify every subscriber.
//!
//! A cache hit and a joined computation look exactly like a fresh one to
//! the caller, apart from latency.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use batchd_protocol::{
    CacheableTask, Priority, ProgressListener, ProgressPayload, WorkDispatcher, WorkError,
    WorkRequest,
};
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, CacheStore, CommittedEntry, ReservedEntry};
use crate::config::WorkerConfig;
use crate::dedup::{FanOut, InFlightTask, Registration, TaskRegistry};
use crate::publish::PublishingListener;
use crate::wait::wait_for_files;

/// Caching front end for a dispatcher of `T` packets.
pub struct CachingWorker<T: CacheableTask> {
    store: CacheStore,
    registry: Arc<TaskRegistry>,
    dispatcher: Arc<dyn WorkDispatcher<T>>,
    config: WorkerConfig,
}

impl<T: CacheableTask> CachingWorker<T> {
    /// Create a worker with its own registry.
    pub fn new(config: WorkerConfig, dispatcher: Arc<dyn WorkDispatcher<T>>) -> Self {
        Self::with_registry(config, dispatcher, Arc::new(TaskRegistry::new()))
    }

    /// Create a worker sharing an existing registry.
    pub fn with_registry(
        config: WorkerConfig,
        dispatcher: Arc<dyn WorkDispatcher<T>>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        let store =
            CacheStore::new(&config.cache_folder).with_max_cache_folders(config.max_cache_folders);
        Self {
            store,
            registry,
            dispatcher,
            config,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// The in-flight registry.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Startup check: the cache folder must be a writable directory.
    pub fn check(&self) -> CacheResult<()> {
        self.store.check()
    }

    /// Handle one request. All outcomes arrive through `listener`.
    pub fn handle(&self, request: WorkRequest<T>, listener: Arc<dyn ProgressListener>) {
        match request {
            WorkRequest::WipeCache => match self.store.wipe() {
                Ok(_) => listener.on_success(),
                Err(e) => listener.on_failure(&e.into()),
            },
            WorkRequest::Task { task, priority } => {
                if let Err(error) = self.process(task, priority, Arc::clone(&listener)) {
                    listener.on_failure(&error);
                }
            }
        }
    }

    /// Errors returned here happened before the listener was handed to
    /// anyone else; later failures travel through the fan-out.
    fn process(
        &self,
        task: T,
        priority: Priority,
        listener: Arc<dyn ProgressListener>,
    ) -> Result<(), WorkError> {
        let listener = match task.publish_target() {
            Some(target) => Arc::new(PublishingListener::new(
                listener,
                target,
                task.published_file_names(),
            )) as Arc<dyn ProgressListener>,
            None => listener,
        };

        // Outputs evaluated against the cache rather than the caller's
        // target, so requests differing only in output location share entries.
        let lookup_task = task.rebased_to(self.store.root());

        if let Some(entry) = self.store.lookup(&lookup_task)? {
            info!("Using cached values from: {}", entry.folder().display());
            listener.on_start(&self.config.host_name);
            report_cached(&task, &lookup_task, &entry, listener.as_ref());
            listener.on_success();
            return Ok(());
        }

        match self
            .registry
            .join_or_start(lookup_task.task_description(), listener)
        {
            Registration::Joined => Ok(()),
            Registration::Launch(in_flight) => {
                self.launch(task, lookup_task, priority, in_flight);
                Ok(())
            }
        }
    }

    fn launch(&self, task: T, lookup_task: T, priority: Priority, in_flight: InFlightTask) {
        // Someone may have committed this between our lookup and registration
        if !lookup_task.is_from_scratch() {
            match self.store.lookup(&lookup_task) {
                Ok(Some(entry)) => {
                    debug!("Entry committed while registering: {}", entry.folder().display());
                    in_flight.reporter().on_start(&self.config.host_name);
                    report_cached(&task, &lookup_task, &entry, in_flight.reporter().as_ref());
                    in_flight.succeed();
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    in_flight.fail(&e.into());
                    return;
                }
            }
        }

        let reserved = match self.store.reserve_work_folder(&lookup_task) {
            Ok(reserved) => reserved,
            Err(e) => {
                in_flight.fail(&e.into());
                return;
            }
        };

        let dispatch_task = task.rebased_to(reserved.folder());
        let completion = Arc::new(Completion {
            work_folder: reserved.folder().to_path_buf(),
            reporter: Arc::clone(in_flight.reporter()),
            task,
            lookup_task,
            store: self.store.clone(),
            config: self.config.clone(),
            pending: Mutex::new(Some(Pending {
                reserved,
                in_flight,
            })),
        });

        info!(
            "Dispatching work into {} at priority {}",
            completion.work_folder.display(),
            priority
        );
        if let Err(error) =
            self.dispatcher
                .submit(dispatch_task, priority, Arc::clone(&completion) as Arc<dyn ProgressListener>)
        {
            completion.on_failure(&error);
        }
    }
}

/// Report the location of cached results, then any task-specific metadata.
fn report_cached<T: CacheableTask>(
    task: &T,
    lookup_task: &T,
    entry: &CommittedEntry,
    listener: &dyn ProgressListener,
) {
    let files = lookup_task.output_file_names();
    listener.on_progress(&ProgressPayload::CachedResult {
        folder: entry.folder().to_path_buf(),
        files: files.clone(),
    });
    task.report_cached_result(listener, entry.folder(), &files);
}

struct Pending {
    reserved: ReservedEntry,
    in_flight: InFlightTask,
}

/// Listener handed to the dispatcher for a launched computation.
struct Completion<T: CacheableTask> {
    work_folder: PathBuf,
    reporter: Arc<FanOut>,
    task: T,
    lookup_task: T,
    store: CacheStore,
    config: WorkerConfig,
    pending: Mutex<Option<Pending>>,
}

impl<T: CacheableTask> Completion<T> {
    fn take_pending(&self) -> Option<Pending> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if pending.is_none() {
            warn!(
                "Duplicate terminal event for work folder {}",
                self.work_folder.display()
            );
        }
        pending
    }

    fn is_pending(&self) -> bool {
        self.lock_pending().is_some()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for outputs, then commit. The reservation is discarded on error.
    fn commit(&self, reserved: ReservedEntry) -> Result<CommittedEntry, WorkError> {
        let expected: Vec<PathBuf> = self
            .lookup_task
            .output_file_names()
            .iter()
            .map(|name| reserved.folder().join(name))
            .collect();

        if let Err(e) = wait_for_files(
            &expected,
            self.config.output_wait_timeout,
            self.config.output_poll_interval,
        ) {
            discard(reserved);
            return Err(e.into());
        }

        self.store.commit(&self.lookup_task, reserved).map_err(|e| {
            let error = WorkError::from(e.error);
            discard(e.reserved);
            error
        })
    }
}

impl<T: CacheableTask> ProgressListener for Completion<T> {
    fn on_start(&self, host: &str) {
        if self.is_pending() {
            self.reporter.on_start(host);
        }
    }

    fn on_progress(&self, payload: &ProgressPayload) {
        if !self.is_pending() {
            return;
        }
        if let Err(e) = self.task.capture_progress(&self.work_folder, payload) {
            warn!(
                "Could not record progress in {}: {}",
                self.work_folder.display(),
                e
            );
        }
        self.reporter.on_progress(payload);
    }

    fn on_success(&self) {
        let Some(Pending {
            reserved,
            in_flight,
        }) = self.take_pending()
        else {
            return;
        };

        match self.commit(reserved) {
            Ok(entry) => {
                report_cached(&self.task, &self.lookup_task, &entry, self.reporter.as_ref());
                in_flight.succeed();
            }
            Err(error) => {
                warn!("Caching {} failed: {}", in_flight.task_description(), error);
                in_flight.fail(&error);
            }
        }
    }

    fn on_failure(&self, error: &WorkError) {
        let Some(Pending {
            reserved,
            in_flight,
        }) = self.take_pending()
        else {
            return;
        };
        discard(reserved);
        in_flight.fail(error);
    }
}

fn discard(reserved: ReservedEntry) {
    let folder = reserved.folder().to_path_buf();
    if let Err(e) = reserved.discard() {
        warn!("Could not delete work folder {}: {}", folder.display(), e);
    }
}
