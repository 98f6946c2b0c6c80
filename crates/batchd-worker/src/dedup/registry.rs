//! Registry of in-flight computations keyed by task description.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use batchd_protocol::{ProgressListener, WorkError};
use tracing::debug;

use super::fanout::FanOut;

/// Outcome of [`TaskRegistry::join_or_start`].
pub enum Registration {
    /// Someone else is computing this task; the listener now rides along.
    Joined,
    /// The caller must launch the computation.
    Launch(InFlightTask),
}

/// Tracks which task descriptions are being computed right now.
///
/// At most one computation per description is in flight; later requests
/// subscribe to its fan-out instead of launching their own.
#[derive(Default)]
pub struct TaskRegistry {
    in_flight: Mutex<HashMap<String, Arc<FanOut>>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight computation for `task_description`, or register a
    /// new one with `listener` as its owner.
    ///
    /// The check and the insert happen in one critical section, so two
    /// callers can never both be told to launch.
    pub fn join_or_start(
        self: &Arc<Self>,
        task_description: &str,
        listener: Arc<dyn ProgressListener>,
    ) -> Registration {
        let existing = {
            let mut in_flight = self.lock();
            match in_flight.get(task_description) {
                Some(fanout) => Arc::clone(fanout),
                None => {
                    let fanout = Arc::new(FanOut::with_owner(listener));
                    in_flight.insert(task_description.to_string(), Arc::clone(&fanout));
                    debug!("Registered in-flight task: {}", task_description);
                    return Registration::Launch(InFlightTask {
                        task_description: task_description.to_string(),
                        fanout,
                        registry: Arc::clone(self),
                    });
                }
            }
        };

        // Subscribing outside the registry lock is safe: the fan-out replays
        // a terminal event that lands before the subscription.
        debug!("Joining in-flight task: {}", task_description);
        existing.subscribe(listener);
        Registration::Joined
    }

    /// Descriptions currently being computed.
    pub fn in_flight(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Whether any computation is in flight.
    pub fn is_work_in_progress(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Remove the entry only if it still belongs to `fanout`.
    fn retire(&self, task_description: &str, fanout: &Arc<FanOut>) -> bool {
        let mut in_flight = self.lock();
        match in_flight.get(task_description) {
            Some(current) if Arc::ptr_eq(current, fanout) => {
                in_flight.remove(task_description);
                debug!("Retired in-flight task: {}", task_description);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<FanOut>>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Launcher's handle on a registered computation.
///
/// Consuming it with [`succeed`](Self::succeed) or [`fail`](Self::fail)
/// removes the registry entry, then broadcasts the terminal event.
pub struct InFlightTask {
    task_description: String,
    fanout: Arc<FanOut>,
    registry: Arc<TaskRegistry>,
}

impl InFlightTask {
    /// Description this computation was registered under.
    pub fn task_description(&self) -> &str {
        &self.task_description
    }

    /// The fan-out; forward start and progress events here.
    pub fn reporter(&self) -> &Arc<FanOut> {
        &self.fanout
    }

    /// Retire the entry and broadcast success.
    pub fn succeed(self) {
        self.registry.retire(&self.task_description, &self.fanout);
        self.fanout.on_success();
    }

    /// Retire the entry and broadcast failure.
    pub fn fail(self, error: &WorkError) {
        self.registry.retire(&self.task_description, &self.fanout);
        self.fanout.on_failure(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchd_protocol::{ProgressEvent, RecordingListener};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_first_caller_launches_second_joins() {
        let registry = Arc::new(TaskRegistry::new());
        let first = Arc::new(RecordingListener::new());
        let second = Arc::new(RecordingListener::new());

        let launch = match registry.join_or_start("search A", first.clone()) {
            Registration::Launch(task) => task,
            Registration::Joined => panic!("first caller must launch"),
        };
        assert!(matches!(
            registry.join_or_start("search A", second.clone()),
            Registration::Joined
        ));
        assert_eq!(launch.reporter().subscriber_count(), 2);
        assert_eq!(registry.in_flight(), vec!["search A".to_string()]);

        launch.reporter().on_start("node-1");
        launch.succeed();

        assert!(!registry.is_work_in_progress());
        assert_eq!(first.terminal(), Some(ProgressEvent::Succeeded));
        assert_eq!(second.terminal(), Some(ProgressEvent::Succeeded));
    }

    #[test]
    fn test_new_epoch_after_retire() {
        let registry = Arc::new(TaskRegistry::new());
        let first = Arc::new(RecordingListener::new());

        match registry.join_or_start("convert", first.clone()) {
            Registration::Launch(task) => task.fail(&WorkError::worker("bad input")),
            Registration::Joined => panic!("first caller must launch"),
        }
        assert!(matches!(first.terminal(), Some(ProgressEvent::Failed { .. })));

        let again = Arc::new(RecordingListener::new());
        assert!(matches!(
            registry.join_or_start("convert", again.clone()),
            Registration::Launch(_)
        ));
        assert!(again.events().is_empty(), "fresh epoch must not replay old outcome");
    }

    #[test]
    fn test_retire_ignores_replaced_entry() {
        let registry = Arc::new(TaskRegistry::new());
        let stale = Arc::new(FanOut::with_owner(Arc::new(RecordingListener::new())));
        let current = match registry.join_or_start("key", Arc::new(RecordingListener::new())) {
            Registration::Launch(task) => task,
            Registration::Joined => panic!("first caller must launch"),
        };

        assert!(!registry.retire("key", &stale));
        assert!(registry.is_work_in_progress());
        current.succeed();
        assert!(!registry.is_work_in_progress());
    }

    #[test]
    fn test_concurrent_callers_single_launcher() {
        let registry = Arc::new(TaskRegistry::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let listener = Arc::new(RecordingListener::new());
                    barrier.wait();
                    let registration = registry.join_or_start("same task", listener.clone());
                    (registration, listener)
                })
            })
            .collect();

        let mut launchers = Vec::new();
        let mut listeners = Vec::new();
        for handle in handles {
            let (registration, listener) = handle.join().expect("Thread panicked");
            if let Registration::Launch(task) = registration {
                launchers.push(task);
            }
            listeners.push(listener);
        }

        assert_eq!(launchers.len(), 1, "exactly one caller launches");
        launchers.pop().unwrap().succeed();
        for listener in listeners {
            assert_eq!(listener.terminal_count(), 1);
        }
    }
}
