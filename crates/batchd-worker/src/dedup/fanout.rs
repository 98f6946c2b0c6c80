//! Fan-out of one computation's events to many listeners.

use std::sync::{Arc, Mutex, MutexGuard};

use batchd_protocol::{ProgressListener, ProgressPayload, WorkError};
use tracing::warn;

#[derive(Debug, Clone)]
enum Outcome {
    Success,
    Failure(WorkError),
}

#[derive(Default)]
struct FanOutState {
    started_on: Option<String>,
    last_progress: Option<ProgressPayload>,
    cached_result: Option<ProgressPayload>,
    outcome: Option<Outcome>,
    listeners: Vec<Arc<dyn ProgressListener>>,
}

/// A single reporter broadcasting to every subscribed listener.
///
/// Newcomers are caught up at subscription time with the last start, the
/// cached-result location, the last progress and the terminal event, each
/// only if it has been observed. Everything happens under
/// one mutex, so each listener sees exactly one terminal event and all
/// listeners see events in the same order.
pub struct FanOut {
    state: Mutex<FanOutState>,
}

impl FanOut {
    /// Fan-out whose first listener is the requester that launched the work.
    pub fn with_owner(owner: Arc<dyn ProgressListener>) -> Self {
        Self {
            state: Mutex::new(FanOutState {
                listeners: vec![owner],
                ..FanOutState::default()
            }),
        }
    }

    /// Add a listener, replaying what has been observed so far.
    pub fn subscribe(&self, listener: Arc<dyn ProgressListener>) {
        let mut state = self.lock();
        if let Some(host) = &state.started_on {
            listener.on_start(host);
        }
        if let Some(payload) = &state.cached_result {
            if state.last_progress.as_ref() != Some(payload) {
                listener.on_progress(payload);
            }
        }
        if let Some(payload) = &state.last_progress {
            listener.on_progress(payload);
        }
        match &state.outcome {
            Some(Outcome::Success) => listener.on_success(),
            Some(Outcome::Failure(error)) => listener.on_failure(error),
            None => {}
        }
        state.listeners.push(listener);
    }

    /// Number of listeners, including the owner.
    pub fn subscriber_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Whether a terminal event has been broadcast.
    pub fn is_finished(&self) -> bool {
        self.lock().outcome.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, FanOutState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(&self, outcome: Outcome) {
        let mut state = self.lock();
        if let Some(previous) = &state.outcome {
            warn!(
                "Ignoring second terminal event {:?}; already finished with {:?}",
                outcome, previous
            );
            return;
        }
        for listener in &state.listeners {
            match &outcome {
                Outcome::Success => listener.on_success(),
                Outcome::Failure(error) => listener.on_failure(error),
            }
        }
        state.outcome = Some(outcome);
    }
}

impl ProgressListener for FanOut {
    fn on_start(&self, host: &str) {
        let mut state = self.lock();
        state.started_on = Some(host.to_string());
        for listener in &state.listeners {
            listener.on_start(host);
        }
    }

    fn on_progress(&self, payload: &ProgressPayload) {
        let mut state = self.lock();
        if payload.is_log_ownership() {
            // Log files belong to the original requester only
            if let Some(owner) = state.listeners.first() {
                owner.on_progress(payload);
            }
            return;
        }
        if matches!(payload, ProgressPayload::CachedResult { .. }) {
            state.cached_result = Some(payload.clone());
        }
        state.last_progress = Some(payload.clone());
        for listener in &state.listeners {
            listener.on_progress(payload);
        }
    }

    fn on_success(&self) {
        self.finish(Outcome::Success);
    }

    fn on_failure(&self, error: &WorkError) {
        self.finish(Outcome::Failure(error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchd_protocol::{ProgressEvent, RecordingListener};
    use std::path::PathBuf;

    fn started() -> ProgressEvent {
        ProgressEvent::Started {
            host: "node-3".to_string(),
        }
    }

    fn progress(message: &str) -> ProgressEvent {
        ProgressEvent::Progress {
            payload: ProgressPayload::status(message),
        }
    }

    fn log_files() -> ProgressPayload {
        ProgressPayload::NewLogFiles {
            log_id: "log-1".to_string(),
            parent_log_id: None,
            output_log: PathBuf::from("/logs/out.log"),
            error_log: PathBuf::from("/logs/err.log"),
        }
    }

    #[test]
    fn test_broadcast_to_all_listeners() {
        let owner = Arc::new(RecordingListener::new());
        let joiner = Arc::new(RecordingListener::new());
        let fanout = FanOut::with_owner(owner.clone());
        fanout.subscribe(joiner.clone());

        fanout.on_start("node-3");
        fanout.on_progress(&ProgressPayload::status("10%"));
        fanout.on_success();

        let expected = vec![started(), progress("10%"), ProgressEvent::Succeeded];
        assert_eq!(owner.events(), expected);
        assert_eq!(joiner.events(), expected);
    }

    #[test]
    fn test_late_subscriber_is_caught_up() {
        let owner = Arc::new(RecordingListener::new());
        let fanout = FanOut::with_owner(owner.clone());
        fanout.on_start("node-3");
        fanout.on_progress(&ProgressPayload::status("10%"));
        fanout.on_progress(&ProgressPayload::status("20%"));

        let late = Arc::new(RecordingListener::new());
        fanout.subscribe(late.clone());
        fanout.on_progress(&ProgressPayload::status("30%"));
        fanout.on_success();

        assert_eq!(
            late.events(),
            vec![
                started(),
                progress("20%"),
                progress("30%"),
                ProgressEvent::Succeeded
            ]
        );
        assert_eq!(late.terminal_count(), 1);
    }

    #[test]
    fn test_subscriber_after_terminal_gets_everything_back_to_back() {
        let fanout = FanOut::with_owner(Arc::new(RecordingListener::new()));
        fanout.on_start("node-3");
        fanout.on_progress(&ProgressPayload::status("90%"));
        fanout.on_failure(&WorkError::worker("engine crashed"));

        let late = Arc::new(RecordingListener::new());
        fanout.subscribe(late.clone());

        assert_eq!(
            late.events(),
            vec![
                started(),
                progress("90%"),
                ProgressEvent::Failed {
                    error: WorkError::worker("engine crashed")
                }
            ]
        );
    }

    #[test]
    fn test_log_files_only_reach_owner() {
        let owner = Arc::new(RecordingListener::new());
        let joiner = Arc::new(RecordingListener::new());
        let fanout = FanOut::with_owner(owner.clone());
        fanout.subscribe(joiner.clone());

        fanout.on_progress(&ProgressPayload::status("queued"));
        fanout.on_progress(&log_files());

        assert_eq!(owner.payloads(), vec![ProgressPayload::status("queued"), log_files()]);
        assert_eq!(joiner.payloads(), vec![ProgressPayload::status("queued")]);

        // Nor is it replayed to someone joining later
        let late = Arc::new(RecordingListener::new());
        fanout.subscribe(late.clone());
        assert_eq!(late.payloads(), vec![ProgressPayload::status("queued")]);
    }

    #[test]
    fn test_second_terminal_is_ignored() {
        let owner = Arc::new(RecordingListener::new());
        let fanout = FanOut::with_owner(owner.clone());

        fanout.on_success();
        fanout.on_failure(&WorkError::worker("late failure"));
        fanout.on_success();

        assert_eq!(owner.events(), vec![ProgressEvent::Succeeded]);
        assert!(fanout.is_finished());
    }

    #[test]
    fn test_cached_result_survives_later_progress() {
        let fanout = FanOut::with_owner(Arc::new(RecordingListener::new()));
        let cached = ProgressPayload::CachedResult {
            folder: PathBuf::from("/cache/05/e9/1"),
            files: vec!["out.txt".to_string()],
        };
        fanout.on_progress(&cached);
        fanout.on_progress(&ProgressPayload::status("cache:r1"));

        let late = Arc::new(RecordingListener::new());
        fanout.subscribe(late.clone());
        fanout.on_success();

        assert_eq!(
            late.payloads(),
            vec![cached, ProgressPayload::status("cache:r1")]
        );
    }

    #[test]
    fn test_progress_does_not_replace_start() {
        let fanout = FanOut::with_owner(Arc::new(RecordingListener::new()));
        fanout.on_start("node-3");
        fanout.on_progress(&ProgressPayload::Percent { value: 0.5 });

        let late = Arc::new(RecordingListener::new());
        fanout.subscribe(late.clone());
        assert_eq!(late.events()[0], started());
        assert_eq!(fanout.subscriber_count(), 2);
    }
}
