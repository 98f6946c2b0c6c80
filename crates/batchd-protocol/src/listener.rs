//! Progress listener contract.
//!
//! A listener receives, in order: zero or one `on_start`, zero or more
//! `on_progress`, then exactly one of `on_success` / `on_failure`.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::WorkError;
use crate::progress::{ProgressEvent, ProgressPayload};

/// Receives the event stream of one unit of work.
///
/// Callbacks may arrive on any thread.
pub trait ProgressListener: Send + Sync {
    /// Processing started on `host`.
    fn on_start(&self, host: &str);

    /// Intermediate progress.
    fn on_progress(&self, payload: &ProgressPayload);

    /// The work finished successfully.
    fn on_success(&self);

    /// The work failed.
    fn on_failure(&self, error: &WorkError);
}

/// Listener that records every event and lets a thread block until the
/// terminal one arrives.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ProgressEvent>>,
    terminal: Condvar,
}

impl RecordingListener {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.lock().clone()
    }

    /// The terminal event, if one has arrived.
    pub fn terminal(&self) -> Option<ProgressEvent> {
        self.lock().iter().find(|e| e.is_terminal()).cloned()
    }

    /// Number of terminal events observed (more than one is a contract breach).
    pub fn terminal_count(&self) -> usize {
        self.lock().iter().filter(|e| e.is_terminal()).count()
    }

    /// Payloads of all progress events, in arrival order.
    pub fn payloads(&self) -> Vec<ProgressPayload> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { payload } => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Block until a terminal event arrives or `timeout` elapses.
    pub fn wait_for_terminal(&self, timeout: Duration) -> Option<ProgressEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.lock();
        loop {
            if let Some(event) = events.iter().find(|e| e.is_terminal()) {
                return Some(event.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            events = match self.terminal.wait_timeout(events, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProgressEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, event: ProgressEvent) {
        let terminal = event.is_terminal();
        self.lock().push(event);
        if terminal {
            self.terminal.notify_all();
        }
    }
}

impl ProgressListener for RecordingListener {
    fn on_start(&self, host: &str) {
        self.push(ProgressEvent::Started {
            host: host.to_string(),
        });
    }

    fn on_progress(&self, payload: &ProgressPayload) {
        self.push(ProgressEvent::Progress {
            payload: payload.clone(),
        });
    }

    fn on_success(&self) {
        self.push(ProgressEvent::Succeeded);
    }

    fn on_failure(&self, error: &WorkError) {
        self.push(ProgressEvent::Failed {
            error: error.clone(),
        });
    }
}
