//! Event stream output for the CLI.

use std::io::{self, Write};
use std::time::Duration;

use batchd_protocol::{
    ProgressEvent, ProgressListener, ProgressPayload, RecordingListener, WorkError,
};
use tracing::warn;

/// Prints every event as one JSON line on stdout.
#[derive(Default)]
pub struct EventPrinter {
    recorder: RecordingListener,
}

impl EventPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the terminal event has been printed.
    pub fn wait(&self) -> ProgressEvent {
        loop {
            if let Some(event) = self.recorder.wait_for_terminal(Duration::from_secs(3600)) {
                return event;
            }
        }
    }

    fn print(&self, event: &ProgressEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not encode event: {}", e);
                return;
            }
        };
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", line) {
            warn!("Could not write event: {}", e);
        }
    }
}

impl ProgressListener for EventPrinter {
    fn on_start(&self, host: &str) {
        self.print(&ProgressEvent::Started {
            host: host.to_string(),
        });
        self.recorder.on_start(host);
    }

    fn on_progress(&self, payload: &ProgressPayload) {
        self.print(&ProgressEvent::Progress {
            payload: payload.clone(),
        });
        self.recorder.on_progress(payload);
    }

    fn on_success(&self) {
        self.print(&ProgressEvent::Succeeded);
        self.recorder.on_success();
    }

    fn on_failure(&self, error: &WorkError) {
        self.print(&ProgressEvent::Failed {
            error: error.clone(),
        });
        self.recorder.on_failure(error);
    }
}
