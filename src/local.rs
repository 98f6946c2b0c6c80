//! In-process dispatcher running [`CommandTask`]s as child processes.
//!
//! Each submission gets its own thread. The command runs in its output
//! folder with `BATCHD_OUTPUT_DIR` pointing there; every stdout line is
//! reported as a status update and both streams are kept as log files next
//! to the outputs.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;

use batchd_protocol::{Priority, ProgressListener, ProgressPayload, WorkDispatcher, WorkError};
use tracing::{debug, info, warn};

use crate::task::CommandTask;

/// Environment variable holding the folder outputs must be written to.
pub const OUTPUT_DIR_ENV: &str = "BATCHD_OUTPUT_DIR";

/// Log of the command's stdout, relative to its output folder.
pub const STDOUT_LOG_FILE_NAME: &str = "_stdout.log";

/// Log of the command's stderr, relative to its output folder.
pub const STDERR_LOG_FILE_NAME: &str = "_stderr.log";

/// Runs commands on this host.
pub struct LocalDispatcher {
    host_name: String,
}

impl LocalDispatcher {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
        }
    }
}

impl WorkDispatcher<CommandTask> for LocalDispatcher {
    fn submit(
        &self,
        task: CommandTask,
        priority: Priority,
        listener: Arc<dyn ProgressListener>,
    ) -> Result<(), WorkError> {
        if !task.output_dir().is_dir() {
            return Err(WorkError::invalid_request(format!(
                "output folder {} does not exist",
                task.output_dir().display()
            )));
        }

        debug!("Submitting {} at priority {}", task.program(), priority);
        let host_name = self.host_name.clone();
        thread::Builder::new()
            .name(format!("batchd-{}", task.program()))
            .spawn(move || {
                listener.on_start(&host_name);
                match run_command(&task, listener.as_ref()) {
                    Ok(status) if status.success() => listener.on_success(),
                    Ok(status) => listener.on_failure(&WorkError::worker(format!(
                        "{} exited with status {:?}",
                        task.program(),
                        status.code()
                    ))),
                    Err(e) => listener.on_failure(&e),
                }
            })
            .map_err(|e| WorkError::io(format!("failed to start worker thread: {}", e)))?;
        Ok(())
    }
}

fn run_command(task: &CommandTask, listener: &dyn ProgressListener) -> Result<ExitStatus, WorkError> {
    let folder = task.output_dir();
    let output_log = folder.join(STDOUT_LOG_FILE_NAME);
    let error_log = folder.join(STDERR_LOG_FILE_NAME);

    listener.on_progress(&ProgressPayload::NewLogFiles {
        log_id: uuid::Uuid::new_v4().to_string(),
        parent_log_id: None,
        output_log: output_log.clone(),
        error_log: error_log.clone(),
    });

    info!("Running {} in {}", task.program(), folder.display());
    let mut child = Command::new(task.program())
        .args(task.args())
        .current_dir(folder)
        .env(OUTPUT_DIR_ENV, absolute(folder))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| WorkError::worker(format!("failed to spawn {}: {}", task.program(), e)))?;

    let stderr = child.stderr.take();
    let mut stderr_file = File::create(&error_log)?;
    let stderr_handle = thread::spawn(move || {
        if let Some(mut stderr) = stderr {
            if let Err(e) = std::io::copy(&mut stderr, &mut stderr_file) {
                warn!("Lost stderr output: {}", e);
            }
        }
    });

    let streamed = match child.stdout.take() {
        Some(stdout) => stream_stdout(stdout, &output_log, listener),
        None => Ok(()),
    };

    // Reap the child and the stderr copier even if streaming failed
    let status = child.wait();
    if stderr_handle.join().is_err() {
        warn!("Stderr copier for {} panicked", task.program());
    }
    streamed?;
    Ok(status?)
}

/// Copy stdout into the log verbatim, reporting each line as a status.
fn stream_stdout(
    stdout: impl Read,
    output_log: &Path,
    listener: &dyn ProgressListener,
) -> Result<(), WorkError> {
    let mut stdout_file = File::create(output_log)?;
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        stdout_file.write_all(&line)?;
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\n', '\r']);
        listener.on_progress(&ProgressPayload::status(text));
    }
}

fn absolute(path: &Path) -> std::path::PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
