//! External commands as cacheable tasks.
//!
//! A [`CommandTask`] runs a program over a set of input files and expects a
//! fixed set of output files in its output folder. Its task description is
//! the RFC 8785 canonical JSON of the program, its arguments, the content
//! digest of every input and the output names, so the same command over the
//! same bytes always lands in the same cache entry.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use batchd_protocol::{CacheableTask, ErrorKind, ProgressListener, ProgressPayload, WorkError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Status lines received while a command runs are appended here.
pub const STATUS_LOG_FILE_NAME: &str = "_status.log";

/// Errors building a command task
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("cannot read input {path}: {source}")]
    Input { path: PathBuf, source: io::Error },

    #[error("invalid output name {0:?}: must be a plain file name")]
    OutputName(String),

    #[error("a command task needs at least one output")]
    NoOutputs,

    #[error("{published} published names for {outputs} outputs")]
    PublishedNames { published: usize, outputs: usize },

    #[error("canonical encoding failed: {0}")]
    Canonical(String),
}

impl From<TaskError> for WorkError {
    fn from(e: TaskError) -> Self {
        WorkError::new(ErrorKind::InvalidRequest, e.to_string())
    }
}

#[derive(Serialize)]
struct InputDigest {
    path: String,
    sha256: String,
}

#[derive(Serialize)]
struct DescriptionInputs<'a> {
    program: &'a str,
    args: &'a [String],
    inputs: Vec<InputDigest>,
    outputs: &'a [String],
}

/// An external program invocation with declared inputs and outputs.
#[derive(Debug, Clone)]
pub struct CommandTask {
    program: String,
    args: Vec<String>,
    inputs: Vec<PathBuf>,
    outputs: Vec<String>,
    output_dir: PathBuf,
    publish_to: Option<PathBuf>,
    published_names: Option<Vec<String>>,
    from_scratch: bool,
    description: String,
}

impl CommandTask {
    /// Describe `program args...` reading `inputs` and producing `outputs`.
    ///
    /// Every input is read once to compute its digest.
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        inputs: Vec<PathBuf>,
        outputs: Vec<String>,
    ) -> Result<Self, TaskError> {
        if outputs.is_empty() {
            return Err(TaskError::NoOutputs);
        }
        for name in &outputs {
            if !is_plain_file_name(name) {
                return Err(TaskError::OutputName(name.clone()));
            }
        }

        let program = program.into();
        let description = describe(&program, &args, &inputs, &outputs)?;
        debug!("Task description: {}", description);

        Ok(Self {
            program,
            args,
            inputs,
            outputs,
            output_dir: PathBuf::from("."),
            publish_to: None,
            published_names: None,
            from_scratch: false,
            description,
        })
    }

    /// Copy the results into `folder` once they are available.
    pub fn with_publish_to(mut self, folder: impl Into<PathBuf>) -> Self {
        self.publish_to = Some(folder.into());
        self
    }

    /// Publish under these names instead of the output names.
    pub fn with_published_names(mut self, names: Vec<String>) -> Result<Self, TaskError> {
        if names.len() != self.outputs.len() {
            return Err(TaskError::PublishedNames {
                published: names.len(),
                outputs: self.outputs.len(),
            });
        }
        if let Some(bad) = names.iter().find(|n| !is_plain_file_name(n)) {
            return Err(TaskError::OutputName(bad.clone()));
        }
        self.published_names = Some(names);
        Ok(self)
    }

    /// Recompute even if a cached result exists.
    pub fn with_from_scratch(mut self, from_scratch: bool) -> Self {
        self.from_scratch = from_scratch;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Folder the command writes its outputs into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl CacheableTask for CommandTask {
    fn task_description(&self) -> &str {
        &self.description
    }

    fn output_file_names(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn is_from_scratch(&self) -> bool {
        self.from_scratch
    }

    /// Stale when any input was modified after any cached output.
    fn is_stale(&self, candidate: &Path, output_file_names: &[String]) -> bool {
        let newest_input = self.inputs.iter().filter_map(|p| modified(p)).max();
        let Some(newest_input) = newest_input else {
            return false;
        };

        let mut oldest_output: Option<SystemTime> = None;
        for name in output_file_names {
            match modified(&candidate.join(name)) {
                Some(t) => oldest_output = Some(oldest_output.map_or(t, |o| o.min(t))),
                None => return true,
            }
        }
        oldest_output.map_or(true, |oldest| newest_input > oldest)
    }

    fn rebased_to(&self, folder: &Path) -> Self {
        Self {
            output_dir: folder.to_path_buf(),
            ..self.clone()
        }
    }

    fn publish_target(&self) -> Option<PathBuf> {
        self.publish_to.clone()
    }

    fn published_file_names(&self) -> Vec<String> {
        self.published_names
            .clone()
            .unwrap_or_else(|| self.outputs.clone())
    }

    fn report_cached_result(
        &self,
        listener: &dyn ProgressListener,
        folder: &Path,
        _output_file_names: &[String],
    ) {
        listener.on_progress(&ProgressPayload::status(format!(
            "{} results available in {}",
            self.program,
            folder.display()
        )));
    }

    fn capture_progress(&self, work_folder: &Path, payload: &ProgressPayload) -> io::Result<()> {
        let Some(message) = payload.status_message() else {
            return Ok(());
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(work_folder.join(STATUS_LOG_FILE_NAME))?;
        writeln!(file, "{}", message)
    }
}

fn describe(
    program: &str,
    args: &[String],
    inputs: &[PathBuf],
    outputs: &[String],
) -> Result<String, TaskError> {
    let mut digests = Vec::with_capacity(inputs.len());
    for path in inputs {
        let bytes = fs::read(path).map_err(|source| TaskError::Input {
            path: path.clone(),
            source,
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        digests.push(InputDigest {
            path: path.to_string_lossy().into_owned(),
            sha256: hex::encode(hasher.finalize()),
        });
    }

    let bytes = serde_json_canonicalizer::to_vec(&DescriptionInputs {
        program,
        args,
        inputs: digests,
        outputs,
    })
    .map_err(|e| TaskError::Canonical(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| TaskError::Canonical(e.to_string()))
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}
