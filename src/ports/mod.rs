// Ports - Interface definitions (contracts)

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::domain::model::MediaInfo;
use crate::error::{SegcutError, SegcutResult};

/// Capacity of the status line channel of one process
pub const STATUS_CHANNEL_CAPACITY: usize = 256;

/// One external command invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Bytes written to the child's stdin, which is then closed
    pub stdin: Option<Vec<u8>>,
    /// Collect stdout into [`ProcessOutput::stdout`] instead of streaming it as status lines
    pub capture_stdout: bool,
}

impl CommandSpec {
    /// Command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            capture_stdout: false,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `bytes` on stdin
    pub fn with_stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }

    /// Capture stdout instead of streaming it
    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Result of a finished process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    /// Last lines written to stderr
    pub stderr_tail: Vec<String>,
    /// The process was stopped through its cancellation token
    pub cancelled: bool,
}

impl ProcessOutput {
    /// Exited normally with status 0
    pub fn success(&self) -> bool {
        !self.cancelled && self.exit_code == Some(0)
    }

    /// Map this output to the error taxonomy; `Ok` on success
    pub fn into_result(self, stage: &str) -> SegcutResult<ProcessOutput> {
        if self.cancelled {
            return Err(SegcutError::Cancelled);
        }
        if self.exit_code != Some(0) {
            return Err(SegcutError::from_process_failure(
                stage,
                self.exit_code,
                &self.stderr_tail,
            ));
        }
        Ok(self)
    }
}

/// A running process: streamed status lines, cancellation and completion.
///
/// Dropping the handle before [`ProcessHandle::wait`] has returned cancels
/// the process.
#[derive(Debug)]
pub struct ProcessHandle {
    status: mpsc::Receiver<String>,
    completion: JoinHandle<SegcutResult<ProcessOutput>>,
    cancel: CancellationToken,
    on_drop: DropGuard,
}

impl ProcessHandle {
    /// Assemble a handle from its parts
    pub fn new(
        status: mpsc::Receiver<String>,
        completion: JoinHandle<SegcutResult<ProcessOutput>>,
        cancel: CancellationToken,
    ) -> Self {
        let on_drop = cancel.clone().drop_guard();
        Self {
            status,
            completion,
            cancel,
            on_drop,
        }
    }

    /// Next status line; `None` once the stream has closed
    pub async fn next_status_line(&mut self) -> Option<String> {
        self.status.recv().await
    }

    /// Request cooperative termination
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this process when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the process to finish
    pub async fn wait(self) -> SegcutResult<ProcessOutput> {
        let Self {
            status,
            completion,
            on_drop,
            ..
        } = self;
        drop(status);
        let joined = completion.await;
        on_drop.disarm();
        match joined {
            Ok(result) => result,
            Err(join_error) => Err(SegcutError::Execution {
                stage: "process".to_string(),
                exit_code: None,
                message: format!("process task failed: {}", join_error),
                status_text: Vec::new(),
            }),
        }
    }
}

/// Port for spawning external processes
#[async_trait]
pub trait ProcessRunnerPort: Send + Sync {
    /// Spawn `spec`, returning immediately with a handle
    async fn run(&self, spec: CommandSpec) -> SegcutResult<ProcessHandle>;

    /// Spawn `producer | consumer`; cancelling or failing either side stops both.
    ///
    /// The handle streams the consumer's status and completes with the
    /// consumer's output, or the producer's when the producer failed.
    async fn run_piped(&self, producer: CommandSpec, consumer: CommandSpec) -> SegcutResult<ProcessHandle> {
        let _ = (producer, consumer);
        Err(SegcutError::Config {
            message: "piped execution is not supported by this runner".to_string(),
        })
    }
}

/// Half-open time range `[start, end)` in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    /// Window of `radius` seconds on both sides of `center`, clamped at zero
    pub fn around(center: f64, radius: f64) -> Self {
        Self {
            start: (center - radius).max(0.0),
            end: center + radius,
        }
    }
}

/// Port for media file probing
#[async_trait]
pub trait ProbePort: Send + Sync {
    /// Duration, streams and tags of `path`
    async fn probe(&self, path: &Path) -> SegcutResult<MediaInfo>;

    /// Keyframe timestamps (seconds, ascending) of one stream within `window`
    async fn read_keyframes(
        &self,
        path: &Path,
        stream_index: usize,
        window: TimeWindow,
    ) -> SegcutResult<Vec<f64>>;
}

/// Port for file system operations
#[async_trait]
pub trait FsPort: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> bool;

    /// Create directory (including parent directories)
    async fn create_dir_all(&self, dir: &Path) -> SegcutResult<()>;

    /// Confirm that a file can be created in `dir` right now
    async fn ensure_writable_dir(&self, dir: &Path) -> SegcutResult<()>;

    /// Delete a file
    async fn remove_file(&self, path: &Path) -> SegcutResult<()>;

    /// Media files under `root`, recursing into directories
    async fn list_media_files(&self, root: &Path, extensions: &[&str]) -> SegcutResult<Vec<PathBuf>>;
}
