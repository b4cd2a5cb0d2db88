//! Process runner adapter over `tokio::process`
//!
//! Each child gets reader tasks for stdout and stderr plus a supervisor task
//! that waits for exit or for cancellation. Cancellation sends SIGTERM on unix
//! and kills the child once the grace period expires.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SegcutError, SegcutResult};
use crate::ports::{CommandSpec, ProcessHandle, ProcessOutput, ProcessRunnerPort, STATUS_CHANNEL_CAPACITY};

/// Default time a cancelled process gets to exit on its own
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(3000);

/// Number of stderr lines retained per process
const STDERR_TAIL_LINES: usize = 50;

/// Chunks in flight between the two sides of a pipe
const PIPE_CHANNEL_CAPACITY: usize = 16;

const PIPE_CHUNK_SIZE: usize = 64 * 1024;

/// Runs external programs as tokio child processes
#[derive(Debug, Clone)]
pub struct TokioProcessRunner {
    grace: Duration,
}

impl Default for TokioProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CANCEL_GRACE)
    }
}

struct Wiring {
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<String>>,
}

impl TokioProcessRunner {
    /// Runner with the given cancellation grace period
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    fn spawn_child(spec: &CommandSpec, stdin: Stdio) -> SegcutResult<Child> {
        debug!("Spawning: {}", spec);
        Command::new(&spec.program)
            .args(&spec.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SegcutError::from_io(e, Path::new(&spec.program)))
    }

    fn stdin_mode(spec: &CommandSpec) -> Stdio {
        if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    }

    /// Wire stdin, stdout and stderr of a freshly spawned child
    fn wire(child: &mut Child, spec: &CommandSpec, status: mpsc::Sender<String>) -> Wiring {
        if let (Some(bytes), Some(stdin)) = (spec.stdin.clone(), child.stdin.take()) {
            tokio::spawn(feed_stdin(stdin, bytes));
        }

        let stdout = match child.stdout.take() {
            Some(out) if spec.capture_stdout => tokio::spawn(read_all(out)),
            Some(out) => tokio::spawn(stream_lines(out, status)),
            None => tokio::spawn(async { Vec::new() }),
        };
        let stderr = match child.stderr.take() {
            Some(err) => tokio::spawn(tail_lines(err)),
            None => tokio::spawn(async { Vec::new() }),
        };

        Wiring { stdout, stderr }
    }
}

#[async_trait]
impl ProcessRunnerPort for TokioProcessRunner {
    async fn run(&self, spec: CommandSpec) -> SegcutResult<ProcessHandle> {
        let mut child = Self::spawn_child(&spec, Self::stdin_mode(&spec))?;
        let (tx, rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        let wiring = Self::wire(&mut child, &spec, tx);

        let cancel = CancellationToken::new();
        let completion = tokio::spawn(supervise(child, cancel.clone(), self.grace, wiring));
        Ok(ProcessHandle::new(rx, completion, cancel))
    }

    async fn run_piped(&self, producer: CommandSpec, consumer: CommandSpec) -> SegcutResult<ProcessHandle> {
        let mut producer_child = Self::spawn_child(&producer, Self::stdin_mode(&producer))?;
        let mut consumer_child = Self::spawn_child(&consumer, Stdio::piped())?;

        let (tx, rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(PIPE_CHANNEL_CAPACITY);

        // The producer's stdout feeds the pump instead of the status stream
        let producer_stdout = producer_child.stdout.take();
        let producer_wiring = Self::wire(&mut producer_child, &producer, tx.clone());
        let pump_reader = tokio::spawn(pump_out(producer_stdout, chunk_tx));
        let consumer_stdin = consumer_child.stdin.take();
        tokio::spawn(pump_in(consumer_stdin, chunk_rx));

        let consumer_spec = CommandSpec {
            stdin: None,
            ..consumer.clone()
        };
        let consumer_wiring = Self::wire(&mut consumer_child, &consumer_spec, tx);

        let cancel = CancellationToken::new();
        let grace = self.grace;

        let teardown = cancel.clone();
        let producer_task = tokio::spawn(async move {
            let out = supervise(producer_child, teardown.clone(), grace, producer_wiring).await;
            let _ = pump_reader.await;
            if !matches!(&out, Ok(o) if o.success()) {
                teardown.cancel();
            }
            out
        });

        let teardown = cancel.clone();
        let consumer_task = tokio::spawn(async move {
            let out = supervise(consumer_child, teardown.clone(), grace, consumer_wiring).await;
            if !matches!(&out, Ok(o) if o.success()) {
                teardown.cancel();
            }
            out
        });

        let completion = tokio::spawn(async move {
            let producer_out = join_output(producer_task).await?;
            let consumer_out = join_output(consumer_task).await?;

            let failed = |o: &ProcessOutput| !o.cancelled && o.exit_code != Some(0);
            if failed(&producer_out) {
                warn!("Pipe producer exited with {:?}", producer_out.exit_code);
                return Ok(producer_out);
            }
            Ok(consumer_out)
        });

        Ok(ProcessHandle::new(rx, completion, cancel))
    }
}

async fn join_output(task: JoinHandle<SegcutResult<ProcessOutput>>) -> SegcutResult<ProcessOutput> {
    task.await.map_err(|e| SegcutError::Execution {
        stage: "pipe".to_string(),
        exit_code: None,
        message: format!("pipe task failed: {}", e),
        status_text: Vec::new(),
    })?
}

async fn supervise(
    mut child: Child,
    cancel: CancellationToken,
    grace: Duration,
    wiring: Wiring,
) -> SegcutResult<ProcessOutput> {
    let (status, cancelled) = tokio::select! {
        status = child.wait() => (status?, false),
        _ = cancel.cancelled() => (terminate(&mut child, grace).await?, true),
    };

    // A killed child may leave grandchildren holding the pipes open
    let (stdout, stderr_tail) = if cancelled {
        (
            drain(wiring.stdout, grace).await,
            drain(wiring.stderr, grace).await,
        )
    } else {
        (
            wiring.stdout.await.unwrap_or_default(),
            wiring.stderr.await.unwrap_or_default(),
        )
    };

    debug!(code = ?status.code(), cancelled, "Process finished");
    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr_tail,
        cancelled,
    })
}

async fn drain<T: Default>(task: JoinHandle<T>, grace: Duration) -> T {
    let abort = task.abort_handle();
    match tokio::time::timeout(grace, task).await {
        Ok(Ok(value)) => value,
        _ => {
            abort.abort();
            T::default()
        }
    }
}

async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(status) => return status,
                    Err(_) => warn!("Process {} ignored SIGTERM for {:?}; killing", pid, grace),
                }
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    child.kill().await?;
    child.wait().await
}

async fn feed_stdin(mut stdin: ChildStdin, bytes: Vec<u8>) {
    if let Err(e) = stdin.write_all(&bytes).await {
        debug!("Failed to write stdin: {}", e);
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!("Failed to read stdout: {}", e);
    }
    buf
}

async fn stream_lines<R: AsyncRead + Unpin>(reader: R, status: mpsc::Sender<String>) -> Vec<u8> {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        // Status is lossy; a slow consumer only misses intermediate lines
        let _ = status.try_send(line);
    }
    Vec::new()
}

async fn tail_lines<R: AsyncRead + Unpin>(reader: R) -> Vec<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

async fn pump_out(stdout: Option<ChildStdout>, chunks: mpsc::Sender<Vec<u8>>) {
    let Some(mut stdout) = stdout else { return };
    let mut buf = vec![0u8; PIPE_CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if chunks.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn pump_in(stdin: Option<ChildStdin>, mut chunks: mpsc::Receiver<Vec<u8>>) {
    let Some(mut stdin) = stdin else { return };
    while let Some(chunk) = chunks.recv().await {
        if stdin.write_all(&chunk).await.is_err() {
            break;
        }
    }
    // Dropping stdin signals end of input to the consumer
}
