//! Argument-vector command builder and process runner.
//!
//! Every external tool is invoked with a discrete argument vector; nothing
//! is ever passed through a shell, so URLs and paths cannot inject commands.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// A program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandSpec {
    /// Create a new command for `program`.
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a filesystem path as one argument.
    pub fn path_arg(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().to_string();
        self.arg(path)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Short tool name for logs (`yt-dlp` for `/usr/local/bin/yt-dlp`).
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or_else(|| OsStr::new("process"))
            .to_string_lossy()
            .to_string()
    }

    /// Human-readable command line, for logging only.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Runner for external commands with timeout and cancellation.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Timeout per invocation
    timeout: Option<Duration>,
}

/// How a child process wait ended.
enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ProcessRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set an optional timeout.
    pub fn with_optional_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a command to completion and return its standard output.
    ///
    /// Stderr is forwarded to `tracing` line by line while the process runs.
    /// A non-zero exit status fails with [`MediaError::ProcessFailed`]
    /// carrying the tail of stderr.
    pub async fn run(&self, spec: &CommandSpec) -> MediaResult<String> {
        let tool = spec.tool_name();
        debug!(tool = %tool, "Running: {}", spec.display());

        let mut child = spawn(spec)?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;

        let stderr_task = tokio::spawn(forward_stderr(tool.clone(), stderr));
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        });

        let status = match self.wait_for_completion(&mut child, &tool).await {
            Ok(status) => status,
            Err(e) => {
                stderr_task.abort();
                stdout_task.abort();
                return Err(e);
            }
        };

        let stderr_tail = stderr_task.await.unwrap_or_default();
        let stdout = stdout_task
            .await
            .map_err(|e| MediaError::internal(format!("stdout reader panicked: {}", e)))??;

        if status.success() {
            Ok(String::from_utf8_lossy(&stdout).to_string())
        } else {
            Err(exit_failure(&tool, status, stderr_tail))
        }
    }

    /// Spawn a command whose standard output is consumed as a stream.
    ///
    /// The caller reads [`MediaStream`] to the end and then calls
    /// [`MediaStream::finish`] to collect the exit status. The runner's
    /// timeout starts now and covers both the reading and the wait.
    pub fn spawn_stdout(&self, spec: &CommandSpec) -> MediaResult<MediaStream> {
        let tool = spec.tool_name();
        debug!(tool = %tool, "Streaming: {}", spec.display());

        let mut child = spawn(spec)?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;

        let stderr_task = tokio::spawn(forward_stderr(tool.clone(), stderr));

        Ok(MediaStream {
            reader: Box::new(stdout),
            deadline: StreamDeadline::new(tool.clone(), self.timeout),
            completion: Some(StreamCompletion {
                child,
                tool,
                stderr_task,
                runner: self.clone(),
            }),
        })
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child, tool: &str) -> MediaResult<ExitStatus> {
        let timeout = self.timeout;
        let timeout_fut = async move {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = timeout_fut => WaitOutcome::TimedOut,
            _ = wait_cancelled(self.cancel_rx.clone()) => WaitOutcome::Cancelled,
        };

        match outcome {
            WaitOutcome::Exited(status) => Ok(status?),
            WaitOutcome::TimedOut => {
                let secs = timeout.map(|d| d.as_secs()).unwrap_or_default();
                warn!(tool = %tool, "Timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                Err(MediaError::Timeout {
                    tool: tool.to_string(),
                    secs,
                })
            }
            WaitOutcome::Cancelled => {
                info!(tool = %tool, "Cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
        }
    }
}

/// Standard output of a running tool, consumed as a byte stream.
pub struct MediaStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    deadline: StreamDeadline,
    completion: Option<StreamCompletion>,
}

/// Point in time by which a streaming tool must be done.
#[derive(Debug, Clone)]
pub struct StreamDeadline {
    tool: String,
    timeout: Option<Duration>,
    at: Option<Instant>,
}

impl StreamDeadline {
    fn new(tool: String, timeout: Option<Duration>) -> Self {
        Self {
            tool,
            timeout,
            at: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn time_left(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Drive `fut` until it completes or the deadline passes.
    pub async fn bound<F: Future>(&self, fut: F) -> MediaResult<F::Output> {
        let Some(at) = self.at else {
            return Ok(fut.await);
        };

        tokio::time::timeout_at(at, fut).await.map_err(|_| {
            let secs = self.timeout.map(|d| d.as_secs()).unwrap_or_default();
            warn!(tool = %self.tool, "Stream exceeded {} seconds", secs);
            MediaError::Timeout {
                tool: self.tool.clone(),
                secs,
            }
        })
    }
}

struct StreamCompletion {
    child: Child,
    tool: String,
    stderr_task: JoinHandle<String>,
    runner: ProcessRunner,
}

impl MediaStream {
    /// Wrap an in-memory or otherwise already-open reader.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            deadline: StreamDeadline::new("stream".to_string(), None),
            completion: None,
        }
    }

    /// Restart the deadline with `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let tool = std::mem::take(&mut self.deadline.tool);
        self.deadline = StreamDeadline::new(tool, Some(timeout));
        self
    }

    /// Deadline for reading the stream and collecting the exit status.
    pub fn deadline(&self) -> StreamDeadline {
        self.deadline.clone()
    }

    /// The byte stream.
    pub fn reader(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        self.reader.as_mut()
    }

    /// Wait for the producing process and check its exit status.
    pub async fn finish(self) -> MediaResult<()> {
        let Some(mut completion) = self.completion else {
            return Ok(());
        };
        // Close our end so a producer blocked on a full pipe sees EPIPE.
        drop(self.reader);

        let runner = completion
            .runner
            .clone()
            .with_optional_timeout(self.deadline.time_left());
        let status = match runner
            .wait_for_completion(&mut completion.child, &completion.tool)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                completion.stderr_task.abort();
                return Err(e);
            }
        };
        let stderr_tail = completion.stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(exit_failure(&completion.tool, status, stderr_tail))
        }
    }
}

fn spawn(spec: &CommandSpec) -> MediaResult<Child> {
    spec.command().spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MediaError::ToolNotFound {
                tool: spec.program().display().to_string(),
            }
        } else {
            MediaError::from(e)
        }
    })
}

fn exit_failure(tool: &str, status: ExitStatus, stderr_tail: String) -> MediaError {
    let message = stderr_tail
        .lines()
        .last()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or("exited with non-zero status")
        .to_string();

    MediaError::process_failed(
        tool,
        message,
        status.code(),
        (!stderr_tail.is_empty()).then_some(stderr_tail),
    )
}

/// Forward stderr lines to the log as they arrive; return the tail.
async fn forward_stderr(tool: String, stderr: ChildStderr) -> String {
    let mut reader = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = reader.next_line().await {
        debug!(tool = %tool, "{}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}

/// Resolve once the cancel flag flips to `true`; never if there is no signal.
async fn wait_cancelled(cancel_rx: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = cancel_rx {
        if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file paths, in `-i` order
    inputs: Vec<PathBuf>,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before the first -i)
    input_args: Vec<String>,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![input.as_ref().to_path_buf()],
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add another input file.
    pub fn add_input(mut self, input: impl AsRef<Path>) -> Self {
        self.inputs.push(input.as_ref().to_path_buf());
        self
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set seek position (before input).
    pub fn seek(self, seconds: f64) -> Self {
        self.input_arg("-ss").input_arg(format!("{:.3}", seconds))
    }

    /// Set duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    /// Map a stream specifier into the output.
    pub fn map(self, specifier: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(specifier)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Copy all streams without re-encoding.
    pub fn codec_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-vframes").output_arg("1")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());
        args.push("-nostdin".to_string());

        args.extend(self.input_args.clone());

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Turn the builder into a runnable command for the given binary.
    pub fn into_spec(self, ffmpeg: impl AsRef<Path>) -> CommandSpec {
        CommandSpec::new(ffmpeg).args(self.build_args())
    }
}
