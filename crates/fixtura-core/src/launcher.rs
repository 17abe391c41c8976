//! Process launcher and output drains
//!
//! Every runtime invocation goes through [`ProcessLauncher::execute_logged`],
//! which spawns the executable and immediately hands its stdout and stderr to
//! two independent drain tasks. The drains are best-effort: they log and stop
//! on read errors, they never delay the caller, and nothing waits for them
//! before the process is reaped. A task on the tokio runtime is dropped when
//! the runtime shuts down, so drains never hold up program exit.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::{Result, SupervisorError};

/// Per-operation logging context, attached to every record emitted on its behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    /// Container or pod the operation concerns
    pub resource: Option<String>,
    /// PID of the process the output belongs to
    pub pid: Option<u32>,
    /// What produced the output (`supervisor`, `status: stdout`, ...)
    pub source: String,
}

impl LogContext {
    /// Context for supervisor-level work not tied to one resource
    pub fn supervisor() -> Self {
        Self {
            resource: None,
            pid: None,
            source: "supervisor".to_string(),
        }
    }

    /// Context for work on one container or pod
    pub fn for_resource(name: impl Into<String>) -> Self {
        Self {
            resource: Some(name.into()),
            ..Self::supervisor()
        }
    }

    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// A span carrying this context
    pub fn span(&self) -> tracing::Span {
        let resource = self.resource.as_deref().unwrap_or("*");
        let pid = match self.pid {
            Some(pid) => pid.to_string(),
            None => "*".to_string(),
        };
        tracing::info_span!("fixtura", resource = %resource, pid = %pid, source = %self.source)
    }
}

/// Where the stdout lines of a process go (after trace logging)
#[derive(Debug, Clone)]
pub enum OutputSink {
    /// Trace-log only
    Trace,
    /// Also forward each line to a receiver
    Lines(mpsc::UnboundedSender<String>),
}

impl OutputSink {
    /// A forwarding sink plus the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::Lines(tx), rx)
    }
}

/// A spawned runtime process
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    command_line: String,
    pid: Option<u32>,
    child: Child,
    // Held open so `--interactive` processes keep their stdin
    _stdin: Option<ChildStdin>,
}

impl ProcessHandle {
    /// Short label of the invocation (`run`, `status`, ...)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The full command line, for diagnostics
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True until the process has exited
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Exit status, if the process has already exited
    pub fn try_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Wait at most `limit`; `None` if the process is still running afterwards
    pub async fn wait_timeout(&mut self, limit: Duration) -> Result<Option<ExitStatus>> {
        match tokio::time::timeout(limit, self.child.wait()).await {
            Ok(status) => Ok(Some(status?)),
            Err(_) => Ok(None),
        }
    }

    /// Wait for exit and fail unless the exit code is zero
    pub async fn wait_success(&mut self) -> Result<()> {
        let status = self.wait().await?;
        self.check(status)
    }

    /// Map a non-zero exit status to [`SupervisorError::NonZeroExit`]
    pub fn check(&self, status: ExitStatus) -> Result<()> {
        if status.success() {
            Ok(())
        } else {
            Err(SupervisorError::NonZeroExit {
                command: self.command_line.clone(),
                code: status.code(),
            })
        }
    }
}

/// Spawns the container runtime executable
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    executable: PathBuf,
}

impl ProcessLauncher {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// The command line for `args`, as it would be typed
    pub fn command_line(&self, args: &[String]) -> String {
        let mut line = self.executable.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Spawn the runtime with `args` and start draining its output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn execute_logged(
        &self,
        context: &LogContext,
        label: &str,
        args: &[String],
        sink: OutputSink,
    ) -> Result<ProcessHandle> {
        let command_line = self.command_line(args);
        let span = context.span();
        tracing::debug!(parent: &span, command = %command_line, "Exec");

        let mut child = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        let pid = child.id();
        let drain_context = context.clone().with_pid(pid);

        if let Some(stderr) = child.stderr.take() {
            let span = drain_context
                .clone()
                .with_source(format!("{}: stderr", label))
                .span();
            tokio::spawn(drain_stderr(stderr).instrument(span));
        }
        if let Some(stdout) = child.stdout.take() {
            let span = drain_context
                .with_source(format!("{}: stdout", label))
                .span();
            tokio::spawn(drain_stdout(stdout, sink).instrument(span));
        }

        Ok(ProcessHandle {
            label: label.to_string(),
            command_line,
            pid,
            _stdin: child.stdin.take(),
            child,
        })
    }

    /// Run to completion, returning the last stdout line (if any) and the exit status.
    ///
    /// Output arriving after `settle` has elapsed past process exit is ignored.
    pub async fn query(
        &self,
        context: &LogContext,
        label: &str,
        args: &[String],
        settle: Duration,
    ) -> Result<(ExitStatus, Option<String>)> {
        let (status, mut lines) = self.output(context, label, args, settle).await?;
        Ok((status, lines.pop()))
    }

    /// Run to completion, collecting every stdout line
    pub async fn output(
        &self,
        context: &LogContext,
        label: &str,
        args: &[String],
        settle: Duration,
    ) -> Result<(ExitStatus, Vec<String>)> {
        let (sink, mut receiver) = OutputSink::channel();
        let mut process = self.execute_logged(context, label, args, sink)?;
        let status = process.wait().await?;

        let mut lines = Vec::new();
        let collect = async {
            while let Some(line) = receiver.recv().await {
                lines.push(line);
            }
        };
        // The drain closes the channel at end of stream
        let _ = tokio::time::timeout(settle, collect).await;
        Ok((status, lines))
    }
}

async fn drain_stdout<R>(reader: R, sink: OutputSink)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::trace!("{}", line);
                if let OutputSink::Lines(tx) = &sink {
                    // Receiver may be gone already
                    let _ = tx.send(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::trace!(error = %e, "stdout drain stopped");
                break;
            }
        }
    }
}

async fn drain_stderr<R>(reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::error!("{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "stderr drain stopped");
                break;
            }
        }
    }
}
