use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;

const DEFAULT_SHELL: &str = "/bin/sh";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

// I/O buffer sizing
const READ_CHUNK_SIZE: usize = 8192; // bytes per read
const AGGREGATE_BUFFER_INITIAL_CAPACITY: usize = 8 * 1024; // 8 KiB

// Synthetic exit code for a killed-on-timeout command, conventional
// shell style: 128 + signal-ish code.
const TIMEOUT_CODE: i32 = 64;
const EXIT_CODE_SIGNAL_BASE: i32 = 128;

/// One command emitted by a `cmd` event, with the ids that produced it.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub message_id: String,
    pub operation_id: String,
}

/// Captured result of one executed command.
#[derive(Debug)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Executes one command to completion. The queue treats this as a black
/// box; hosts substitute their terminal integration here.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, request: &CommandRequest) -> anyhow::Result<CommandOutput>;
}

/// Emitted on the completion channel after each command settles,
/// success or failure.
#[derive(Debug)]
pub struct CommandCompletion {
    pub request: CommandRequest,
    pub result: anyhow::Result<CommandOutput>,
}

/// Serializes command execution: one command completes before the next
/// starts, in push order.
///
/// A single drain task consumes the queue, so re-entrant pushes while a
/// command runs are simply appended and picked up by the same loop; there
/// are no parallel drains. A failing command is reported on the
/// completion channel and the loop proceeds to the next one.
pub struct CommandQueue {
    tx_request: mpsc::UnboundedSender<CommandRequest>,
    drain_task: JoinHandle<()>,
}

impl CommandQueue {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
    ) -> (Self, mpsc::UnboundedReceiver<CommandCompletion>) {
        let (tx_request, mut rx_request) = mpsc::unbounded_channel::<CommandRequest>();
        let (tx_done, rx_done) = mpsc::unbounded_channel::<CommandCompletion>();

        let drain_task = tokio::spawn(async move {
            while let Some(request) = rx_request.recv().await {
                debug!("executing `{}`", request.command);
                let result = executor.execute(&request).await;
                if let Err(err) = &result {
                    error!("command `{}` failed: {err:#}", request.command);
                }
                if tx_done.send(CommandCompletion { request, result }).is_err() {
                    // Completion consumer is gone; keep draining anyway so
                    // queued commands still run.
                    debug!("command completion receiver dropped");
                }
            }
        });

        (
            Self {
                tx_request,
                drain_task,
            },
            rx_done,
        )
    }

    /// Appends a command. Returns immediately; execution order is push
    /// order.
    pub fn push(&self, request: CommandRequest) {
        if self.tx_request.send(request).is_err() {
            error!("command queue is shut down; dropping command");
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.drain_task.abort();
    }
}

/// Default [`CommandExecutor`]: runs `sh -c <command>` with piped output,
/// a hard timeout, and interleaved stdout/stderr capture.
pub struct ShellCommandExecutor {
    shell: String,
    timeout: Duration,
}

impl ShellCommandExecutor {
    pub fn new(shell: impl Into<String>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }
}

impl Default for ShellCommandExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL, DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl CommandExecutor for ShellCommandExecutor {
    async fn execute(&self, request: &CommandRequest) -> anyhow::Result<CommandOutput> {
        let start = Instant::now();

        let mut command = tokio::process::Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&request.command)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", request.command))?;
        let mut stdout_reader = child
            .stdout
            .take()
            .context("stdout pipe was unexpectedly not available")?;
        let mut stderr_reader = child
            .stderr
            .take()
            .context("stderr pipe was unexpectedly not available")?;

        let mut out_stdout: Vec<u8> = Vec::with_capacity(AGGREGATE_BUFFER_INITIAL_CAPACITY);
        let mut out_stderr: Vec<u8> = Vec::with_capacity(AGGREGATE_BUFFER_INITIAL_CAPACITY);
        let mut tmp_stdout = [0u8; READ_CHUNK_SIZE];
        let mut tmp_stderr = [0u8; READ_CHUNK_SIZE];

        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut child_finished = false;
        let mut exit_code: Option<i32> = None;

        let timeout_fut = tokio::time::sleep(self.timeout);
        tokio::pin!(timeout_fut);

        // Drive process, timeout, and both pipes concurrently so output
        // order is preserved as closely as the pipes allow.
        while stdout_open || stderr_open || !child_finished {
            tokio::select! {
                _ = &mut timeout_fut, if !child_finished => {
                    let _ = child.start_kill();
                    exit_code = Some(EXIT_CODE_SIGNAL_BASE + TIMEOUT_CODE);
                    child_finished = true;
                }

                res = child.wait(), if !child_finished => {
                    let status = res.context("wait on child process")?;
                    exit_code = Some(status.code().unwrap_or(-1));
                    child_finished = true;
                }

                read = stdout_reader.read(&mut tmp_stdout), if stdout_open => {
                    match read {
                        Ok(0) => stdout_open = false,
                        Ok(n) => out_stdout.extend_from_slice(&tmp_stdout[..n]),
                        Err(err) => return Err(err.into()),
                    }
                }

                read = stderr_reader.read(&mut tmp_stderr), if stderr_open => {
                    match read {
                        Ok(0) => stderr_open = false,
                        Ok(n) => out_stderr.extend_from_slice(&tmp_stderr[..n]),
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        }

        Ok(CommandOutput {
            exit_code: exit_code.unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out_stdout).to_string(),
            stderr: String::from_utf8_lossy(&out_stderr).to_string(),
            duration: start.elapsed(),
        })
    }
}
