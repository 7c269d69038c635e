//! # Tool Executor
//!
//! Runs native commands for the `shell` tool. Enforces the timeout, the per-stream output cap
//! and cancellation, and wraps the command in the platform sandbox when asked to.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::domain::config::{ExecConfig, SandboxConfig};
use crate::domain::errors::ExecError;
use crate::domain::exec::{ExecOutput, ExecRequest, SandboxMode};
use crate::domain::traits::CommandExecutor;
use crate::infrastructure::tools::sandbox::SandboxKind;

const READ_CHUNK: usize = 8 * 1024;

/// Time a stopped command gets between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Executes shell commands, optionally inside the platform sandbox.
#[derive(Debug, Clone)]
pub struct SandboxedExecutor {
    sandbox: SandboxKind,
    writable_roots: Vec<PathBuf>,
    max_output_bytes: usize,
}

enum Outcome {
    Finished {
        stdout: std::io::Result<(Vec<u8>, bool)>,
        stderr: std::io::Result<(Vec<u8>, bool)>,
        status: std::io::Result<std::process::ExitStatus>,
    },
    TimedOut,
    Cancelled,
}

impl SandboxedExecutor {
    pub fn new(sandbox: SandboxKind, writable_roots: Vec<PathBuf>, max_output_bytes: usize) -> Self {
        Self {
            sandbox,
            writable_roots,
            max_output_bytes,
        }
    }

    pub fn from_config(exec: &ExecConfig, sandbox: &SandboxConfig) -> Self {
        Self::new(
            SandboxKind::detect(sandbox),
            sandbox.writable_roots.clone(),
            exec.max_output_bytes,
        )
    }

    pub fn sandbox_kind(&self) -> &SandboxKind {
        &self.sandbox
    }

    fn argv(&self, request: &ExecRequest) -> Result<Vec<String>, ExecError> {
        if request.command.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        match request.sandbox {
            SandboxMode::None => Ok(request.command.clone()),
            SandboxMode::Platform => {
                self.sandbox
                    .wrap(
                        &request.command,
                        &request.root,
                        &request.workdir,
                        &self.writable_roots,
                    )
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for SandboxedExecutor {
    async fn exec(
        &self,
        request: ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, ExecError> {
        let argv = self.argv(&request)?;
        let program = argv[0].clone();
        tracing::debug!(
            command = ?request.command,
            workdir = %request.workdir.display(),
            sandbox = ?request.sandbox,
            "spawning command"
        );

        let mut cmd = tokio::process::Command::new(&program);
        cmd.args(&argv[1..])
            .current_dir(&request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout or cancel reaches everything the command started
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cap = self.max_output_bytes;

        let outcome = {
            let io = async {
                let (stdout, stderr, status) = tokio::join!(
                    read_capped(stdout, cap),
                    read_capped(stderr, cap),
                    child.wait()
                );
                Outcome::Finished {
                    stdout,
                    stderr,
                    status,
                }
            };
            tokio::select! {
                finished = io => finished,
                _ = tokio::time::sleep(request.timeout) => Outcome::TimedOut,
                _ = cancel.cancelled() => Outcome::Cancelled,
            }
        };

        let output = match outcome {
            Outcome::Finished {
                stdout,
                stderr,
                status,
            } => {
                let status = status.map_err(ExecError::Wait)?;
                let (stdout, stdout_truncated) = stdout.map_err(ExecError::Wait)?;
                let (stderr, stderr_truncated) = stderr.map_err(ExecError::Wait)?;
                ExecOutput {
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    exit_code: status.code().unwrap_or(-1),
                    duration: started.elapsed(),
                    timed_out: false,
                    cancelled: false,
                    truncated: stdout_truncated || stderr_truncated,
                }
            }
            Outcome::TimedOut | Outcome::Cancelled => {
                let timed_out = matches!(outcome, Outcome::TimedOut);
                terminate(&mut child, &program).await;
                ExecOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: -1,
                    duration: started.elapsed(),
                    timed_out,
                    cancelled: !timed_out,
                    truncated: false,
                }
            }
        };

        tracing::info!(
            program = %program,
            exit_code = output.exit_code,
            timed_out = output.timed_out,
            cancelled = output.cancelled,
            duration_ms = output.duration.as_millis() as u64,
            "command finished"
        );
        Ok(output)
    }
}

/// Reads to EOF, keeping at most `cap` bytes and draining the rest so the child never blocks.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };

    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut truncated = false;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(buf.len());
        if n > room {
            buf.extend_from_slice(&chunk[..room]);
            truncated = true;
        } else {
            buf.extend_from_slice(&chunk[..n]);
        }
    }
    Ok((buf, truncated))
}

/// Stops the command and its descendants: SIGTERM to the group, then SIGKILL after the grace
/// period.
async fn terminate(child: &mut tokio::process::Child, program: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        // SAFETY: kill(2) takes no pointers; a negative pid addresses the process group
        unsafe { libc::kill(-pid, libc::SIGTERM) };
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
            tracing::debug!(program = %program, "command ignored SIGTERM");
        }
        // SAFETY: as above
        unsafe { libc::kill(-pid, libc::SIGKILL) };
    }

    if let Ok(None) = child.try_wait() {
        if let Err(e) = child.kill().await {
            tracing::warn!(program = %program, "failed to kill command: {}", e);
        }
    }
}
