//! Subprocess execution of sample variants
//!
//! [`run_variant`] spawns one program, captures stdout and stderr in full,
//! and enforces an optional wall-clock budget. A timed-out child is killed
//! and reaped before the error is returned.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, instrument, warn};

use crate::error::{ParityError, Result};
use crate::variant::CommandLine;

/// Captured outcome of one successful variant run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub variant: String,
    /// Displayable command line that produced this result
    pub command: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ExecutionResult {
    /// A successful result with the given stdout, for scripted runners.
    pub fn with_stdout(variant: impl Into<String>, stdout: impl Into<Vec<u8>>) -> Self {
        let variant = variant.into();
        Self {
            command: variant.clone(),
            variant,
            stdout: stdout.into(),
            stderr: Vec::new(),
            exit_code: Some(0),
            duration: Duration::ZERO,
        }
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Executes variant command lines.
///
/// The harness talks to subprocesses only through this trait so tests can
/// substitute scripted runners.
#[async_trait]
pub trait SampleRunner: Send + Sync {
    async fn run(&self, command: &CommandLine, timeout: Option<Duration>)
    -> Result<ExecutionResult>;
}

/// Runs variants as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl SampleRunner for ProcessRunner {
    async fn run(
        &self,
        command: &CommandLine,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        run_variant(command, timeout).await
    }
}

/// Spawn `command`, wait for it to finish and capture its output.
///
/// # Errors
///
/// - [`ParityError::Spawn`] if the program cannot be launched
/// - [`ParityError::Timeout`] if `timeout` elapses (the child is killed)
/// - [`ParityError::NonZeroExit`] if the program exits unsuccessfully
#[instrument(skip_all, fields(variant = %command.variant))]
pub async fn run_variant(
    command: &CommandLine,
    timeout: Option<Duration>,
) -> Result<ExecutionResult> {
    let rendered = command.to_string();
    info!("Running sample command: {rendered}");

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if command.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group, so a timeout also reaches anything the sample forked.
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|source| ParityError::Spawn { command: rendered.clone(), source })?;
    let pid = child.id();

    if let (Some(input), Some(mut stdin)) = (command.stdin.clone(), child.stdin.take()) {
        debug!("Input data: {input}");
        tokio::spawn(async move {
            // The child may exit without draining stdin.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!("stdin write ended early: {e}");
            }
        });
    }

    let stdout = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
    let stderr = child.stderr.take().map(|s| tokio::spawn(read_all(s)));
    let readers: Vec<AbortHandle> =
        stdout.iter().chain(stderr.iter()).map(JoinHandle::abort_handle).collect();

    // The budget covers the pipes too: a forked helper holding them open
    // must not outlive the deadline.
    let finish = async {
        let status = child.wait().await?;
        let stdout = collect(stdout).await?;
        let stderr = collect(stderr).await?;
        Ok::<_, ParityError>((status, stdout, stderr))
    };
    let finished = match timeout {
        Some(limit) => tokio::time::timeout(limit, finish).await.ok(),
        None => Some(finish.await),
    };

    let (status, stdout, stderr) = match finished {
        Some(done) => done?,
        None => {
            let limit = timeout.unwrap_or_default();
            warn!("sample exceeded {limit:?}; killing");
            terminate(&mut child, pid).await;
            for reader in &readers {
                reader.abort();
            }
            return Err(ParityError::Timeout {
                variant: command.variant.clone(),
                command: rendered,
                timeout: limit,
            });
        }
    };
    let duration = start.elapsed();

    if !status.success() {
        return Err(ParityError::NonZeroExit {
            variant: command.variant.clone(),
            command: rendered,
            code: status.code(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        });
    }

    debug!(
        elapsed_ms = duration.as_millis() as u64,
        "Sample output: {}",
        String::from_utf8_lossy(&stdout)
    );

    Ok(ExecutionResult {
        variant: command.variant.clone(),
        command: rendered,
        stdout,
        stderr,
        exit_code: status.code(),
        duration,
    })
}

/// Kill the child's process group (unix) and the child itself.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) {
            // SAFETY: killpg only sends a signal; the group was created at spawn.
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
                debug!("killpg({pgid}): {}", std::io::Error::last_os_error());
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
    // Fails harmlessly when the child itself already exited.
    if let Err(e) = child.kill().await {
        debug!("kill: {e}");
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn collect(task: Option<JoinHandle<std::io::Result<Vec<u8>>>>) -> Result<Vec<u8>> {
    match task {
        Some(task) => Ok(task.await.map_err(std::io::Error::other)??),
        None => Ok(Vec::new()),
    }
}
