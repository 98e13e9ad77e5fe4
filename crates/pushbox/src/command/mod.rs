//! Process execution seam.
//!
//! [`CommandRunner`] is the only way the harness touches external programs.
//! [`ProcessRunner`] is the real implementation on top of `tokio::process`;
//! tests substitute scripted runners.

use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{CommandOptions, CommandResult, OutputMode};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to keep draining pipes once the process is gone.
/// Grandchildren that inherited the pipes can keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8192;

/// Bytes read from one pipe so far, shared with the draining task.
type Captured = Arc<Mutex<Vec<u8>>>;

/// Runs one external program per call.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Spawn `program`, wait for it (bounded by `options.timeout`) and
    /// return what it produced. Only spawn failures are errors; non-zero
    /// exits and timeouts are results.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> HarnessResult<CommandResult>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> HarnessResult<CommandResult> {
        (**self).run(program, args, options).await
    }
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> HarnessResult<CommandResult> {
        debug!(program, ?args, timeout = ?options.timeout, "spawning");
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .envs(&options.env)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(dir) = &options.cwd {
            command.current_dir(dir);
        }
        match options.output {
            OutputMode::Capture => command.stdout(Stdio::piped()).stderr(Stdio::piped()),
            OutputMode::Discard => command.stdout(Stdio::null()).stderr(Stdio::null()),
            OutputMode::Inherit => command.stdout(Stdio::inherit()).stderr(Stdio::inherit()),
        };

        let started = Instant::now();
        let mut child = command.spawn().map_err(|err| {
            HarnessError::with_context(
                ErrorCode::Spawn,
                format!("failed to spawn '{program}'"),
                serde_json::json!({ "program": program, "source": err.to_string() }),
            )
        })?;

        let pid = child.id();
        let stdout_pipe = child.stdout.take().map(|pipe| spawn_drain(program, "stdout", pipe));
        let stderr_pipe = child.stderr.take().map(|pipe| spawn_drain(program, "stderr", pipe));

        let waited = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        let (exit_code, timed_out) = match waited {
            Some(status) => {
                let status = status.map_err(|err| {
                    HarnessError::io(ErrorCode::Io, format!("failed to wait for '{program}'"), err)
                })?;
                // Descendants left in the group would hold the pipes open.
                kill_group(pid);
                (status.code(), false)
            }
            None => {
                debug!(program, "timed out, killing process group");
                kill_group(pid);
                let _ = child.kill().await;
                (None, true)
            }
        };

        let stdout = collect(stdout_pipe).await;
        let stderr = collect(stderr_pipe).await;

        Ok(CommandResult {
            exit_code,
            stdout,
            stderr,
            timed_out,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

fn spawn_drain<P>(program: &str, stream: &'static str, pipe: P) -> (Captured, JoinHandle<()>)
where
    P: AsyncRead + Unpin + Send + 'static,
{
    let captured = Captured::default();
    let task = tokio::spawn(drain(program.to_string(), stream, pipe, Arc::clone(&captured)));
    (captured, task)
}

/// Append everything `pipe` yields to `captured`, one chunk at a time, so an
/// aborted drain still leaves what was read.
async fn drain<P: AsyncRead + Unpin>(
    program: String,
    stream: &'static str,
    mut pipe: P,
    captured: Captured,
) {
    let mut chunk = vec![0_u8; READ_CHUNK];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(count) => {
                let mut buf = captured.lock().unwrap_or_else(PoisonError::into_inner);
                buf.extend_from_slice(chunk.get(..count).unwrap_or_default());
            }
            Err(err) => {
                warn!(program = %program, stream, error = %err, "failed to read process output");
                break;
            }
        }
    }
}

async fn collect(pipe: Option<(Captured, JoinHandle<()>)>) -> String {
    let Some((captured, mut task)) = pipe else {
        return String::new();
    };
    if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
        debug!("pipe still open after grace period, keeping partial output");
        task.abort();
    }
    let bytes = captured.lock().unwrap_or_else(PoisonError::into_inner);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// SIGKILL the whole process group led by `pid`. A group with no members
/// left is not an error.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid.and_then(|id| i32::try_from(id).ok()) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;
}
