//! Child process lifecycle for one snippet
//!
//! The child is spawned into its own process group so that anything it
//! forks can be killed together. Every exit path (normal exit, timeout,
//! cancellation) ends with the group killed and the child reaped.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use tera_sdk::types::{ExecutionResult, ExitStatus};

use super::SandboxError;
use crate::cancel::CancelToken;

/// How long to wait for pipes to drain once the process group is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to launch one interpreter run
#[derive(Debug, Clone)]
pub struct ScriptCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

#[derive(Clone, Copy)]
enum Ending {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Read `reader` to EOF, keeping at most `limit` bytes and discarding the rest
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let Some(mut reader) = reader else {
        return Ok(captured);
    };
    let mut chunk = vec![0u8; 8192];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let room = limit.saturating_sub(captured.bytes.len());
        if read > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&chunk[..read.min(room)]);
    }
    Ok(captured)
}

fn map_status(status: std::process::ExitStatus) -> ExitStatus {
    match status.code() {
        Some(0) => ExitStatus::Success,
        Some(code) => ExitStatus::Failed(code),
        None => ExitStatus::Killed,
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        // ESRCH just means the group already exited
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            if e != nix::errno::Errno::ESRCH {
                warn!("Failed to kill process group {}: {}", pid, e);
            }
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Wait for the group leader to exit, then kill anything it left behind
/// (background jobs).
///
/// On Linux the exit is first observed with `WNOWAIT`: the leader stays an
/// unreaped zombie, so its pid and the group id cannot be reused while the
/// group is killed. Elsewhere the group is killed right after the reap.
async fn wait_leader(
    child: &mut Child,
    pid: Option<u32>,
) -> std::io::Result<std::process::ExitStatus> {
    if leader_exited(pid).await {
        kill_group(pid);
        child.wait().await
    } else {
        let status = child.wait().await?;
        kill_group(pid);
        Ok(status)
    }
}

#[cfg(target_os = "linux")]
async fn leader_exited(pid: Option<u32>) -> bool {
    use nix::errno::Errno;
    use nix::sys::wait::{waitid, Id, WaitPidFlag};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return false;
    };
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT;
    let waited = tokio::task::spawn_blocking(move || loop {
        match waitid(Id::Pid(Pid::from_raw(pid as i32)), flags) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    })
    .await;

    match waited {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("waitid on {} failed: {}", pid, e);
            false
        }
        Err(e) => {
            warn!("waitid task failed: {}", e);
            false
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn leader_exited(_pid: Option<u32>) -> bool {
    false
}

async fn join_capture(task: tokio::task::JoinHandle<std::io::Result<Captured>>) -> Captured {
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(Ok(captured))) => captured,
        Ok(Ok(Err(e))) => {
            warn!("Reading sandbox output failed: {}", e);
            Captured {
                truncated: true,
                ..Default::default()
            }
        }
        Ok(Err(e)) => {
            warn!("Sandbox output reader panicked: {}", e);
            Captured {
                truncated: true,
                ..Default::default()
            }
        }
        Err(_) => {
            // a descendant escaped the process group and still holds the pipe
            abort.abort();
            Captured {
                truncated: true,
                ..Default::default()
            }
        }
    }
}

/// Spawn the interpreter, enforce the limits and collect the result
pub async fn run_script(
    script: ScriptCommand,
    cancel: &CancelToken,
) -> Result<ExecutionResult, SandboxError> {
    debug!(
        "running sandboxed process (program={}, args_len={})",
        script.program,
        script.args.len()
    );

    let mut command = Command::new(&script.program);
    command
        .args(&script.args)
        .current_dir(&script.cwd)
        .env_clear()
        .envs(&script.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
        program: script.program.clone(),
        source,
    })?;
    let pid = child.id();

    let stdout_task = tokio::spawn(read_capped(child.stdout.take(), script.max_output_bytes));
    let stderr_task = tokio::spawn(read_capped(child.stderr.take(), script.max_output_bytes));

    let ending = tokio::select! {
        status = wait_leader(&mut child, pid) => Ending::Exited(status.map_err(SandboxError::Io)?),
        _ = tokio::time::sleep(script.timeout) => Ending::TimedOut,
        _ = cancel.cancelled() => Ending::Cancelled,
    };

    let status = match ending {
        Ending::Exited(status) => map_status(status),
        Ending::TimedOut | Ending::Cancelled => {
            // The leader is still running, so the group id is ours
            kill_group(pid);
            let _ = child.start_kill();
            if let Err(e) = child.wait().await {
                warn!("Failed to reap sandboxed process: {}", e);
            }
            ExitStatus::Killed
        }
    };

    let (stdout, stderr) =
        futures::future::join(join_capture(stdout_task), join_capture(stderr_task)).await;
    let duration = started.elapsed();

    let killed_by_us = !matches!(ending, Ending::Exited(_));
    let result = ExecutionResult {
        status,
        stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
        truncated: stdout.truncated || stderr.truncated || killed_by_us,
        duration,
    };

    match ending {
        Ending::Exited(_) => Ok(result),
        Ending::TimedOut => Err(SandboxError::Timeout {
            limit: script.timeout,
            partial: result,
        }),
        Ending::Cancelled => Err(SandboxError::Cancelled),
    }
}
