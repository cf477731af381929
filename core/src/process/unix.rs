//! Unix process management with safe spawn/kill using process groups
//!
//! Every program is spawned as a session leader via `setsid()`, so its pid is
//! also its process group id. Signals go to the whole group, which takes down
//! any children the program forked as well.
//!
//! - SIGTERM is used for graceful termination, SIGKILL for forceful termination
//! - `ESRCH`/`EPERM` while signalling mean the group is already gone and are not errors
//! - Death by signal `s` is reported as result code `128 + s`

// Allow unsafe code for this module since process management requires libc::setsid() calls
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use schema::ProcessSpec;
#[allow(unused_imports)]
use std::os::unix::process::CommandExt;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, error, warn};

/// How long to wait for a group to disappear after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// A child process that leads its own process group
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    child: Child,
    /// Held open so programs that read stdin (e.g. `cat`) keep running
    stdin: Option<ChildStdin>,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Get the process group ID (same as PID for session leaders)
    pub fn pgid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::ProcessWait(format!("Failed to wait for process {}: {}", self.pid, e))
        })
    }

    /// Check for exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().map_err(|e| {
            CoreError::ProcessWait(format!(
                "Failed to try_wait for process {}: {}",
                self.pid, e
            ))
        })
    }

    /// Take the stdout handle for async reading, if available
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for async reading, if available
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Close the program's stdin
    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }
}

/// Spawn `cmd args...` in its own process group with inherited cwd and environment
///
/// ## Example
///
/// ```rust,no_run
/// # async fn demo() -> pidantic_core::Result<()> {
/// use pidantic_core::process::unix::spawn;
///
/// let child = spawn("echo", &["hello", "world"])?;
/// println!("Spawned process with PID: {}", child.pid());
/// # Ok(())
/// # }
/// ```
pub fn spawn(cmd: &str, args: &[&str]) -> Result<ChildProcess> {
    let mut command = Command::new(cmd);
    command.args(args);
    spawn_command(cmd, command)
}

/// Spawn the program described by `spec` in its own process group
///
/// The command string is split on whitespace; the working directory and extra
/// environment come from the spec.
pub fn spawn_spec(spec: &ProcessSpec) -> Result<ChildProcess> {
    let (program, args) = spec.program_and_args().ok_or_else(|| {
        CoreError::ProcessSpawn(format!("Process '{}' has an empty command", spec.name))
    })?;

    let mut command = Command::new(program);
    command.args(&args);
    command.current_dir(&spec.directory);
    command.envs(&spec.environment);
    spawn_command(program, command)
}

fn spawn_command(cmd: &str, mut command: Command) -> Result<ChildProcess> {
    debug!("Spawning process: {:?}", command);

    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    // Safety: setsid() is async-signal-safe and appropriate for use in pre_exec
    #[deny(unsafe_op_in_unsafe_fn)]
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = command.spawn().map_err(|e| {
        error!("Failed to spawn process '{}': {}", cmd, e);
        CoreError::ProcessSpawn(format!("Failed to spawn '{}': {}", cmd, e))
    })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::ProcessSpawn("Spawned child did not have a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    let stdin = child.stdin.take();
    debug!("Spawned process {} in new process group", pid);

    Ok(ChildProcess { pid, child, stdin })
}

fn signal_group(child: &ChildProcess, signal: Signal) -> Result<()> {
    debug!("Sending {} to process group {}", signal, child.pid);

    match killpg(child.pid, signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => {
            debug!("Process group {} already exited", child.pid);
            Ok(())
        }
        Err(nix::errno::Errno::EPERM) => {
            debug!(
                "Permission denied signaling process group {} (likely already exited)",
                child.pid
            );
            Ok(())
        }
        Err(e) => {
            error!("Failed to send {} to process group {}: {}", signal, child.pid, e);
            Err(CoreError::ProcessSignal(format!(
                "Failed to send {} to process group {}: {}",
                signal, child.pid, e
            )))
        }
    }
}

/// Send SIGTERM to the process group
pub fn signal_term_group(child: &ChildProcess) -> Result<()> {
    signal_group(child, Signal::SIGTERM)
}

/// Send SIGKILL to the process group
pub fn signal_kill_group(child: &ChildProcess) -> Result<()> {
    signal_group(child, Signal::SIGKILL)
}

/// SIGTERM the group, wait up to `timeout`, then SIGKILL and wait again
pub async fn terminate_group(child: &mut ChildProcess, timeout: Duration) -> Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    signal_term_group(child)?;
    if let Ok(status) = tokio::time::timeout(timeout, child.wait()).await {
        return status;
    }

    warn!(
        "Process {} did not exit within {:?} of SIGTERM, using SIGKILL",
        child.pid, timeout
    );
    signal_kill_group(child)?;

    match tokio::time::timeout(KILL_WAIT, child.wait()).await {
        Ok(status) => status,
        Err(_) => Err(CoreError::ProcessWait(format!(
            "Process {} did not exit even after SIGKILL within {:?}",
            child.pid, KILL_WAIT
        ))),
    }
}

/// Result code for an exit status: the exit code, or `128 + signal`
pub fn result_code(status: &ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => schema::UNKNOWN_RESULT_CODE,
    }
}
