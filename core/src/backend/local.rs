//! Local Unix backend: runs programs on this host as process-group leaders
//!
//! Each registered program gets a JSON definition file in the backend's state
//! directory (written atomically via temp file + rename) that lives until the
//! program is removed. Live programs are tracked in memory:
//!
//! - stdin is held open on a pipe, stdout/stderr are read line by line into a
//!   bounded [`LogRing`] per program
//! - status is computed with a non-blocking `try_wait` on every batched query
//! - `stop_process` sends SIGTERM to the group and returns; if the group is
//!   still alive once the program's graceful timeout has passed, the next
//!   status query escalates to SIGKILL
//! - `restart_process` is a stop with a relaunch queued: the status query that
//!   reaps the old process spawns the new one
//! - a program that cannot be spawned is reported as `FATAL` with code 127
//!
//! No call waits on a process while holding the program table, except
//! `shutdown`, which releases it while the groups wind down.

use super::ProcessBackend;
use crate::config::FactoryConfig;
use crate::logging::{LogEntry, LogRing};
use crate::process::unix::{self, ChildProcess};
use crate::{CoreError, Result};
use async_trait::async_trait;
use schema::{BackendState, BackendStatus, LogStream, ProcessSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Program definition file format version
pub const PROGRAM_FILE_VERSION: u32 = 1;

/// Result code reported for a program that could not be spawned
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Upper bound on how long shutdown waits for any one program
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// On-disk definition of a registered program
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgramFile {
    /// Format version
    pub version: u32,
    /// RFC3339 registration time
    pub registered_at: String,
    /// The registered spec
    pub spec: ProcessSpec,
}

struct Program {
    spec: ProcessSpec,
    child: Option<ChildProcess>,
    pid: u32,
    state: BackendState,
    result_code: Option<i32>,
    /// Set while a requested stop is in flight
    stop_deadline: Option<Instant>,
    killed: bool,
    /// Launch again once the current process has been reaped
    restart_pending: bool,
    log: Arc<StdMutex<LogRing>>,
    readers: Vec<JoinHandle<()>>,
}

impl Program {
    fn new(spec: ProcessSpec, log_capacity: usize) -> Self {
        Self {
            spec,
            child: None,
            pid: 0,
            state: BackendState::Stopped,
            result_code: None,
            stop_deadline: None,
            killed: false,
            restart_pending: false,
            log: Arc::new(StdMutex::new(LogRing::new(log_capacity))),
            readers: Vec::new(),
        }
    }

    fn status(&self) -> BackendStatus {
        BackendStatus {
            name: self.spec.name.clone(),
            pid: self.pid,
            state: self.state,
            result_code: self.result_code,
        }
    }

    fn is_alive(&self) -> bool {
        self.child.is_some()
    }

    /// Reap the child if it has exited and escalate overdue stops
    fn refresh(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                let code = unix::result_code(&status);
                self.state = if self.stop_deadline.is_some() {
                    BackendState::Stopped
                } else {
                    BackendState::Exited
                };
                self.result_code = Some(code);
                self.stop_deadline = None;
                self.child = None;
                debug!(
                    "Program '{}' (pid {}) ended with code {}",
                    self.spec.name, self.pid, code
                );
                if self.restart_pending {
                    self.restart_pending = false;
                    self.launch();
                }
            }
            Ok(None) => {
                let overdue = self.stop_deadline.is_some_and(|d| Instant::now() >= d);
                if overdue && !self.killed {
                    warn!(
                        "Program '{}' (pid {}) ignored SIGTERM for {:?}, sending SIGKILL",
                        self.spec.name,
                        self.pid,
                        self.spec.graceful_timeout()
                    );
                    if let Err(e) = unix::signal_kill_group(child) {
                        warn!("Failed to kill program '{}': {}", self.spec.name, e);
                    }
                    self.killed = true;
                }
            }
            Err(e) => {
                warn!("Failed to check program '{}': {}", self.spec.name, e);
                self.state = BackendState::Unknown;
            }
        }
    }

    /// Spawn a fresh process for this program
    fn launch(&mut self) {
        self.readers.retain(|h| !h.is_finished());
        self.stop_deadline = None;
        self.killed = false;

        match unix::spawn_spec(&self.spec) {
            Ok(mut child) => {
                self.pid = child.pid();
                self.state = BackendState::Running;
                self.result_code = None;
                if let Some(stdout) = child.take_stdout() {
                    self.readers.push(spawn_log_reader(
                        self.spec.name.clone(),
                        stdout,
                        LogStream::Stdout,
                        self.log.clone(),
                    ));
                }
                if let Some(stderr) = child.take_stderr() {
                    self.readers.push(spawn_log_reader(
                        self.spec.name.clone(),
                        stderr,
                        LogStream::Stderr,
                        self.log.clone(),
                    ));
                }
                info!("Program '{}' started with pid {}", self.spec.name, self.pid);
                self.child = Some(child);
            }
            Err(e) => {
                warn!("Program '{}' could not be spawned: {}", self.spec.name, e);
                self.pid = 0;
                self.state = BackendState::Fatal;
                self.result_code = Some(SPAWN_FAILURE_CODE);
                lock_ring(&self.log).push(LogEntry::new(LogStream::Stderr, e.to_string()));
            }
        }
    }

    /// Begin a graceful stop; no-op if nothing is running or a stop is underway
    fn request_stop(&mut self) -> Result<()> {
        if self.stop_deadline.is_some() {
            return Ok(());
        }
        let Some(child) = self.child.as_ref() else {
            return Ok(());
        };
        unix::signal_term_group(child)?;
        self.state = BackendState::Stopping;
        self.stop_deadline = Some(Instant::now() + self.spec.graceful_timeout());
        Ok(())
    }

    /// Record how a blocking stop of `child` ended
    ///
    /// Returns false if the process may still be alive; the child is kept so
    /// it can be killed on drop.
    fn settle_stop(&mut self, child: ChildProcess, outcome: Result<ExitStatus>) -> bool {
        self.stop_deadline = None;
        match outcome {
            Ok(status) => {
                self.result_code = Some(unix::result_code(&status));
                self.state = BackendState::Stopped;
                true
            }
            Err(e) => {
                warn!("Failed to stop program '{}': {}", self.spec.name, e);
                self.state = BackendState::Unknown;
                self.child = Some(child);
                false
            }
        }
    }

    fn abort_readers(&mut self) {
        for handle in self.readers.drain(..) {
            handle.abort();
        }
    }
}

fn lock_ring(ring: &StdMutex<LogRing>) -> MutexGuard<'_, LogRing> {
    ring.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read lines from a child stream into the program's log ring until EOF
fn spawn_log_reader<R>(
    name: String,
    reader: R,
    stream: LogStream,
    ring: Arc<StdMutex<LogRing>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    lock_ring(&ring).push(LogEntry::new(stream, line));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Error reading {:?} of program '{}': {}", stream, name, e);
                    break;
                }
            }
        }
    })
}

/// Backend that runs programs as local process groups
pub struct LocalBackend {
    state_dir: PathBuf,
    log_capacity: usize,
    programs: Mutex<BTreeMap<String, Program>>,
    shut_down: AtomicBool,
}

impl LocalBackend {
    /// Create a backend keeping program files under `state_dir`
    pub fn new(state_dir: impl Into<PathBuf>, log_capacity: usize) -> Result<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir).map_err(|e| {
            CoreError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to create state dir {}: {}", state_dir.display(), e),
            ))
        })?;
        debug!("Local backend using state dir {}", state_dir.display());

        Ok(Self {
            state_dir,
            log_capacity,
            programs: Mutex::new(BTreeMap::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Create a backend from factory settings
    pub fn from_config(config: &FactoryConfig) -> Result<Self> {
        Self::new(&config.state_dir, config.log_capacity)
    }

    /// Directory holding program definition files
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Path of the definition file for `name`
    pub fn program_file(&self, name: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", name))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CoreError::BackendError(
                "backend has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    fn write_program_file(&self, spec: &ProcessSpec) -> Result<()> {
        let path = self.program_file(&spec.name);
        let tmp_path = path.with_extension("json.tmp");
        let file = ProgramFile {
            version: PROGRAM_FILE_VERSION,
            registered_at: schema::current_timestamp(),
            spec: spec.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| {
                    CoreError::IoError(std::io::Error::new(
                        e.kind(),
                        format!("Failed to open {}: {}", tmp_path.display(), e),
                    ))
                })?;
            f.write_all(&json)?;
            f.flush()?;
            let _ = f.sync_all();
        }

        fs::rename(&tmp_path, &path).map_err(|e| {
            CoreError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to replace {}: {}", path.display(), e),
            ))
        })?;

        if let Ok(dir) = File::open(&self.state_dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn remove_program_file(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.program_file(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Read a program definition file
pub fn load_program_file(path: impl AsRef<Path>) -> Result<ProgramFile> {
    let data = fs::read_to_string(path.as_ref())?;
    let file: ProgramFile = serde_json::from_str(&data)?;
    if file.version != PROGRAM_FILE_VERSION {
        return Err(CoreError::ValidationError(format!(
            "Unsupported program file version {} (expected {})",
            file.version, PROGRAM_FILE_VERSION
        )));
    }
    Ok(file)
}

fn unknown(name: &str) -> CoreError {
    CoreError::UnknownProcess(name.to_string())
}

fn stop_failures(failed: &[String]) -> Result<()> {
    if failed.is_empty() {
        return Ok(());
    }
    Err(CoreError::BackendError(format!(
        "programs may still be running after shutdown: {}",
        failed.join(", ")
    )))
}

#[async_trait]
impl ProcessBackend for LocalBackend {
    async fn get_all_state(&self) -> Result<Vec<BackendStatus>> {
        let mut programs = self.programs.lock().await;
        Ok(programs
            .values_mut()
            .map(|program| {
                program.refresh();
                program.status()
            })
            .collect())
    }

    async fn add_process(&self, spec: &ProcessSpec) -> Result<()> {
        self.ensure_open()?;
        let mut programs = self.programs.lock().await;

        if let Some(existing) = programs.get_mut(&spec.name) {
            if existing.spec == *spec {
                return Ok(());
            }
            existing.refresh();
            if existing.is_alive() {
                return Err(CoreError::BackendError(format!(
                    "program '{}' is running and cannot be redefined",
                    spec.name
                )));
            }
        }

        self.write_program_file(spec)?;
        programs.insert(spec.name.clone(), Program::new(spec.clone(), self.log_capacity));
        debug!("Registered program '{}'", spec.name);
        Ok(())
    }

    async fn start_process(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let mut programs = self.programs.lock().await;
        let program = programs.get_mut(name).ok_or_else(|| unknown(name))?;

        program.refresh();
        if program.is_alive() {
            return Err(CoreError::BackendError(format!(
                "program '{}' is already started",
                name
            )));
        }
        program.launch();
        Ok(())
    }

    async fn stop_process(&self, name: &str) -> Result<()> {
        let mut programs = self.programs.lock().await;
        let program = programs.get_mut(name).ok_or_else(|| unknown(name))?;

        program.refresh();
        program.restart_pending = false;
        program.request_stop()
    }

    async fn restart_process(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let mut programs = self.programs.lock().await;
        let program = programs.get_mut(name).ok_or_else(|| unknown(name))?;

        program.refresh();
        if program.is_alive() {
            program.request_stop()?;
            program.restart_pending = true;
            debug!(
                "Program '{}' will be relaunched once pid {} ends",
                name, program.pid
            );
        } else {
            program.launch();
        }
        Ok(())
    }

    async fn remove_process(&self, name: &str) -> Result<()> {
        let mut programs = self.programs.lock().await;
        let program = programs.get_mut(name).ok_or_else(|| unknown(name))?;

        program.refresh();
        if program.is_alive() {
            return Err(CoreError::BackendError(format!(
                "program '{}' is still running",
                name
            )));
        }
        if let Some(mut program) = programs.remove(name) {
            program.abort_readers();
        }
        self.remove_program_file(name)?;
        debug!("Removed program '{}'", name);
        Ok(())
    }

    async fn read_log(&self, name: &str) -> Result<Vec<LogEntry>> {
        let ring = {
            let programs = self.programs.lock().await;
            programs.get(name).ok_or_else(|| unknown(name))?.log.clone()
        };
        let entries = lock_ring(&ring).snapshot().1;
        Ok(entries)
    }

    async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // every group gets SIGTERM up front, then they are awaited together
        let mut stopping = JoinSet::new();
        {
            let mut programs = self.programs.lock().await;
            info!("Shutting down local backend ({} programs)", programs.len());
            for (name, program) in programs.iter_mut() {
                program.refresh();
                program.restart_pending = false;
                let Some(mut child) = program.child.take() else {
                    continue;
                };
                program.state = BackendState::Stopping;
                let timeout = program.spec.graceful_timeout().min(SHUTDOWN_TIMEOUT);
                let name = name.clone();
                stopping.spawn(async move {
                    let outcome = unix::terminate_group(&mut child, timeout).await;
                    (name, child, outcome)
                });
            }
        }

        let mut finished = Vec::with_capacity(stopping.len());
        let mut failed = Vec::new();
        while let Some(joined) = stopping.join_next().await {
            match joined {
                Ok(done) => finished.push(done),
                Err(e) => {
                    warn!("Stop task failed during shutdown: {}", e);
                    failed.push("<stop task>".to_string());
                }
            }
        }

        let mut programs = self.programs.lock().await;
        for (name, child, outcome) in finished {
            let stopped = match programs.get_mut(&name) {
                Some(program) => program.settle_stop(child, outcome),
                None => outcome.is_ok(),
            };
            if !stopped {
                failed.push(name);
            }
        }
        for program in programs.values_mut() {
            program.abort_readers();
        }
        stop_failures(&failed)
    }
}

impl Drop for LocalBackend {
    fn drop(&mut self) {
        for program in self.programs.get_mut().values_mut() {
            if let Some(child) = program.child.as_ref() {
                let _ = unix::signal_kill_group(child);
            }
            program.abort_readers();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_for_state(
        backend: &LocalBackend,
        name: &str,
        wanted: BackendState,
    ) -> BackendStatus {
        for _ in 0..100 {
            let statuses = backend.get_all_state().await.unwrap();
            if let Some(status) = statuses.into_iter().find(|s| s.name == name) {
                if status.state == wanted {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("program '{}' never reached {}", name, wanted);
    }

    #[tokio::test]
    async fn test_program_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), 16).unwrap();
        let spec = ProcessSpec::new("true", "true", dir.path());

        backend.add_process(&spec).await.unwrap();
        let file = load_program_file(backend.program_file("true")).unwrap();
        assert_eq!(file.spec, spec);

        backend.start_process("true").await.unwrap();
        let status = wait_for_state(&backend, "true", BackendState::Exited).await;
        assert_eq!(status.result_code, Some(0));

        backend.remove_process("true").await.unwrap();
        assert!(!backend.program_file("true").exists());
        assert!(backend.get_all_state().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), 16).unwrap();
        let spec = ProcessSpec::new("ghost", "/nonexistent/program_12345", dir.path());

        backend.add_process(&spec).await.unwrap();
        backend.start_process("ghost").await.unwrap();

        let statuses = backend.get_all_state().await.unwrap();
        assert_eq!(statuses[0].state, BackendState::Fatal);
        assert_eq!(statuses[0].result_code, Some(SPAWN_FAILURE_CODE));
        assert_eq!(statuses[0].pid, 0);

        let log = backend.read_log("ghost").await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].stream, LogStream::Stderr);
    }

    #[tokio::test]
    async fn test_stop_reports_stopped_with_signal_code() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), 16).unwrap();
        backend
            .add_process(&ProcessSpec::new("nap", "/bin/sleep 30", dir.path()))
            .await
            .unwrap();
        backend.start_process("nap").await.unwrap();
        backend.stop_process("nap").await.unwrap();

        let status = wait_for_state(&backend, "nap", BackendState::Stopped).await;
        assert_eq!(status.result_code, Some(128 + libc::SIGTERM));
    }

    /// Program that ignores SIGTERM; commands are split on whitespace, so the
    /// trap lives in a script
    fn stubborn_spec(dir: &Path, name: &str, graceful_secs: u64) -> ProcessSpec {
        let script = dir.join(format!("{}.sh", name));
        fs::write(&script, "trap '' TERM\nsleep 30\n").unwrap();
        ProcessSpec::new(name, format!("sh {}", script.display()), dir)
            .with_graceful_timeout_secs(graceful_secs)
    }

    #[tokio::test]
    async fn test_stop_escalates_to_sigkill() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), 16).unwrap();
        let spec = stubborn_spec(dir.path(), "stubborn", 1);

        backend.add_process(&spec).await.unwrap();
        backend.start_process("stubborn").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        backend.stop_process("stubborn").await.unwrap();

        let status = wait_for_state(&backend, "stubborn", BackendState::Stopped).await;
        assert_eq!(status.result_code, Some(128 + libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_restart_changes_pid_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), 16).unwrap();
        let script = dir.path().join("chatty.sh");
        fs::write(&script, "echo hello\nexec cat\n").unwrap();
        let spec = ProcessSpec::new("chatty", format!("sh {}", script.display()), dir.path());
        backend.add_process(&spec).await.unwrap();
        backend.start_process("chatty").await.unwrap();
        let first = wait_for_state(&backend, "chatty", BackendState::Running).await;

        backend.restart_process("chatty").await.unwrap();
        let second = wait_for_state(&backend, "chatty", BackendState::Running).await;
        assert_ne!(first.pid, second.pid);
        assert_ne!(second.pid, 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let log = backend.read_log("chatty").await.unwrap();
        assert!(log.iter().filter(|e| e.content == "hello").count() >= 1);

        backend.shutdown().await.unwrap();
        let statuses = backend.get_all_state().await.unwrap();
        assert_eq!(statuses[0].state, BackendState::Stopped);
        assert!(backend.start_process("chatty").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_refuses_live_program() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), 16).unwrap();
        backend
            .add_process(&ProcessSpec::new("cat", "/bin/cat", dir.path()))
            .await
            .unwrap();
        backend.start_process("cat").await.unwrap();

        assert!(matches!(
            backend.remove_process("cat").await,
            Err(CoreError::BackendError(_))
        ));
        assert!(matches!(
            backend.remove_process("missing").await,
            Err(CoreError::UnknownProcess(_))
        ));
        backend.shutdown().await.unwrap();
        backend.remove_process("cat").await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_does_not_hold_up_status_queries() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), 16).unwrap();
        backend
            .add_process(&stubborn_spec(dir.path(), "stubborn", 2))
            .await
            .unwrap();
        backend
            .add_process(&ProcessSpec::new("cat", "/bin/cat", dir.path()))
            .await
            .unwrap();
        backend.start_process("stubborn").await.unwrap();
        backend.start_process("cat").await.unwrap();
        let before = wait_for_state(&backend, "stubborn", BackendState::Running).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        backend.restart_process("stubborn").await.unwrap();
        let statuses = backend.get_all_state().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        let stubborn = statuses.iter().find(|s| s.name == "stubborn").unwrap();
        assert_eq!(stubborn.state, BackendState::Stopping);
        assert_eq!(stubborn.pid, before.pid);
        let cat = statuses.iter().find(|s| s.name == "cat").unwrap();
        assert_eq!(cat.state, BackendState::Running);

        // relaunched only after the SIGKILL escalation reaps the old group
        let after = wait_for_state(&backend, "stubborn", BackendState::Running).await;
        assert_ne!(after.pid, before.pid);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(after.result_code, None);

        backend.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_restart() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), 16).unwrap();
        backend
            .add_process(&ProcessSpec::new("nap", "/bin/sleep 30", dir.path()))
            .await
            .unwrap();
        backend.start_process("nap").await.unwrap();
        let before = wait_for_state(&backend, "nap", BackendState::Running).await;

        backend.restart_process("nap").await.unwrap();
        backend.stop_process("nap").await.unwrap();

        let status = wait_for_state(&backend, "nap", BackendState::Stopped).await;
        assert_eq!(status.pid, before.pid);
        assert_eq!(status.result_code, Some(128 + libc::SIGTERM));
    }

    #[tokio::test]
    async fn test_shutdown_stops_programs_together() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path(), 16).unwrap();
        for name in ["a", "b", "c"] {
            backend
                .add_process(&stubborn_spec(dir.path(), name, 2))
                .await
                .unwrap();
            backend.start_process(name).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        backend.shutdown().await.unwrap();
        // one graceful period plus the kill, not one per program
        assert!(started.elapsed() < Duration::from_secs(4));

        let statuses = backend.get_all_state().await.unwrap();
        assert_eq!(statuses.len(), 3);
        for status in statuses {
            assert_eq!(status.state, BackendState::Stopped);
            assert_eq!(status.result_code, Some(128 + libc::SIGKILL));
        }
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_child_and_is_reported() {
        let mut program = Program::new(ProcessSpec::new("cat", "/bin/cat", "/tmp"), 16);
        let child = unix::spawn("cat", &[]).unwrap();

        let stopped = program.settle_stop(child, Err(CoreError::ProcessWait("stuck".to_string())));
        assert!(!stopped);
        assert_eq!(program.state, BackendState::Unknown);
        assert!(program.is_alive());

        let err = stop_failures(&["cat".to_string()]).unwrap_err();
        assert!(matches!(err, CoreError::BackendError(_)));
        assert!(err.to_string().contains("cat"));
        assert!(stop_failures(&[]).is_ok());

        let mut child = program.child.take().unwrap();
        unix::signal_kill_group(&child).unwrap();
        child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_logged_while_ring_busy() {
        let mut program = Program::new(
            ProcessSpec::new("ghost", "/nonexistent/program_12345", "/tmp"),
            16,
        );
        let ring = program.log.clone();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = lock_ring(&ring);
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(100));
        });
        locked_rx.recv().unwrap();

        program.launch();
        holder.join().unwrap();

        assert_eq!(program.state, BackendState::Fatal);
        let entries = lock_ring(&program.log).snapshot().1;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stream, LogStream::Stderr);
    }
}
