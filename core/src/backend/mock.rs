//! Scriptable in-memory backend for testing
//!
//! [`MockBackend`] keeps a table of program statuses that tests drive
//! directly. Commands behave like a well-behaved daemon:
//!
//! - `start_process` puts the program in `Running` with a fresh pid
//! - `stop_process` puts a live program in `Stopping`; the test decides when
//!   it actually dies with [`MockBackend::finish_stop`] or [`MockBackend::exit`]
//! - `restart_process` gives the program a new pid and leaves it `Running`
//!
//! Failures can be injected per operation with [`MockBackend::fail_next`],
//! and every call is recorded for later inspection.

use super::{BackendCall, ProcessBackend};
use crate::logging::{LogEntry, LogRing};
use crate::{CoreError, Result};
use async_trait::async_trait;
use schema::{BackendState, BackendStatus, LogStream, ProcessSpec};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Backend operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    /// `get_all_state`
    GetAllState,
    /// `add_process`
    Add,
    /// `start_process`
    Start,
    /// `stop_process`
    Stop,
    /// `restart_process`
    Restart,
    /// `remove_process`
    Remove,
    /// `shutdown`
    Shutdown,
}

struct MockProgram {
    spec: ProcessSpec,
    status: BackendStatus,
    hidden: bool,
    log: LogRing,
}

#[derive(Default)]
struct MockState {
    programs: BTreeMap<String, MockProgram>,
    calls: Vec<BackendCall>,
    fail_next: HashSet<BackendOp>,
    last_pid: u32,
    shut_down: bool,
}

impl MockState {
    fn next_pid(&mut self) -> u32 {
        self.last_pid += 1;
        self.last_pid
    }

    fn take_failure(&mut self, op: BackendOp) -> Result<()> {
        if self.fail_next.remove(&op) {
            return Err(CoreError::BackendError(format!("injected {:?} failure", op)));
        }
        Ok(())
    }

    fn program(&mut self, name: &str) -> Result<&mut MockProgram> {
        self.programs
            .get_mut(name)
            .ok_or_else(|| CoreError::UnknownProcess(name.to_string()))
    }
}

/// Scriptable backend with a call log
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create an empty backend; pids are handed out from 1000 upwards
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                last_pid: 999,
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut BackendStatus)) {
        if let Some(program) = self.lock().programs.get_mut(name) {
            f(&mut program.status);
        }
    }

    /// Make the next call of `op` fail with a backend error
    pub fn fail_next(&self, op: BackendOp) {
        self.lock().fail_next.insert(op);
    }

    /// All calls recorded so far
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Number of batched status queries served
    pub fn status_queries(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, BackendCall::GetAllState))
            .count()
    }

    /// Current status of a program
    pub fn status(&self, name: &str) -> Option<BackendStatus> {
        self.lock().programs.get(name).map(|p| p.status.clone())
    }

    /// Whether the program is registered
    pub fn contains(&self, name: &str) -> bool {
        self.lock().programs.contains_key(name)
    }

    /// Names of programs currently in a live state
    pub fn live_programs(&self) -> Vec<String> {
        self.lock()
            .programs
            .iter()
            .filter(|(_, p)| !p.status.state.is_gone())
            .filter(|(_, p)| p.status.state != BackendState::Unknown)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Override a program's state
    pub fn set_state(&self, name: &str, state: BackendState) {
        self.update(name, |s| s.state = state);
    }

    /// The program ends on its own with `code`
    pub fn exit(&self, name: &str, code: i32) {
        self.update(name, |s| {
            s.state = BackendState::Exited;
            s.result_code = Some(code);
        });
    }

    /// A requested stop completes with `code`
    pub fn finish_stop(&self, name: &str, code: i32) {
        self.update(name, |s| {
            s.state = BackendState::Stopped;
            s.result_code = Some(code);
        });
    }

    /// The program cannot be spawned
    pub fn fail_spawn(&self, name: &str, code: Option<i32>) {
        self.update(name, |s| {
            s.state = BackendState::Fatal;
            s.pid = 0;
            s.result_code = code;
        });
    }

    /// Leave the program out of status batches until shown again
    pub fn hide(&self, name: &str, hidden: bool) {
        if let Some(program) = self.lock().programs.get_mut(name) {
            program.hidden = hidden;
        }
    }

    /// Append a captured output line for a program
    pub fn push_log(&self, name: &str, stream: LogStream, line: &str) {
        if let Some(program) = self.lock().programs.get_mut(name) {
            program.log.push(LogEntry::new(stream, line));
        }
    }

    /// Spec a program was registered with
    pub fn spec(&self, name: &str) -> Option<ProcessSpec> {
        self.lock().programs.get(name).map(|p| p.spec.clone())
    }
}

#[async_trait]
impl ProcessBackend for MockBackend {
    async fn get_all_state(&self) -> Result<Vec<BackendStatus>> {
        let mut state = self.lock();
        state.calls.push(BackendCall::GetAllState);
        state.take_failure(BackendOp::GetAllState)?;
        Ok(state
            .programs
            .values()
            .filter(|p| !p.hidden)
            .map(|p| p.status.clone())
            .collect())
    }

    async fn add_process(&self, spec: &ProcessSpec) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(BackendCall::Add {
            name: spec.name.clone(),
        });
        state.take_failure(BackendOp::Add)?;
        if state.shut_down {
            return Err(CoreError::BackendError("backend has been shut down".to_string()));
        }

        if let Some(existing) = state.programs.get(&spec.name) {
            if existing.spec == *spec {
                return Ok(());
            }
            return Err(CoreError::BackendError(format!(
                "program '{}' is already registered with a different definition",
                spec.name
            )));
        }

        debug!("Mock backend registering '{}'", spec.name);
        state.programs.insert(
            spec.name.clone(),
            MockProgram {
                spec: spec.clone(),
                status: BackendStatus::new(&spec.name, BackendState::Stopped),
                hidden: false,
                log: LogRing::new(64),
            },
        );
        Ok(())
    }

    async fn start_process(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(BackendCall::Start {
            name: name.to_string(),
        });
        state.take_failure(BackendOp::Start)?;
        let pid = state.next_pid();
        let program = state.program(name)?;
        if matches!(
            program.status.state,
            BackendState::Running | BackendState::Starting | BackendState::Stopping
        ) {
            return Err(CoreError::BackendError(format!(
                "program '{}' is already started",
                name
            )));
        }
        program.status = BackendStatus::new(name, BackendState::Running).with_pid(pid);
        Ok(())
    }

    async fn stop_process(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(BackendCall::Stop {
            name: name.to_string(),
        });
        state.take_failure(BackendOp::Stop)?;
        let program = state.program(name)?;
        if matches!(
            program.status.state,
            BackendState::Running | BackendState::Starting | BackendState::Backoff
        ) {
            program.status.state = BackendState::Stopping;
        }
        Ok(())
    }

    async fn restart_process(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(BackendCall::Restart {
            name: name.to_string(),
        });
        state.take_failure(BackendOp::Restart)?;
        let pid = state.next_pid();
        let program = state.program(name)?;
        program.status = BackendStatus::new(name, BackendState::Running).with_pid(pid);
        Ok(())
    }

    async fn remove_process(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(BackendCall::Remove {
            name: name.to_string(),
        });
        state.take_failure(BackendOp::Remove)?;
        let program = state.program(name)?;
        if matches!(
            program.status.state,
            BackendState::Running | BackendState::Starting | BackendState::Stopping
        ) {
            return Err(CoreError::BackendError(format!(
                "program '{}' is still running",
                name
            )));
        }
        state.programs.remove(name);
        Ok(())
    }

    async fn read_log(&self, name: &str) -> Result<Vec<LogEntry>> {
        let mut state = self.lock();
        state.calls.push(BackendCall::ReadLog {
            name: name.to_string(),
        });
        let program = state.program(name)?;
        Ok(program.log.snapshot().1)
    }

    async fn shutdown(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(BackendCall::Shutdown);
        state.take_failure(BackendOp::Shutdown)?;
        state.shut_down = true;
        for program in state.programs.values_mut() {
            if !program.status.state.is_gone() {
                program.status.state = BackendState::Stopped;
                program.status.result_code.get_or_insert(128 + 15);
            }
        }
        Ok(())
    }
}
