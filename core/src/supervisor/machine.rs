//! Per-process state machine
//!
//! [`ProcessStateMachine`] owns one [`ProcessRecord`] and decides every state
//! change for it. It never talks to the backend itself: control operations
//! are split into a `check_*` step (synchronous validation) and a `mark_*`
//! step applied after the backend command succeeded, while [`reconcile`]
//! folds one observed [`BackendStatus`] into the machine.
//!
//! ```text
//! Pending ──start──▶ Starting ──observed──▶ Running
//!    │                  │  ▲                  │
//!  cancel           terminate └──restart──────┤
//!    ▼                  ▼                     ▼
//! Terminated ◀──── Terminating ◀──terminate── ┘
//! ```
//!
//! Every transition publishes a [`ProcessSnapshot`] on a watch channel and
//! then invokes the registered callback inline.
//!
//! [`reconcile`]: ProcessStateMachine::reconcile

use crate::{CoreError, Result};
use schema::{
    BackendState, BackendStatus, ProcessRecord, ProcessSnapshot, ProcessSpec, ProcessState,
    StateTransition, UNKNOWN_RESULT_CODE,
};
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Stored state-change callback with its argument already bound
pub type StateCallback = Box<dyn Fn(ProcessState) + Send + Sync>;

/// State machine for one supervised process
pub struct ProcessStateMachine {
    spec: ProcessSpec,
    record: ProcessRecord,
    state: ProcessState,
    /// Pid that was live when a restart was issued
    restart_from_pid: Option<u32>,
    /// The backend knows about this process
    registered: bool,
    cleaned_up: bool,
    callback: Option<StateCallback>,
    snapshot_tx: watch::Sender<ProcessSnapshot>,
}

impl fmt::Debug for ProcessStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessStateMachine")
            .field("record", &self.record)
            .field("state", &self.state)
            .field("restart_from_pid", &self.restart_from_pid)
            .field("registered", &self.registered)
            .field("cleaned_up", &self.cleaned_up)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl ProcessStateMachine {
    /// Create a machine in `Pending` together with a receiver for its snapshots
    pub fn new(spec: ProcessSpec) -> (Self, watch::Receiver<ProcessSnapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(ProcessSnapshot::pending());
        let machine = Self {
            record: ProcessRecord::from_spec(&spec),
            spec,
            state: ProcessState::Pending,
            restart_from_pid: None,
            registered: false,
            cleaned_up: false,
            callback: None,
            snapshot_tx,
        };
        (machine, snapshot_rx)
    }

    /// Process name
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The spec this machine was created from
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// Latest known record
    pub fn record(&self) -> &ProcessRecord {
        &self.record
    }

    /// Current state
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Whether the machine has reached a terminal state
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Result code of a finished process
    ///
    /// Fails with `StateError` until the machine is done. A done machine that
    /// never observed a code reports [`UNKNOWN_RESULT_CODE`].
    pub fn result_code(&self) -> Result<i32> {
        if !self.is_done() {
            return Err(CoreError::StateError(format!(
                "process '{}' is {}, result code is only defined once done",
                self.spec.name, self.state
            )));
        }
        Ok(self.record.result_code.unwrap_or(UNKNOWN_RESULT_CODE))
    }

    /// Current snapshot
    pub fn snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            state: self.state,
            pid: self.record.pid,
            result_code: self.record.result_code,
        }
    }

    /// Whether the backend has been told about this process
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Whether backend bookkeeping has already been removed
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    /// Register the state-change callback, replacing any previous one
    ///
    /// `f` is called with the new state and a reference to `arg` once per
    /// transition, before the call that caused the transition returns.
    pub fn set_callback<F, A>(&mut self, f: F, arg: A)
    where
        F: Fn(ProcessState, &A) + Send + Sync + 'static,
        A: Send + Sync + 'static,
    {
        self.callback = Some(Box::new(move |state| f(state, &arg)));
    }

    /// Drop the registered callback
    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    fn state_error(&self, reason: &str) -> CoreError {
        CoreError::StateError(format!(
            "process '{}' is {}: {}",
            self.spec.name, self.state, reason
        ))
    }

    /// Validate `start`
    pub fn check_start(&self) -> Result<()> {
        match self.state {
            ProcessState::Pending => Ok(()),
            _ => Err(self.state_error("start is only allowed once, from PENDING")),
        }
    }

    /// Validate `terminate`
    pub fn check_terminate(&self) -> Result<()> {
        match self.state {
            ProcessState::Starting | ProcessState::Running => Ok(()),
            ProcessState::Pending => Err(self.state_error(
                "process was never started, use cancel_request to withdraw it",
            )),
            ProcessState::Terminating => Err(self.state_error("already terminating")),
            _ => Err(self.state_error("process already done")),
        }
    }

    /// Validate `cancel_request`
    pub fn check_cancel(&self) -> Result<()> {
        match self.state {
            ProcessState::Pending => Ok(()),
            _ => Err(self.state_error("only a PENDING request can be cancelled")),
        }
    }

    /// Validate `restart`
    pub fn check_restart(&self) -> Result<()> {
        match self.state {
            ProcessState::Running => Ok(()),
            _ => Err(self.state_error("restart requires a RUNNING process")),
        }
    }

    /// Validate `cleanup`
    pub fn check_cleanup(&self) -> Result<()> {
        if !self.is_done() {
            return Err(self.state_error("process is not done"));
        }
        if self.cleaned_up {
            return Err(self.state_error("already cleaned up"));
        }
        Ok(())
    }

    /// The backend accepted the process definition
    pub fn mark_registered(&mut self) {
        self.registered = true;
    }

    /// The backend accepted the start command
    pub fn mark_started(&mut self) -> StateTransition {
        self.registered = true;
        self.transition_to(ProcessState::Starting)
    }

    /// The backend accepted the stop command
    pub fn mark_terminating(&mut self) -> StateTransition {
        self.transition_to(ProcessState::Terminating)
    }

    /// The request was withdrawn before it reached the backend
    pub fn mark_cancelled(&mut self) -> StateTransition {
        self.transition_to(ProcessState::Terminated)
    }

    /// The backend accepted the restart command
    pub fn mark_restarting(&mut self) -> StateTransition {
        self.restart_from_pid = Some(self.record.pid);
        self.transition_to(ProcessState::Starting)
    }

    /// Backend bookkeeping was removed
    pub fn mark_cleaned_up(&mut self) {
        self.cleaned_up = true;
        self.registered = false;
    }

    /// Give up on a terminating process that can no longer be observed
    pub fn mark_abandoned(&mut self) -> Option<StateTransition> {
        if self.state != ProcessState::Terminating {
            return None;
        }
        warn!(
            "Process '{}' could not be observed ending, marking it TERMINATED",
            self.spec.name
        );
        Some(self.transition_to(ProcessState::Terminated))
    }

    /// Fold one observed backend status into the machine
    ///
    /// `None` means the backend did not report this process at all. Returns
    /// the transition applied, if any. Pending and terminal machines ignore
    /// every observation.
    pub fn reconcile(&mut self, status: Option<&BackendStatus>) -> Option<StateTransition> {
        if self.state == ProcessState::Pending || self.is_done() {
            return None;
        }

        let Some(status) = status else {
            if self.state == ProcessState::Terminating {
                debug!(
                    "Process '{}' vanished from the backend while terminating",
                    self.spec.name
                );
                return Some(self.transition_to(ProcessState::Terminated));
            }
            return None;
        };

        self.record.raw_backend_state = status.state;
        let stale = self.restart_from_pid.is_some_and(|pid| pid == status.pid);

        match (self.state, status.state) {
            (ProcessState::Starting, BackendState::Running) if !stale => {
                self.record.pid = status.pid;
                self.restart_from_pid = None;
                Some(self.transition_to(ProcessState::Running))
            }
            (ProcessState::Starting, BackendState::Exited) if !stale => {
                self.finish(status, ProcessState::Exited)
            }
            (ProcessState::Starting, BackendState::Stopped)
                if !stale && status.result_code.is_some() =>
            {
                self.finish(status, ProcessState::Exited)
            }
            (ProcessState::Starting | ProcessState::Running, BackendState::Fatal) => {
                self.finish(status, ProcessState::Failed)
            }
            (ProcessState::Running, BackendState::Exited | BackendState::Stopped) => {
                self.finish(status, ProcessState::Exited)
            }
            (ProcessState::Running, BackendState::Running)
                if status.pid != 0 && status.pid != self.record.pid =>
            {
                info!(
                    "Process '{}' pid changed {} -> {} without a restart",
                    self.spec.name, self.record.pid, status.pid
                );
                self.record.pid = status.pid;
                self.publish();
                None
            }
            (
                ProcessState::Terminating,
                BackendState::Exited | BackendState::Stopped | BackendState::Fatal,
            ) => self.finish(status, ProcessState::Terminated),
            _ => None,
        }
    }

    fn finish(&mut self, status: &BackendStatus, to: ProcessState) -> Option<StateTransition> {
        if status.pid != 0 {
            self.record.pid = status.pid;
        }
        self.record.result_code = status.result_code;
        self.restart_from_pid = None;
        Some(self.transition_to(to))
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn transition_to(&mut self, to: ProcessState) -> StateTransition {
        let from = self.state;
        self.state = to;
        debug!("Process '{}' {} -> {}", self.spec.name, from, to);

        self.publish();
        if let Some(callback) = &self.callback {
            callback(to);
        }

        StateTransition {
            name: self.spec.name.clone(),
            from,
            to,
        }
    }
}
