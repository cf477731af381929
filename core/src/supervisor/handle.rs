//! Caller-facing handle for one supervised process

use super::{Entry, Registry, SharedMachine};
use crate::backend::ProcessBackend;
use crate::logging::LogEntry;
use crate::{CoreError, Result};
use schema::{ProcessSnapshot, ProcessState, UNKNOWN_RESULT_CODE};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Control interface for one process managed by a [`super::SupervisionFactory`]
///
/// Handles are cheap to clone; every clone controls the same machine.
/// Control methods validate the current state first and fail with
/// `StateError` without contacting the backend when the call is illegal.
/// Observers read the latest published snapshot and never wait.
#[derive(Clone)]
pub struct ProcessHandle {
    name: String,
    machine: SharedMachine,
    snapshots: watch::Receiver<ProcessSnapshot>,
    backend: Arc<dyn ProcessBackend>,
    registry: Arc<Registry>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.name)
            .field("snapshot", &*self.snapshots.borrow())
            .finish()
    }
}

impl ProcessHandle {
    pub(crate) fn new(
        name: &str,
        entry: Entry,
        backend: Arc<dyn ProcessBackend>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            name: name.to_string(),
            machine: entry.machine,
            snapshots: entry.snapshots,
            backend,
            registry,
        }
    }

    /// Process name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the process with the backend and start it (PENDING → STARTING)
    pub async fn start(&self) -> Result<()> {
        let mut machine = self.machine.lock().await;
        machine.check_start()?;
        self.registry.ensure_open()?;

        self.backend.add_process(machine.spec()).await?;
        machine.mark_registered();
        self.backend.start_process(&self.name).await?;
        machine.mark_started();

        info!("Process '{}' start requested", self.name);
        Ok(())
    }

    /// Ask the backend to stop the process (STARTING/RUNNING → TERMINATING)
    ///
    /// A second call fails with `StateError`, as does terminating a process
    /// that never started or has already finished.
    pub async fn terminate(&self) -> Result<()> {
        let mut machine = self.machine.lock().await;
        machine.check_terminate()?;

        self.backend.stop_process(&self.name).await?;
        machine.mark_terminating();

        info!("Process '{}' termination requested", self.name);
        Ok(())
    }

    /// Withdraw a request that was never started (PENDING → TERMINATED)
    pub async fn cancel_request(&self) -> Result<()> {
        let mut machine = self.machine.lock().await;
        machine.check_cancel()?;
        machine.mark_cancelled();

        info!("Process '{}' request cancelled", self.name);
        Ok(())
    }

    /// Replace the running process with a new one (RUNNING → STARTING)
    ///
    /// The machine returns to RUNNING once a poll observes a pid different
    /// from the one live before the restart.
    pub async fn restart(&self) -> Result<()> {
        let mut machine = self.machine.lock().await;
        machine.check_restart()?;
        self.registry.ensure_open()?;

        self.backend.restart_process(&self.name).await?;
        machine.mark_restarting();

        info!("Process '{}' restart requested", self.name);
        Ok(())
    }

    /// Remove backend bookkeeping for a finished process and drop it from the factory
    pub async fn cleanup(&self) -> Result<()> {
        let mut machine = self.machine.lock().await;
        machine.check_cleanup()?;

        if machine.is_registered() {
            match self.backend.remove_process(&self.name).await {
                Ok(()) => {}
                Err(CoreError::UnknownProcess(_)) => {
                    debug!("Process '{}' was already unknown to the backend", self.name);
                }
                Err(e) => return Err(e),
            }
        }
        machine.mark_cleaned_up();
        self.registry.remove(&self.name);

        debug!("Process '{}' cleaned up", self.name);
        Ok(())
    }

    /// Register the state-change callback, replacing any previous one
    ///
    /// `f` runs inline, once per transition, with the new state and `arg`.
    pub async fn set_state_change_callback<F, A>(&self, f: F, arg: A)
    where
        F: Fn(ProcessState, &A) + Send + Sync + 'static,
        A: Send + Sync + 'static,
    {
        self.machine.lock().await.set_callback(f, arg);
    }

    /// Remove the state-change callback
    pub async fn clear_state_change_callback(&self) {
        self.machine.lock().await.clear_callback();
    }

    /// Current state
    pub fn state(&self) -> ProcessState {
        self.snapshots.borrow().state
    }

    /// Whether the process reached EXITED, TERMINATED or FAILED
    pub fn is_done(&self) -> bool {
        self.snapshots.borrow().is_done()
    }

    /// Result code of the finished process
    ///
    /// Exit status, `128 + signal` for a signal death, or
    /// [`UNKNOWN_RESULT_CODE`] if none was ever observed. Fails with
    /// `StateError` until the process is done.
    pub fn result_code(&self) -> Result<i32> {
        let snapshot = *self.snapshots.borrow();
        if !snapshot.is_done() {
            return Err(CoreError::StateError(format!(
                "process '{}' is {}, result code is only defined once done",
                self.name, snapshot.state
            )));
        }
        Ok(snapshot.result_code.unwrap_or(UNKNOWN_RESULT_CODE))
    }

    /// Last observed OS pid, 0 if none yet
    pub fn pid(&self) -> u32 {
        self.snapshots.borrow().pid
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> ProcessSnapshot {
        *self.snapshots.borrow()
    }

    /// Receiver that sees every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<ProcessSnapshot> {
        self.snapshots.clone()
    }

    /// Output captured by the backend for this process
    pub async fn read_log(&self) -> Result<Vec<LogEntry>> {
        if !self.machine.lock().await.is_registered() {
            return Ok(Vec::new());
        }
        self.backend.read_log(&self.name).await
    }
}
