//! Factory owning the backend and driving reconciliation

use super::{Entry, ProcessHandle, ProcessStateMachine, Registry};
use crate::backend::ProcessBackend;
use crate::config::{validate_spec, FactoryConfig};
use crate::{CoreError, Result};
use schema::{BackendStatus, ProcessSpec, ProcessState, StateTransition};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Transitions applied, in registry order
    pub transitions: Vec<StateTransition>,
    /// Live processes the backend did not report
    pub missing: Vec<String>,
    /// Processes skipped because a control call held them
    pub busy: Vec<String>,
}

impl PollReport {
    /// Whether the pass changed nothing and saw nothing unusual
    pub fn is_quiet(&self) -> bool {
        self.transitions.is_empty() && self.missing.is_empty() && self.busy.is_empty()
    }
}

/// Owns a backend and every process created through it
///
/// ## Example
///
/// ```rust,no_run
/// # async fn demo() -> pidantic_core::Result<()> {
/// use pidantic_core::{FactoryConfig, SupervisionFactory};
/// use std::time::Duration;
///
/// let factory = SupervisionFactory::local(&FactoryConfig::default())?;
/// let sleeper = factory.get_pidantic_cmd("/bin/sleep 1", "sleeper", "/tmp")?;
/// sleeper.start().await?;
/// while !sleeper.is_done() {
///     factory.poll().await?;
///     tokio::time::sleep(Duration::from_millis(100)).await;
/// }
/// println!("exit code {}", sleeper.result_code()?);
/// factory.terminate().await?;
/// # Ok(())
/// # }
/// ```
pub struct SupervisionFactory {
    name: String,
    graceful_timeout_secs: u64,
    backend: Arc<dyn ProcessBackend>,
    registry: Arc<Registry>,
    /// Serializes poll and terminate
    driver: Mutex<()>,
}

impl fmt::Debug for SupervisionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisionFactory")
            .field("name", &self.name)
            .field("processes", &self.registry.names())
            .field("closed", &self.registry.is_closed())
            .finish()
    }
}

impl SupervisionFactory {
    /// Create a factory driving `backend`
    pub fn new(backend: Arc<dyn ProcessBackend>, config: &FactoryConfig) -> Result<Self> {
        config.validate()?;
        info!("Creating supervision factory '{}'", config.name);

        Ok(Self {
            name: config.name.clone(),
            graceful_timeout_secs: config.graceful_timeout_secs,
            backend,
            registry: Arc::new(Registry::default()),
            driver: Mutex::new(()),
        })
    }

    /// Create a factory running programs on this host
    #[cfg(unix)]
    pub fn local(config: &FactoryConfig) -> Result<Self> {
        config.validate()?;
        let backend = crate::backend::LocalBackend::from_config(config)?;
        Self::new(Arc::new(backend), config)
    }

    /// Factory name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend shared by all processes of this factory
    pub fn backend(&self) -> &Arc<dyn ProcessBackend> {
        &self.backend
    }

    /// Create a PENDING process for `spec`
    ///
    /// Fails with `DuplicateName` if the name is already managed here.
    pub fn get_pidantic(&self, spec: ProcessSpec) -> Result<ProcessHandle> {
        self.registry.ensure_open()?;
        validate_spec(&spec, "spec")?;

        let name = spec.name.clone();
        let (machine, snapshots) = ProcessStateMachine::new(spec);
        let entry = Entry {
            machine: Arc::new(Mutex::new(machine)),
            snapshots,
        };
        self.registry.insert(&name, entry.clone())?;

        debug!("Factory '{}' created process '{}'", self.name, name);
        Ok(ProcessHandle::new(
            &name,
            entry,
            self.backend.clone(),
            self.registry.clone(),
        ))
    }

    /// Create a PENDING process from a command line, name and working directory
    pub fn get_pidantic_cmd(
        &self,
        command: impl Into<String>,
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> Result<ProcessHandle> {
        let spec = ProcessSpec::new(name, command, directory)
            .with_graceful_timeout_secs(self.graceful_timeout_secs);
        self.get_pidantic(spec)
    }

    /// Handle for a process that is still managed here
    pub fn handle(&self, name: &str) -> Option<ProcessHandle> {
        self.registry
            .get(name)
            .map(|entry| ProcessHandle::new(name, entry, self.backend.clone(), self.registry.clone()))
    }

    /// Names of managed processes, sorted
    pub fn process_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Number of managed processes
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Whether no processes are managed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every managed process is done
    pub fn all_done(&self) -> bool {
        self.registry
            .entries()
            .iter()
            .all(|(_, entry)| entry.snapshots.borrow().is_done())
    }

    /// Whether [`terminate`](Self::terminate) has been called
    pub fn is_closed(&self) -> bool {
        self.registry.is_closed()
    }

    /// Run one reconciliation pass
    ///
    /// Queries the backend once for every process, then feeds each machine
    /// its status. A failed query surfaces as `BackendError` and leaves every
    /// machine untouched.
    pub async fn poll(&self) -> Result<PollReport> {
        self.registry.ensure_open()?;
        let _driver = self.driver.lock().await;

        let statuses = self.backend.get_all_state().await?;
        let report = self.reconcile_all(&statuses);

        for transition in &report.transitions {
            debug!(
                "Factory '{}': '{}' {} -> {}",
                self.name, transition.name, transition.from, transition.to
            );
        }
        for name in &report.missing {
            warn!(
                "Factory '{}': process '{}' missing from backend status",
                self.name, name
            );
        }
        Ok(report)
    }

    fn reconcile_all(&self, statuses: &[BackendStatus]) -> PollReport {
        let by_name: HashMap<&str, &BackendStatus> =
            statuses.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut report = PollReport::default();

        for (name, entry) in self.registry.entries() {
            let Ok(mut machine) = entry.machine.try_lock() else {
                debug!("Process '{}' busy with a control call, skipping", name);
                report.busy.push(name);
                continue;
            };

            let status = by_name.get(name.as_str()).copied();
            match machine.reconcile(status) {
                Some(transition) => report.transitions.push(transition),
                None if status.is_none() && machine.state().is_active() => {
                    report.missing.push(name)
                }
                None => {}
            }
        }
        report
    }

    /// Shut down every process and release the backend
    ///
    /// PENDING processes are cancelled, STARTING/RUNNING ones are asked to
    /// stop, then the backend is shut down. Processes whose end could not be
    /// observed are marked TERMINATED. Afterwards `poll` and `get_pidantic`
    /// fail with `StateError`; calling this again is a no-op.
    pub async fn terminate(&self) -> Result<()> {
        if self.registry.close() {
            debug!("Factory '{}' already terminated", self.name);
            return Ok(());
        }
        let _driver = self.driver.lock().await;
        info!("Terminating factory '{}' ({} processes)", self.name, self.registry.len());

        let entries = self.registry.entries();
        for (name, entry) in &entries {
            let mut machine = entry.machine.lock().await;
            match machine.state() {
                ProcessState::Pending => {
                    machine.mark_cancelled();
                }
                ProcessState::Starting | ProcessState::Running => {
                    if let Err(e) = self.backend.stop_process(name).await {
                        warn!("Failed to stop process '{}': {}", name, e);
                    }
                    machine.mark_terminating();
                }
                _ => {}
            }
        }

        let shutdown = self.backend.shutdown().await;

        // collect result codes of processes that ended during shutdown
        let statuses = match self.backend.get_all_state().await {
            Ok(statuses) => statuses,
            Err(e) => {
                debug!("Final status query for factory '{}' failed: {}", self.name, e);
                Vec::new()
            }
        };
        let by_name: HashMap<&str, &BackendStatus> =
            statuses.iter().map(|s| (s.name.as_str(), s)).collect();
        for (name, entry) in &entries {
            let mut machine = entry.machine.lock().await;
            if machine.state() != ProcessState::Terminating {
                continue;
            }
            if let Some(status) = by_name.get(name.as_str()).copied() {
                machine.reconcile(Some(status));
            }
            machine.mark_abandoned();
        }

        shutdown.map_err(|e| {
            CoreError::BackendError(format!(
                "factory '{}' backend shutdown failed: {}",
                self.name, e
            ))
        })
    }
}
