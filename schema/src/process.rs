//! Process specification and state types for the pidantic supervisor
//!
//! ## Process Lifecycle
//!
//! A supervised process moves through the following logical states:
//! - `Pending`: created, not yet handed to the backend
//! - `Starting`: start command issued, backend has not confirmed a live process
//! - `Running`: backend reports a live process
//! - `Terminating`: stop command issued, waiting for the backend to see it die
//! - `Exited`: the process ended on its own
//! - `Terminated`: the process ended because the caller asked it to
//! - `Failed`: the backend reported an unrecoverable condition
//!
//! `Exited`, `Terminated` and `Failed` are terminal.
//!
//! ## Backend Vocabulary
//!
//! Backends report their own status words ("RUNNING", "EXITED", "FATAL", ...).
//! These are normalized into [`BackendState`] at the adapter boundary so the
//! transition table never depends on a particular backend.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Result code reported for a terminal process whose exit status was never observed
pub const UNKNOWN_RESULT_CODE: i32 = -1;

/// Request to supervise one program
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Unique name within one factory
    pub name: String,

    /// Invocation string, split on whitespace into program and arguments
    pub command: String,

    /// Working directory for the process
    pub directory: PathBuf,

    /// Extra environment variables for the process
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Seconds to wait after SIGTERM before escalating to SIGKILL
    #[serde(default = "default_graceful_timeout_secs")]
    pub graceful_timeout_secs: u64,
}

impl ProcessSpec {
    /// Create a spec with default environment and timeouts
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            directory: directory.into(),
            environment: HashMap::new(),
            graceful_timeout_secs: default_graceful_timeout_secs(),
        }
    }

    /// Add an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Override the graceful stop timeout
    #[must_use]
    pub fn with_graceful_timeout_secs(mut self, secs: u64) -> Self {
        self.graceful_timeout_secs = secs;
        self
    }

    /// Split the command into program and arguments.
    ///
    /// Returns `None` when the command has no program word.
    pub fn program_and_args(&self) -> Option<(&str, Vec<&str>)> {
        let mut words = self.command.split_whitespace();
        let program = words.next()?;
        Some((program, words.collect()))
    }

    /// Get the graceful timeout as a Duration
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_secs)
    }
}

/// Default graceful stop timeout in seconds
pub const fn default_graceful_timeout_secs() -> u64 {
    10
}

/// Logical state of a supervised process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ProcessState {
    /// Created, not yet handed to the backend
    Pending,
    /// Start command issued, not yet confirmed running
    Starting,
    /// Backend confirms a live process
    Running,
    /// Stop command issued, waiting for the process to die
    Terminating,
    /// Process ended on its own
    Exited,
    /// Process ended because termination was requested
    Terminated,
    /// Backend reported an unrecoverable condition
    Failed,
}

impl ProcessState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Exited | ProcessState::Terminated | ProcessState::Failed
        )
    }

    /// Whether the backend may currently hold a live process for this state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Terminating
        )
    }

    /// Upper-case label used in log output
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Pending => "PENDING",
            ProcessState::Starting => "STARTING",
            ProcessState::Running => "RUNNING",
            ProcessState::Terminating => "TERMINATING",
            ProcessState::Exited => "EXITED",
            ProcessState::Terminated => "TERMINATED",
            ProcessState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status word reported by a process-control backend, normalized
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum BackendState {
    /// Registered but not running
    Stopped,
    /// Being spawned
    Starting,
    /// Live process
    Running,
    /// Waiting to retry a failed spawn
    Backoff,
    /// Stop in progress
    Stopping,
    /// Ended on its own
    Exited,
    /// Could not be spawned, will not be retried
    Fatal,
    /// Anything the adapter could not classify
    Unknown,
}

impl BackendState {
    /// Parse a backend status word, case-insensitively.
    ///
    /// Unrecognized words map to [`BackendState::Unknown`].
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STOPPED" => BackendState::Stopped,
            "STARTING" => BackendState::Starting,
            "RUNNING" => BackendState::Running,
            "BACKOFF" => BackendState::Backoff,
            "STOPPING" => BackendState::Stopping,
            "EXITED" => BackendState::Exited,
            "FATAL" => BackendState::Fatal,
            _ => BackendState::Unknown,
        }
    }

    /// Upper-case status word
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendState::Stopped => "STOPPED",
            BackendState::Starting => "STARTING",
            BackendState::Running => "RUNNING",
            BackendState::Backoff => "BACKOFF",
            BackendState::Stopping => "STOPPING",
            BackendState::Exited => "EXITED",
            BackendState::Fatal => "FATAL",
            BackendState::Unknown => "UNKNOWN",
        }
    }

    /// Whether the backend no longer holds a live process
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            BackendState::Stopped | BackendState::Exited | BackendState::Fatal
        )
    }
}

impl From<&str> for BackendState {
    fn from(raw: &str) -> Self {
        BackendState::from_raw(raw)
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a batched backend status query
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    /// Program name
    pub name: String,
    /// Current or last OS process id, 0 if none
    pub pid: u32,
    /// Normalized backend state
    pub state: BackendState,
    /// Exit status once the process has ended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i32>,
}

impl BackendStatus {
    /// Create a status with no pid and no result code
    pub fn new(name: impl Into<String>, state: BackendState) -> Self {
        Self {
            name: name.into(),
            pid: 0,
            state,
            result_code: None,
        }
    }

    /// Set the pid
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Set the result code
    #[must_use]
    pub fn with_result_code(mut self, code: i32) -> Self {
        self.result_code = Some(code);
        self
    }
}

/// Data record owned by one state machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// Unique name within the owning factory
    pub process_name: String,
    /// Invocation string
    pub command: String,
    /// Working directory
    pub directory: PathBuf,
    /// Last observed OS process id, 0 until a live process is reported
    pub pid: u32,
    /// Exit status, set once the process has ended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i32>,
    /// Last state reported by the backend
    pub raw_backend_state: BackendState,
}

impl ProcessRecord {
    /// Create an unobserved record for a spec
    pub fn from_spec(spec: &ProcessSpec) -> Self {
        Self {
            process_name: spec.name.clone(),
            command: spec.command.clone(),
            directory: spec.directory.clone(),
            pid: 0,
            result_code: None,
            raw_backend_state: BackendState::Unknown,
        }
    }
}

/// Point-in-time view of a supervised process, published on every change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    /// Logical state
    pub state: ProcessState,
    /// Last observed pid
    pub pid: u32,
    /// Exit status, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i32>,
}

impl ProcessSnapshot {
    /// Snapshot of a freshly created process
    pub fn pending() -> Self {
        Self {
            state: ProcessState::Pending,
            pid: 0,
            result_code: None,
        }
    }

    /// Whether the process reached a terminal state
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }
}

/// A state change applied to one process
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    /// Process name
    pub name: String,
    /// State before the change
    pub from: ProcessState,
    /// State after the change
    pub to: ProcessState,
}
