//! Process-control backends
//!
//! A backend is the collaborator that actually runs programs: it registers
//! runnable units, starts/stops/restarts them on command, and answers one
//! batched status query for everything it knows. Commands are asynchronous
//! from the caller's point of view; their effect is observed on the next
//! [`ProcessBackend::get_all_state`] call.
//!
//! Backends report status in [`schema::BackendState`] terms, so the state
//! machine never sees backend-specific vocabulary.
//!
//! ## Implementations
//!
//! - [`LocalBackend`] (Unix): runs programs on this host as process-group leaders
//! - [`MockBackend`]: scriptable in-memory table for tests

use crate::logging::LogEntry;
use crate::Result;
use async_trait::async_trait;
use schema::{BackendStatus, ProcessSpec};

#[cfg(unix)]
pub mod local;
pub mod mock;

#[cfg(unix)]
pub use local::LocalBackend;
pub use mock::{BackendOp, MockBackend};

/// Contract between the supervision core and a process-control backend
///
/// Implementations must be safe to share between the factory and every
/// handle it creates; the factory is still the only caller issuing commands
/// on behalf of its processes.
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// Status of every program the backend knows, in one batched query
    async fn get_all_state(&self) -> Result<Vec<BackendStatus>>;

    /// Register a runnable unit.
    ///
    /// Registering an identical unit again is a no-op.
    async fn add_process(&self, spec: &ProcessSpec) -> Result<()>;

    /// Start a registered unit
    async fn start_process(&self, name: &str) -> Result<()>;

    /// Ask a unit to stop; succeeds if it has already ended
    async fn stop_process(&self, name: &str) -> Result<()>;

    /// Replace the unit's live process with a new one
    async fn restart_process(&self, name: &str) -> Result<()>;

    /// Drop all bookkeeping for a unit that is not running
    async fn remove_process(&self, name: &str) -> Result<()>;

    /// Output captured from the unit so far
    async fn read_log(&self, name: &str) -> Result<Vec<LogEntry>>;

    /// Stop everything and release the backend
    async fn shutdown(&self) -> Result<()>;
}

/// A call recorded by [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `get_all_state`
    GetAllState,
    /// `add_process`
    Add {
        /// Program name
        name: String,
    },
    /// `start_process`
    Start {
        /// Program name
        name: String,
    },
    /// `stop_process`
    Stop {
        /// Program name
        name: String,
    },
    /// `restart_process`
    Restart {
        /// Program name
        name: String,
    },
    /// `remove_process`
    Remove {
        /// Program name
        name: String,
    },
    /// `read_log`
    ReadLog {
        /// Program name
        name: String,
    },
    /// `shutdown`
    Shutdown,
}
