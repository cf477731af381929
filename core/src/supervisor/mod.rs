//! Process supervision: state machines, handles and the reconciliation loop
//!
//! A [`SupervisionFactory`] owns a backend and one [`ProcessStateMachine`] per
//! managed process. Callers get a [`ProcessHandle`] for each process and drive
//! progress by awaiting [`SupervisionFactory::poll`] in a loop:
//!
//! ```text
//! get_pidantic ──▶ handle.start() ──▶ poll() ... poll() ──▶ handle.is_done()
//! ```
//!
//! Nothing runs in the background. Every transition happens inside a
//! caller-awaited control call or poll.
//!
//! ## Components
//!
//! - [`ProcessStateMachine`]: transition rules and callback dispatch
//! - [`ProcessHandle`]: control API for one process
//! - [`SupervisionFactory`]: name registry, batched polling, bulk shutdown

use crate::{CoreError, Result};
use schema::ProcessSnapshot;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

pub mod factory;
pub mod handle;
pub mod machine;


pub use factory::*;
pub use handle::*;
pub use machine::*;

/// A state machine shared between its factory and its handles
pub type SharedMachine = Arc<tokio::sync::Mutex<ProcessStateMachine>>;

/// Registry entry for one process
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) machine: SharedMachine,
    pub(crate) snapshots: watch::Receiver<ProcessSnapshot>,
}

/// Name → machine map owned by one factory
///
/// The lock is never held across an await.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Mutex<BTreeMap<String, Entry>>,
    closed: AtomicBool,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the registry; returns whether it was already closed
    pub(crate) fn close(&self) -> bool {
        self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CoreError::StateError(
                "factory has been terminated".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn insert(&self, name: &str, entry: Entry) -> Result<()> {
        let mut entries = self.lock();
        if entries.contains_key(name) {
            return Err(CoreError::DuplicateName(name.to_string()));
        }
        entries.insert(name.to_string(), entry);
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Entry> {
        self.lock().get(name).cloned()
    }

    pub(crate) fn remove(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    pub(crate) fn entries(&self) -> Vec<(String, Entry)> {
        self.lock()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
