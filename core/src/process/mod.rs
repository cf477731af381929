//! Process management utilities for the local backend
//!
//! This module provides the platform-specific pieces the local backend needs
//! to run programs safely: spawning each program as the leader of its own
//! process group, signalling whole groups, and turning exit statuses into
//! result codes.
//!
//! ## Platform Support
//!
//! - **Unix**: process groups via `setsid()`, SIGTERM with SIGKILL fallback
//!
//! Other platforms have no local backend; the state machine and factory still
//! work against any other [`crate::backend::ProcessBackend`] implementation.

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
