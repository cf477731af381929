//! Schema definitions for pidantic
//!
//! This crate contains the data structures shared by the supervision core and
//! its command-line driver: process specifications, the logical process state
//! set, and the normalized vocabulary reported by process-control backends.
//! All types here implement JSON Schema generation for external consumption.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub mod process;

pub use process::*;


/// Output stream a captured log line came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum LogStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// Create a current timestamp string in RFC3339 format (second precision)
#[must_use]
pub fn current_timestamp() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}
