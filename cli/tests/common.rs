//! Test utilities for CLI crate integration tests.
#![allow(missing_docs)]
#![allow(dead_code)]

use pidantic_core::{FactoryConfig, SupervisionFactory};
use std::time::Duration;
use tempfile::TempDir;

/// Run the given future with a timeout, failing the test if it elapses.
///
/// # Panics
///
/// Panics if the timeout elapses before the future completes.
pub async fn run_with_timeout<F, T>(duration: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .expect("test timed out")
}

/// Local factory whose state lives in a fresh temp dir
pub fn local_factory() -> (TempDir, SupervisionFactory) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = FactoryConfig::with_state_dir("cli-test", dir.path().join("state"));
    let factory = SupervisionFactory::local(&config).expect("local factory");
    (dir, factory)
}
