#![cfg(unix)]
//! Runs real programs through the CLI driver

mod common;

use cli::{check_programs, run_programs, spec_from_command, CliError};
use common::{local_factory, run_with_timeout};
use pidantic_core::{ProcessBackend, ProcessSpec, ProcessState};
use std::path::Path;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(50);
const LIMIT: Duration = Duration::from_secs(20);

fn never() -> std::future::Pending<()> {
    std::future::pending()
}

#[tokio::test]
async fn test_run_reports_each_outcome() {
    let (_dir, factory) = local_factory();
    let specs = vec![
        ProcessSpec::new("ok", "true", "/tmp"),
        ProcessSpec::new("bad", "false", "/tmp"),
    ];

    let summary = run_with_timeout(LIMIT, run_programs(&factory, specs, POLL, never()))
        .await
        .unwrap();

    assert!(!summary.interrupted);
    assert!(!summary.is_success());
    assert_eq!(summary.outcomes.len(), 2);
    assert!(summary.outcomes[0].is_success());
    assert_eq!(summary.outcomes[1].state, ProcessState::Exited);
    assert_eq!(summary.outcomes[1].result_code, 1);
    assert!(factory.is_closed());
}

#[tokio::test]
async fn test_run_single_command() {
    let (_dir, factory) = local_factory();
    let cmd: Vec<String> = vec!["/bin/sleep".to_string(), "0".to_string()];
    let spec = spec_from_command(&cmd, None, Some(Path::new("/tmp"))).unwrap();

    let summary = run_with_timeout(LIMIT, run_programs(&factory, vec![spec], POLL, never()))
        .await
        .unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.outcomes[0].name, "sleep");
}

#[tokio::test]
async fn test_interrupt_terminates_programs() {
    let (_dir, factory) = local_factory();
    let specs = vec![ProcessSpec::new("cat", "/bin/cat", "/tmp")];
    let interrupt = tokio::time::sleep(Duration::from_millis(300));

    let summary = run_with_timeout(LIMIT, run_programs(&factory, specs, POLL, interrupt))
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert!(!summary.is_success());
    assert_eq!(summary.outcomes[0].state, ProcessState::Terminated);
    let statuses = factory.backend().get_all_state().await.unwrap();
    assert!(statuses.iter().all(|s| s.state.is_gone()));
}

#[tokio::test]
async fn test_duplicate_programs_fail_before_starting() {
    let (_dir, factory) = local_factory();
    let specs = vec![
        ProcessSpec::new("same", "/bin/cat", "/tmp"),
        ProcessSpec::new("same", "true", "/tmp"),
    ];

    let err = run_programs(&factory, specs, POLL, never()).await.unwrap_err();
    assert!(matches!(err, CliError::Core(_)));
    assert!(factory.is_closed());
}

#[test]
fn test_check_programs_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("programs.toml");
    std::fs::write(
        &path,
        r#"
[factory]
name = "demo"
stateDir = "/tmp/pidantic-demo"

[[programs]]
name = "sleeper"
command = "/bin/sleep 1"
directory = "/tmp"

[[programs]]
name = "cat"
command = "/bin/cat"
directory = "/tmp"
gracefulTimeoutSecs = 2
"#,
    )
    .unwrap();

    let programs = check_programs(&path).unwrap();
    assert_eq!(programs.programs.len(), 2);
    assert_eq!(programs.factory.unwrap().name, "demo");
    assert_eq!(programs.programs[1].graceful_timeout_secs, 2);

    std::fs::write(&path, "[[programs]]\nname = \"x\"\ncommand = \"\"\ndirectory = \"/tmp\"\n")
        .unwrap();
    let err = check_programs(&path).unwrap_err();
    assert!(matches!(err, CliError::ConfigError(_)));
    assert!(err.to_string().contains("programs[0].command"));
}
