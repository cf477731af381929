//! Library side of the `pidantic` command-line driver
//!
//! [`run_programs`] starts a set of programs under one factory and polls them
//! to completion, printing every transition. The binary only parses
//! arguments and wires Ctrl-C into the `interrupt` future.

pub mod error;

pub use error::{CliError, Result};

use pidantic_core::config::{load_programs_from_toml_path, ProgramsFile};
use pidantic_core::{ProcessHandle, ProcessSpec, ProcessState, SupervisionFactory};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Final state of one program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Program name
    pub name: String,
    /// Terminal state reached
    pub state: ProcessState,
    /// Result code
    pub result_code: i32,
}

impl Outcome {
    /// Whether the program ran to a clean exit
    pub fn is_success(&self) -> bool {
        self.state == ProcessState::Exited && self.result_code == 0
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// One outcome per program, in start order
    pub outcomes: Vec<Outcome>,
    /// The run was cut short by an interrupt
    pub interrupted: bool,
}

impl RunSummary {
    /// Whether every program exited cleanly
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.outcomes.iter().all(Outcome::is_success)
    }
}

/// Build a spec from a command line given as separate words
///
/// The name defaults to the file name of the program.
pub fn spec_from_command(
    command: &[String],
    name: Option<&str>,
    directory: Option<&Path>,
) -> Result<ProcessSpec> {
    let program = command
        .first()
        .ok_or_else(|| CliError::InvalidArgument("no command given".to_string()))?;
    if command.iter().any(|word| word.chars().any(char::is_whitespace)) {
        return Err(CliError::InvalidArgument(
            "command words cannot contain whitespace".to_string(),
        ));
    }

    let name = match name {
        Some(name) => name.to_string(),
        None => Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                CliError::InvalidArgument(format!("cannot derive a name from '{}'", program))
            })?,
    };
    let directory = match directory {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };

    Ok(ProcessSpec::new(name, command.join(" "), directory))
}

/// Load and validate a programs file
pub fn check_programs(path: &Path) -> Result<ProgramsFile> {
    load_programs_from_toml_path(path).map_err(|e| {
        CliError::ConfigError(format!("{}: {}", path.display(), e))
    })
}

/// Start every spec and poll until all are done or `interrupt` resolves
///
/// The factory is terminated before returning, in every case.
pub async fn run_programs<F>(
    factory: &SupervisionFactory,
    specs: Vec<ProcessSpec>,
    poll_interval: Duration,
    interrupt: F,
) -> Result<RunSummary>
where
    F: Future<Output = ()>,
{
    let result = drive(factory, specs, poll_interval, interrupt).await;
    if let Err(e) = factory.terminate().await {
        warn!("Factory shutdown reported an error: {}", e);
    }
    let (handles, interrupted) = result?;

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in &handles {
        let outcome = Outcome {
            name: handle.name().to_string(),
            state: handle.state(),
            result_code: handle.result_code()?,
        };
        println!(
            "{}: {} (result code {})",
            outcome.name, outcome.state, outcome.result_code
        );
        outcomes.push(outcome);
    }

    Ok(RunSummary {
        outcomes,
        interrupted,
    })
}

async fn drive<F>(
    factory: &SupervisionFactory,
    specs: Vec<ProcessSpec>,
    poll_interval: Duration,
    interrupt: F,
) -> Result<(Vec<ProcessHandle>, bool)>
where
    F: Future<Output = ()>,
{
    let mut handles = Vec::with_capacity(specs.len());
    for spec in specs {
        handles.push(factory.get_pidantic(spec)?);
    }
    for handle in &handles {
        handle.start().await?;
        println!("{}: started", handle.name());
    }

    tokio::pin!(interrupt);
    loop {
        let report = factory.poll().await?;
        for t in &report.transitions {
            println!("{}: {} -> {}", t.name, t.from, t.to);
        }
        if factory.all_done() {
            return Ok((handles, false));
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = &mut interrupt => {
                info!("Interrupted, terminating {} programs", handles.len());
                return Ok((handles, true));
            }
        }
    }
}
