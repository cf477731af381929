//! pidantic CLI binary
//!
//! Runs commands under a local supervision factory and polls them to completion.

use clap::{Parser, Subcommand};
use cli::{check_programs, run_programs, spec_from_command, CliError, Result};
use pidantic_core::{FactoryConfig, SupervisionFactory};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;

#[derive(Parser)]
#[command(name = "pidantic")]
#[command(about = "Supervise local processes through a polled state machine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one command, or every program in a programs file, to completion
    Run {
        /// Programs file (TOML) to run instead of a single command
        #[arg(long, value_name = "FILE", conflicts_with_all = ["name", "dir", "cmd"])]
        config: Option<PathBuf>,
        /// Directory for backend program files
        #[arg(long, value_name = "DIR")]
        state_dir: Option<PathBuf>,
        /// Delay between polls in milliseconds
        #[arg(long, default_value_t = 200)]
        poll_interval_ms: u64,
        /// Process name (defaults to the program's file name)
        #[arg(long)]
        name: Option<String>,
        /// Working directory (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// Command to run
        #[arg(
            trailing_var_arg = true,
            allow_hyphen_values = true,
            required_unless_present = "config",
            value_name = "COMMAND"
        )]
        cmd: Vec<String>,
    },
    /// Validate a programs file
    Check {
        /// Programs file (TOML)
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = pidantic_core::utils::init_tracing(&cli.log_level) {
        eprintln!("failed to initialize logging: {}", e);
    }

    match execute(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!("error[{}]: {}", e.code(), e);
            ExitCode::from(2)
        }
    }
}

async fn execute(command: Commands) -> Result<bool> {
    match command {
        Commands::Check { file } => {
            let programs = check_programs(&file)?;
            println!(
                "{}: {} program(s) OK",
                file.display(),
                programs.programs.len()
            );
            Ok(true)
        }
        Commands::Run {
            config,
            state_dir,
            poll_interval_ms,
            name,
            dir,
            cmd,
        } => {
            let (mut factory_config, specs) = match config {
                Some(path) => {
                    let programs = check_programs(&path)?;
                    (programs.factory.unwrap_or_default(), programs.programs)
                }
                None => {
                    let spec = spec_from_command(&cmd, name.as_deref(), dir.as_deref())?;
                    (FactoryConfig::default(), vec![spec])
                }
            };
            if let Some(state_dir) = state_dir {
                factory_config.state_dir = state_dir;
            }
            if poll_interval_ms == 0 {
                return Err(CliError::InvalidArgument(
                    "--poll-interval-ms must be greater than 0".to_string(),
                ));
            }

            let factory = SupervisionFactory::local(&factory_config)?;
            let interrupt = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    // no signal handler available: never interrupt
                    std::future::pending::<()>().await;
                }
            };
            let summary = run_programs(
                &factory,
                specs,
                Duration::from_millis(poll_interval_ms),
                interrupt,
            )
            .await?;
            Ok(summary.is_success())
        }
    }
}
