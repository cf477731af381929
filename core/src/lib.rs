//! Core functionality for pidantic process supervision
//!
//! This crate contains the supervision state machine, the factory that drives
//! reconciliation against a process-control backend, the backend contract and
//! its implementations, and the configuration shared with the CLI.

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
#[cfg(unix)]
pub mod process;
pub mod supervisor;

#[cfg(test)]
mod error_tests;

// Re-export schema types for convenience
pub use schema::*;

pub use backend::{BackendCall, BackendOp, MockBackend, ProcessBackend};
#[cfg(unix)]
pub use backend::LocalBackend;
pub use config::FactoryConfig;
pub use error::{CoreError, Result};
pub use logging::{LogEntry, LogRing};
pub use supervisor::{PollReport, ProcessHandle, ProcessStateMachine, SupervisionFactory};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    ///
    /// `RUST_LOG` takes precedence over `level` when set.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_only_once() {
        // another test may have installed a subscriber already
        let first = utils::init_tracing("debug");
        let second = utils::init_tracing("debug");
        assert!(first.is_ok() || second.is_err());
        assert!(matches!(second, Err(CoreError::InitializationError(_))));
    }
}
