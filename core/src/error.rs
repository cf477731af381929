//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("State error: {0}")]
    StateError(String),

    #[error("Duplicate process name: {0}")]
    DuplicateName(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Unknown process: {0}")]
    UnknownProcess(String),

    #[error("Process spawn error: {0}")]
    ProcessSpawn(String),

    #[error("Process signal error: {0}")]
    ProcessSignal(String),

    #[error("Process wait error: {0}")]
    ProcessWait(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Other(String),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::StateError(_) => "CORE010",
            CoreError::DuplicateName(_) => "CORE011",
            CoreError::BackendError(_) => "CORE012",
            CoreError::UnknownProcess(_) => "CORE013",
            CoreError::ProcessSpawn(_) => "CORE020",
            CoreError::ProcessSignal(_) => "CORE021",
            CoreError::ProcessWait(_) => "CORE022",
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::InitializationError(_) => "CORE003",
            CoreError::IoError(_) => "CORE005",
            CoreError::SerializationError(_) => "CORE006",
            CoreError::Other(_) => "CORE999",
        }
    }

    /// Whether this error reports an operation that is illegal in the current state
    pub fn is_state_error(&self) -> bool {
        matches!(self, CoreError::StateError(_))
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

// Convenience implementations
impl From<&str> for CoreError {
    fn from(s: &str) -> Self {
        CoreError::Other(s.to_string())
    }
}

impl From<String> for CoreError {
    fn from(s: String) -> Self {
        CoreError::Other(s)
    }
}
