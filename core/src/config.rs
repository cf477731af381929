//! Configuration loading and validation
//!
//! Two TOML documents are understood here:
//!
//! - a factory configuration ([`FactoryConfig`]): factory name, backend state
//!   directory, log capacity and default stop timeout;
//! - a programs file ([`ProgramsFile`]): an optional `[factory]` table plus a
//!   `[[programs]]` array of [`ProcessSpec`] values, or alternatively one table
//!   per program keyed by its name.
//!
//! Validation errors carry field paths, e.g. `programs[1].name: duplicate name 'web'`.

use crate::{CoreError, Result};
use schema::ProcessSpec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the default backend state directory
pub const STATE_DIR_ENV: &str = "PIDANTIC_STATE_DIR";

/// Settings for one supervision factory and its backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FactoryConfig {
    /// Factory name, used in log output
    #[serde(default = "default_factory_name")]
    pub name: String,

    /// Directory where the backend keeps program definition files
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Captured output lines kept per program
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Stop timeout given to programs created from a bare command line
    #[serde(default = "default_graceful_timeout_secs")]
    pub graceful_timeout_secs: u64,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            name: default_factory_name(),
            state_dir: default_state_dir(),
            log_capacity: default_log_capacity(),
            graceful_timeout_secs: default_graceful_timeout_secs(),
        }
    }
}

impl FactoryConfig {
    /// Default settings rooted at `state_dir`
    pub fn with_state_dir(name: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            state_dir: state_dir.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "name: cannot be empty".to_string(),
            ));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(CoreError::ValidationError(
                "stateDir: cannot be empty".to_string(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(CoreError::ValidationError(
                "logCapacity: must be greater than 0".to_string(),
            ));
        }
        if self.graceful_timeout_secs == 0 {
            return Err(CoreError::ValidationError(
                "gracefulTimeoutSecs: must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_factory_name() -> String {
    "pidantic".to_string()
}

/// Default backend state directory.
///
/// Order:
/// - `PIDANTIC_STATE_DIR` env var if provided
/// - `$HOME/.pidantic` if HOME exists
/// - `./.pidantic` otherwise
pub fn default_state_dir() -> PathBuf {
    if let Ok(p) = std::env::var(STATE_DIR_ENV) {
        return PathBuf::from(p);
    }
    if let Some(home) = dirs_next::home_dir() {
        return home.join(".pidantic");
    }
    PathBuf::from(".pidantic")
}

const fn default_log_capacity() -> usize {
    1024
}

const fn default_graceful_timeout_secs() -> u64 {
    schema::default_graceful_timeout_secs()
}

/// Check a single process spec; `field` prefixes error messages
pub fn validate_spec(spec: &ProcessSpec, field: &str) -> Result<()> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(CoreError::ValidationError(format!(
            "{}.name: cannot be empty",
            field
        )));
    }
    if name != spec.name || spec.name.chars().any(char::is_whitespace) {
        return Err(CoreError::ValidationError(format!(
            "{}.name: '{}' cannot contain whitespace",
            field, spec.name
        )));
    }
    if spec.name.contains('/') || spec.name == "." || spec.name == ".." {
        return Err(CoreError::ValidationError(format!(
            "{}.name: '{}' is not a valid file name",
            field, spec.name
        )));
    }
    if spec.command.trim().is_empty() {
        return Err(CoreError::ValidationError(format!(
            "{}.command: cannot be empty",
            field
        )));
    }
    if spec.directory.as_os_str().is_empty() {
        return Err(CoreError::ValidationError(format!(
            "{}.directory: cannot be empty",
            field
        )));
    }
    if spec.environment.keys().any(|k| k.trim().is_empty()) {
        return Err(CoreError::ValidationError(format!(
            "{}.environment: keys cannot be empty",
            field
        )));
    }
    Ok(())
}

/// Top-level programs file
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgramsFile {
    /// Optional factory settings
    #[serde(default)]
    pub factory: Option<FactoryConfig>,

    /// Programs to supervise
    pub programs: Vec<ProcessSpec>,
}

/// Alternate programs file format: one table per program, keyed by name
///
/// ```toml
/// [sleeper]
/// command = "/bin/sleep 5"
/// directory = "/tmp"
/// ```
#[derive(Debug, Deserialize)]
struct ProgramsMapFile {
    #[serde(flatten)]
    programs: HashMap<String, toml::Value>,
}

impl ProgramsFile {
    /// Validate every program and name uniqueness
    pub fn validate(&self) -> Result<()> {
        if let Some(factory) = &self.factory {
            factory.validate().map_err(|e| match e {
                CoreError::ValidationError(msg) => {
                    CoreError::ValidationError(format!("factory.{}", msg))
                }
                other => other,
            })?;
        }
        if self.programs.is_empty() {
            return Err(CoreError::ValidationError(
                "programs: must contain at least one program".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (i, spec) in self.programs.iter().enumerate() {
            let field = format!("programs[{}]", i);
            validate_spec(spec, &field)?;
            if !seen.insert(spec.name.as_str()) {
                return Err(CoreError::ValidationError(format!(
                    "{}.name: duplicate name '{}'",
                    field, spec.name
                )));
            }
        }
        Ok(())
    }
}

/// Load a factory configuration from a TOML file path
pub fn load_factory_config_from_toml_path(path: impl AsRef<Path>) -> Result<FactoryConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_factory_config_from_toml_str(&data)
}

/// Load a factory configuration from a TOML string
pub fn load_factory_config_from_toml_str(input: &str) -> Result<FactoryConfig> {
    let cfg: FactoryConfig = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load a programs file from a TOML file path
pub fn load_programs_from_toml_path(path: impl AsRef<Path>) -> Result<ProgramsFile> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_programs_from_toml_str(&data)
}

/// Load a programs file from a TOML string
pub fn load_programs_from_toml_str(input: &str) -> Result<ProgramsFile> {
    if let Ok(cfg) = toml::from_str::<ProgramsFile>(input) {
        cfg.validate()?;
        return Ok(cfg);
    }

    // Fall back to keyed-by-name tables
    let map: ProgramsMapFile = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;

    let mut names: Vec<String> = map.programs.keys().cloned().collect();
    names.sort();

    let mut programs = Vec::with_capacity(names.len());
    let mut tables = map.programs;
    for name in names {
        let table = match tables.remove(&name) {
            Some(toml::Value::Table(t)) => t,
            Some(other) => {
                return Err(CoreError::ConfigurationError(format!(
                    "Program '{}' must be a table, found {}",
                    name,
                    other.type_str()
                )));
            }
            None => continue,
        };

        let mut table_with_name = table;
        table_with_name
            .entry("name".to_string())
            .or_insert(toml::Value::String(name.clone()));

        let spec: ProcessSpec = toml::Value::Table(table_with_name)
            .try_into()
            .map_err(|e| {
                CoreError::ConfigurationError(format!("Failed to parse program '{}': {}", name, e))
            })?;
        programs.push(spec);
    }

    let cfg = ProgramsFile {
        factory: None,
        programs,
    };
    cfg.validate()?;
    Ok(cfg)
}
