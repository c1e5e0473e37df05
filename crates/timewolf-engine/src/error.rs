//! Engine-wide error types.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

/// Engine-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-wide error type.
///
/// These are configuration-level failures raised before or around a run.
/// Failures raised by module code are [`ModuleError`]s and never escape the
/// runner; they are turned into [`ErrorRecord`]s.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Recipe parse error: {0}")]
    RecipeParse(String),

    #[error("Command line parse error: {0}")]
    CommandLineParse(String),

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Invalid value {value:?} for {switch} ({validator}): {reason}")]
    ArgumentValidation {
        switch: String,
        value: String,
        validator: String,
        reason: String,
    },

    #[error("Argument validator error: {0}")]
    Validator(String),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn recipe(msg: impl Into<String>) -> Self {
        Self::RecipeParse(msg.into())
    }
}

/// Mechanical failures of the container store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("container manager has not parsed a recipe yet")]
    NotConfigured,

    #[error("module '{0}' is not part of the recipe")]
    UnknownModule(String),
}

/// A failure raised by module code.
///
/// Critical errors abort the module and every module depending on it.
/// Non-critical errors are recorded and execution carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ModuleError {
    pub message: String,
    pub critical: bool,
}

impl ModuleError {
    pub fn critical(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            critical: true,
        }
    }

    pub fn non_critical(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            critical: false,
        }
    }
}

impl From<anyhow::Error> for ModuleError {
    fn from(error: anyhow::Error) -> Self {
        Self::critical(format!("{error:#}"))
    }
}

impl From<std::io::Error> for ModuleError {
    fn from(error: std::io::Error) -> Self {
        Self::critical(error.to_string())
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(error: serde_json::Error) -> Self {
        Self::critical(error.to_string())
    }
}

impl From<ContainerError> for ModuleError {
    fn from(error: ContainerError) -> Self {
        Self::critical(error.to_string())
    }
}

/// Result type returned by module lifecycle methods.
pub type ModuleResult<T = ()> = std::result::Result<T, ModuleError>;

/// A recorded error, attributed to the module it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub module: Option<String>,
    pub critical: bool,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>, module: Option<String>, critical: bool) -> Self {
        Self {
            message: message.into(),
            module,
            critical,
        }
    }

    pub fn from_module_error(module: &str, error: &ModuleError) -> Self {
        Self::new(error.message.clone(), Some(module.to_string()), error.critical)
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = if self.critical { "critical" } else { "error" };
        match &self.module {
            Some(module) => write!(f, "[{severity}] {module}: {}", self.message),
            None => write!(f, "[{severity}] {}", self.message),
        }
    }
}

/// Shared, ordered collection of error records for one run.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    records: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: ErrorRecord) {
        self.records.lock().push(record);
    }

    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.records.lock().clone()
    }

    /// Errors attributed to one module.
    pub fn for_module(&self, module: &str) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.module.as_deref() == Some(module))
            .cloned()
            .collect()
    }

    pub fn has_critical(&self) -> bool {
        self.records.lock().iter().any(|r| r.critical)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
