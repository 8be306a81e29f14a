//! Error types for the loader core and the boot binary.

use std::fmt;

use thiserror::Error;

/// Error returned by service and unit hooks.
///
/// Boxed so implementors can `?` whatever their own client libraries raise.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Lifecycle step that was running when a hook failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialize,
    Start,
    Stop,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialize => "initialize",
            Phase::Start => "start",
            Phase::Stop => "stop",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by graph resolution, unit loading and service lifecycles.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error(
        "configuration error: unit '{unit}' requires '{dependency}', but no unit provides it and no service is registered under that name"
    )]
    MissingDependency { unit: String, dependency: String },

    #[error("configuration error: dependency cycle detected among units: {}", .units.join(", "))]
    CycleDetected { units: Vec<String> },

    #[error("configuration error: unit '{0}' is registered more than once")]
    DuplicateUnit(String),

    #[error("configuration error: service '{0}' is registered more than once")]
    DuplicateService(String),

    #[error(
        "configuration error: capability '{capability}' is provided by both '{first}' and '{second}'"
    )]
    AmbiguousProvider {
        capability: String,
        first: String,
        second: String,
    },

    #[error("configuration error: unit '{unit}' expects dependency '{dependency}' to be a {expected}")]
    TypeMismatch {
        unit: String,
        dependency: String,
        expected: &'static str,
    },

    #[error("configuration error: '{unit}' is ordered before its prerequisite '{prerequisite}'")]
    InvalidOrder { unit: String, prerequisite: String },

    #[error(
        "configuration error: unit '{unit}' requires '{dependency}', but its provider is not running (status: {status})"
    )]
    DependencyNotRunning {
        unit: String,
        dependency: String,
        status: crate::lifecycle::Status,
    },

    #[error("lifecycle error: '{service}' failed to {phase}: {message}")]
    Lifecycle {
        service: String,
        phase: Phase,
        message: String,
    },

    #[error("lifecycle error: '{service}' cannot be brought up from status {status}{}", last_error_suffix(.last_error))]
    NotStartable {
        service: String,
        status: crate::lifecycle::Status,
        last_error: Option<String>,
    },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
}

impl LoaderError {
    /// `true` for errors that are detected before any setup runs.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            LoaderError::Lifecycle { .. } | LoaderError::NotStartable { .. } | LoaderError::NotFound { .. }
        )
    }

    pub(crate) fn lifecycle(service: &str, phase: Phase, err: &BoxError) -> Self {
        LoaderError::Lifecycle {
            service: service.to_string(),
            phase,
            message: err.to_string(),
        }
    }

    pub(crate) fn unit_not_found(name: &str) -> Self {
        LoaderError::NotFound { kind: "unit", name: name.to_string() }
    }

    pub(crate) fn service_not_found(name: &str) -> Self {
        LoaderError::NotFound { kind: "service", name: name.to_string() }
    }
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error.as_deref().map(|e| format!(" (last error: {e})")).unwrap_or_default()
}

/// Application-wide error for the boot binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Loader(#[from] LoaderError),
}
