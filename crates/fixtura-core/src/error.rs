//! Error types for Fixtura Core
//!
//! This module defines the error taxonomy used by the supervisor, the store and
//! the process launcher. We use `thiserror` for the Display/Error boilerplate.
//!
//! Best-effort batch operations (crash recovery, supervisor close) never stop
//! at the first failure. They collect failures in a [`FailureTracker`] and
//! surface them together as [`SupervisorError::Teardown`].

use std::time::Duration;
use thiserror::Error;

use crate::container::ContainerState;

/// Result type alias for Fixtura operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Main error type for Fixtura operations
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The runtime executable could not be started at all
    #[error("Could not execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A synchronous runtime command reported failure
    #[error("Process '{command}' returned exit code {}", exit_code_text(.code))]
    NonZeroExit { command: String, code: Option<i32> },

    /// The liveness or readiness phase exceeded the startup deadline
    #[error("Timed out after {waited:?} waiting for container {name} to start ('{command}')")]
    ReadinessTimeout {
        name: String,
        command: String,
        waited: Duration,
    },

    /// The managed process went away before the container became ready
    #[error("Container process for {name} exited before it became ready ({status})")]
    ContainerExited { name: String, status: String },

    /// A graceful stop left the local process running
    #[error("Container process for {name} is still alive after stop")]
    StillAlive { name: String },

    /// One or more independent cleanup attempts failed
    #[error("{} teardown failure(s): {}", .0.len(), join_errors(.0))]
    Teardown(Vec<SupervisorError>),

    /// The store was written by an incompatible schema revision
    #[error("Store schema version {found} is not supported (expected at most {supported})")]
    StoreIncompatible { found: i64, supported: i64 },

    /// SQLite errors
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The store has already been closed
    #[error("Store is closed")]
    StoreClosed,

    /// A container record referenced a pod with no record
    #[error("Pod not found in store: {0}")]
    PodNotFound(String),

    /// Operation not permitted in the handle's current state
    #[error("Container {name} is {state}; cannot {operation}")]
    InvalidState {
        name: String,
        state: ContainerState,
        operation: &'static str,
    },

    /// The container runtime is missing or unusable on this host
    #[error("Container runtime '{0}' is not supported on this system")]
    Unsupported(String),

    /// Invalid configuration values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be encoded
    #[error("Configuration encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<SupervisorError>,
    },
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

fn join_errors(errors: &[SupervisorError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SupervisorError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True if this error (or the error it wraps) is a readiness timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::ReadinessTimeout { .. } => true,
            Self::WithContext { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// The individual failures of an aggregate error; a single-element slice otherwise
    pub fn failures(&self) -> &[SupervisorError] {
        match self {
            Self::Teardown(failures) => failures,
            other => std::slice::from_ref(other),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}

/// Collects failures from a sequence of independent operations.
///
/// Every operation is attempted; [`FailureTracker::finish`] reports all
/// recorded failures as one [`SupervisorError::Teardown`].
#[derive(Debug, Default)]
pub struct FailureTracker {
    failures: Vec<SupervisorError>,
}

impl FailureTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one operation, keeping the error if it failed
    pub fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(SupervisorError::Teardown(nested)) => {
                self.failures.extend(nested);
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "Recorded teardown failure");
                self.failures.push(e);
                None
            }
        }
    }

    /// Number of failures recorded so far
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// True if nothing has failed
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ok if nothing failed, otherwise every failure in one aggregate error
    pub fn finish(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(SupervisorError::Teardown(self.failures))
        }
    }
}
