//! Supervisor configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, SupervisorError, DEFAULT_EXECUTABLE, DEFAULT_STARTUP_WAIT_MS};

/// Configuration consumed by a [`crate::Supervisor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Container runtime executable (resolved through `PATH` if relative)
    pub executable: PathBuf,

    /// Project namespace: prefixes every resource name and selects the store
    pub project_name: String,

    /// Upper bound on the liveness + readiness wait, in milliseconds
    pub startup_wait_ms: u64,

    /// If the runtime is unsupported, disable rather than fail
    pub disabled_if_unsupported: bool,

    /// Directory holding the per-project store files
    pub state_directory: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_EXECUTABLE),
            project_name: "default".to_string(),
            startup_wait_ms: DEFAULT_STARTUP_WAIT_MS,
            disabled_if_unsupported: true,
            state_directory: std::env::temp_dir().join("fixtura"),
        }
    }
}

impl SupervisorConfig {
    /// Create a new configuration for the given project with default values
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            ..Self::default()
        }
    }

    /// Set the runtime executable
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    /// Set the startup wait
    pub fn with_startup_wait(mut self, wait: Duration) -> Self {
        self.startup_wait_ms = wait.as_millis() as u64;
        self
    }

    /// Set the disabled-if-unsupported flag
    pub fn with_disabled_if_unsupported(mut self, disabled: bool) -> Self {
        self.disabled_if_unsupported = disabled;
        self
    }

    /// Set the state directory
    pub fn with_state_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_directory = dir.into();
        self
    }

    /// The startup wait as a duration
    pub fn startup_wait(&self) -> Duration {
        Duration::from_millis(self.startup_wait_ms)
    }

    /// Path of this project's store file
    pub fn store_path(&self) -> PathBuf {
        self.state_directory
            .join(format!("{}.db", self.project_name))
    }

    /// The executable as it should appear in logged command lines
    pub fn executable_name(&self) -> String {
        self.executable.display().to_string()
    }

    /// Check that the values can be used to build resource names
    pub fn validate(&self) -> Result<()> {
        if self.project_name.is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "project name must not be empty".to_string(),
            ));
        }

        let valid = self
            .project_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if !valid {
            return Err(SupervisorError::InvalidConfig(format!(
                "project name '{}' may only contain ASCII letters, digits, '_', '-' and '.'",
                self.project_name
            )));
        }

        if self.startup_wait_ms == 0 {
            return Err(SupervisorError::InvalidConfig(
                "startup wait must be greater than zero".to_string(),
            ));
        }

        if self.executable.as_os_str().is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "runtime executable must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
