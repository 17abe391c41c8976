//! Runtime probe and supervisor construction

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::command;
use crate::config::SupervisorConfig;
use crate::launcher::{LogContext, ProcessLauncher};
use crate::supervisor::Supervisor;
use crate::types::SupervisorScope;
use crate::{Result, SupervisorError};

/// Bound on the `version` probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A container runtime found on this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerBackend {
    /// Executable name, e.g. `podman`
    pub name: String,
    /// Version the runtime reports for its client
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct VersionReport {
    #[serde(rename = "Client")]
    client: Option<VersionSection>,
    #[serde(rename = "Version")]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionSection {
    #[serde(rename = "Version")]
    version: String,
}

/// Parse the JSON printed by `version --format json`
pub fn parse_version_report(json: &str) -> Result<String> {
    let report: VersionReport = serde_json::from_str(json)?;
    report
        .client
        .map(|client| client.version)
        .or(report.version)
        .ok_or_else(|| SupervisorError::Unsupported("no version in runtime report".to_string()))
}

/// Entry point for building supervisors
#[derive(Debug, Clone, Copy, Default)]
pub struct SupervisorFactory;

impl SupervisorFactory {
    /// Probe the configured runtime; `None` if it is missing or unusable
    pub async fn is_supported(config: &SupervisorConfig) -> Option<ContainerBackend> {
        match Self::probe(config).await {
            Ok(backend) => {
                tracing::debug!(name = %backend.name, version = %backend.version, "Container runtime found");
                Some(backend)
            }
            Err(e) => {
                tracing::debug!(executable = %config.executable.display(), error = %e, "Container runtime unsupported");
                None
            }
        }
    }

    async fn probe(config: &SupervisorConfig) -> Result<ContainerBackend> {
        let launcher = ProcessLauncher::new(config.executable.clone());
        let context = LogContext::supervisor().with_source("probe");
        let args = command::version_arguments();

        let (status, lines) = tokio::time::timeout(
            PROBE_TIMEOUT,
            launcher.output(&context, "version", &args, Duration::from_secs(1)),
        )
        .await
        .map_err(|_| {
            SupervisorError::Unsupported(format!(
                "'{}' did not answer within {:?}",
                launcher.command_line(&args),
                PROBE_TIMEOUT
            ))
        })??;

        if !status.success() {
            return Err(SupervisorError::NonZeroExit {
                command: launcher.command_line(&args),
                code: status.code(),
            });
        }

        Ok(ContainerBackend {
            name: config.executable_name(),
            version: parse_version_report(&lines.join("\n"))?,
        })
    }

    /// Build a supervisor and clean up whatever earlier runs left behind.
    ///
    /// If the runtime is unsupported this returns `Ok(None)` when the
    /// configuration says to disable, and [`SupervisorError::Unsupported`]
    /// otherwise.
    pub async fn create(
        config: SupervisorConfig,
        scope: SupervisorScope,
    ) -> Result<Option<Supervisor>> {
        config.validate()?;

        if Self::is_supported(&config).await.is_none() {
            if config.disabled_if_unsupported {
                tracing::warn!(
                    executable = %config.executable.display(),
                    "Container runtime unsupported; supervisor disabled"
                );
                return Ok(None);
            }
            return Err(SupervisorError::Unsupported(config.executable_name()));
        }

        let supervisor = Supervisor::open(config, scope)?;
        if let Err(e) = supervisor.startup_recover().await {
            if let Err(close_error) = supervisor.close().await {
                tracing::warn!(error = %close_error, "Failed to close supervisor after recovery failure");
            }
            return Err(e);
        }
        Ok(Some(supervisor))
    }
}
