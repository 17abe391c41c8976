//! Readiness protocol
//!
//! Starting a container is not the same as the application inside it being
//! able to serve. Waiting happens in two phases under one deadline:
//!
//! 1. **Liveness**: poll the runtime's status query until it reports the
//!    container as `Up`, for as long as the managed process is alive.
//! 2. **Readiness**: poll the caller's [`ReadyCheck`] every
//!    [`READY_POLL_INTERVAL`](crate::READY_POLL_INTERVAL) until it says yes.
//!    A failing check counts as "not yet".
//!
//! Both phases run on a spawned task. When the deadline passes the caller gets
//! [`SupervisorError::ReadinessTimeout`] and the task is aborted at its next
//! await point, so it issues no further runtime commands.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::Instrument;

use crate::launcher::LogContext;
use crate::{Result, SupervisorError, READY_POLL_INTERVAL};

/// Caller-supplied check that the application in a container is ready.
///
/// Errors mean "not ready yet"; they are logged and polling continues.
#[async_trait]
pub trait ReadyCheck: Send + Sync {
    async fn is_ready(&self) -> anyhow::Result<bool>;
}

/// Ready as soon as the container is up
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

#[async_trait]
impl ReadyCheck for AlwaysReady {
    async fn is_ready(&self) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Ready once a TCP connection to `address:port` yields at least one byte
#[derive(Debug, Clone)]
pub struct TcpSocketRead {
    address: String,
    port: u16,
    attempt_timeout: Duration,
}

impl TcpSocketRead {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            attempt_timeout: Duration::from_secs(1),
        }
    }

    /// Bound on a single connect + read attempt
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

#[async_trait]
impl ReadyCheck for TcpSocketRead {
    async fn is_ready(&self) -> anyhow::Result<bool> {
        let attempt = async {
            let mut stream = TcpStream::connect((self.address.as_str(), self.port)).await?;
            let mut byte = [0u8; 1];
            let n = stream.read(&mut byte).await?;
            anyhow::Ok((n, byte[0]))
        };

        match tokio::time::timeout(self.attempt_timeout, attempt).await {
            Ok(Ok((1, byte))) => {
                tracing::debug!("Read: 0x{:02x}", byte);
                Ok(true)
            }
            Ok(Ok(_)) => Ok(false),
            Ok(Err(e)) => {
                tracing::trace!(
                    address = %self.address,
                    port = self.port,
                    error = %e,
                    "Socket not ready"
                );
                Ok(false)
            }
            Err(_) => Ok(false),
        }
    }
}

/// The resource whose startup the protocol waits for
#[async_trait]
pub trait ReadinessTarget: Send + Sync {
    /// Resource name, for logs and errors
    fn name(&self) -> &str;

    /// True while the locally managed process is running
    async fn is_process_alive(&self) -> bool;

    /// One status query: does the runtime report the resource as up?
    async fn reports_up(&self) -> Result<bool>;

    /// How the managed process ended, for diagnostics
    async fn exit_description(&self) -> String;

    /// Called once the liveness phase has passed
    fn on_live(&self) {}
}

/// Run both phases under `deadline`.
///
/// `command` is the command line that started the resource; it is carried in
/// the timeout error.
pub async fn wait_until_ready<T>(
    target: Arc<T>,
    check: Arc<dyn ReadyCheck>,
    deadline: Duration,
    command: &str,
) -> Result<()>
where
    T: ReadinessTarget + 'static,
{
    let span = LogContext::for_resource(target.name())
        .with_source("readiness")
        .span();

    let task_target = Arc::clone(&target);
    let mut task = tokio::spawn(
        async move {
            run_liveness_check(task_target.as_ref()).await?;
            task_target.on_live();
            run_ready_check(task_target.as_ref(), check.as_ref()).await
        }
        .instrument(span),
    );

    match tokio::time::timeout(deadline, &mut task).await {
        Ok(joined) => joined?,
        Err(_) => {
            task.abort();
            tracing::error!(name = target.name(), waited = ?deadline, "Timed out waiting for container");
            Err(SupervisorError::ReadinessTimeout {
                name: target.name().to_string(),
                command: command.to_string(),
                waited: deadline,
            })
        }
    }
}

/// Phase one: wait for the runtime to report the resource as up.
///
/// A failed status query is logged and retried; only the death of the
/// managed process ends this phase early.
pub async fn run_liveness_check<T>(target: &T) -> Result<()>
where
    T: ReadinessTarget + ?Sized,
{
    while target.is_process_alive().await {
        match target.reports_up().await {
            Ok(true) => {
                tracing::debug!("Container appears to be up");
                return Ok(());
            }
            Ok(false) => tokio::task::yield_now().await,
            Err(e) => {
                tracing::debug!(error = %e, "Status query failed");
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        }
    }

    Err(SupervisorError::ContainerExited {
        name: target.name().to_string(),
        status: target.exit_description().await,
    })
}

/// Phase two: wait for the application-level check
pub async fn run_ready_check<T>(target: &T, check: &dyn ReadyCheck) -> Result<()>
where
    T: ReadinessTarget + ?Sized,
{
    while target.is_process_alive().await {
        match check.is_ready().await {
            Ok(true) => {
                tracing::debug!("Ready check returned true");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => tracing::trace!(error = %e, "Ready check failed"),
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }

    Err(SupervisorError::ContainerExited {
        name: target.name().to_string(),
        status: target.exit_description().await,
    })
}
