//! Container handles
//!
//! A [`Container`] is bound to one running container and the local runtime
//! process (`run` or `start --attach`) that keeps it attached. Its state
//! machine:
//!
//! ```text
//! CREATED → READY → RUNNING ⇄ {EXEC, COPY} → STOPPING → STOPPED / REMOVED
//!    └────────┴──→ ERROR (readiness timeout or early exit)
//! ```
//!
//! `EXEC` and `COPY` are advisory while an operation is in flight; the
//! handle returns to `RUNNING` when it finishes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::command;
use crate::error::FailureTracker;
use crate::launcher::{LogContext, OutputSink, ProcessHandle};
use crate::readiness::{self, ReadinessTarget};
use crate::resource::ManagedResource;
use crate::runtime::RuntimeContext;
use crate::spec::ContainerSpec;
use crate::types::{audit_code, ContainerRecord};
use crate::{Result, SupervisorError, CLOSE_WAIT, STOP_WAIT};

/// Lifecycle state of a [`Container`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    Created,
    Ready,
    Running,
    Exec,
    Copy,
    Stopping,
    Stopped,
    Removed,
    Error,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Exec => "EXEC",
            Self::Copy => "COPY",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Removed => "REMOVED",
            Self::Error => "ERROR",
        }
    }

    /// States from which exec and copy are accepted
    pub fn accepts_operations(&self) -> bool {
        matches!(self, Self::Running | Self::Exec | Self::Copy)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an `exec` ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The command finished with this exit code
    Exited(i32),
    /// The exec process was terminated by a signal
    Killed,
    /// Still running when the timeout elapsed. The command was not killed;
    /// its outcome is unknown.
    TimedOut,
}

impl ExecOutcome {
    /// Exit code, if the command finished normally
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

/// Handle to one supervised container
pub struct Container {
    name: String,
    pod: Option<String>,
    spec: ContainerSpec,
    runtime: Arc<RuntimeContext>,
    process: tokio::sync::Mutex<Option<ProcessHandle>>,
    state: Mutex<ContainerState>,
}

impl Container {
    pub(crate) fn new(
        name: String,
        pod: Option<String>,
        spec: ContainerSpec,
        runtime: Arc<RuntimeContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            pod,
            spec,
            runtime,
            process: tokio::sync::Mutex::new(None),
            state: Mutex::new(ContainerState::Created),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pod this container joined, if any
    pub fn pod_name(&self) -> Option<&str> {
        self.pod.as_deref()
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn state(&self) -> ContainerState {
        *self.state.lock()
    }

    /// PID of the local runtime process attached to the container
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|p| p.pid())
    }

    fn set_state(&self, state: ContainerState) {
        let mut current = self.state.lock();
        tracing::trace!(container = %self.name, from = %*current, to = %state, "State change");
        *current = state;
    }

    fn record(&self) -> ContainerRecord {
        match &self.pod {
            Some(pod) => ContainerRecord::in_pod(&self.name, pod),
            None => ContainerRecord::new(&self.name),
        }
    }

    /// Spawn `args` as the attached process and wait for readiness.
    ///
    /// The store record must already exist.
    pub(crate) async fn launch(self: &Arc<Self>, label: &str, args: Vec<String>) -> Result<()> {
        let context = LogContext::for_resource(&self.name).with_source(label);
        let process = self
            .runtime
            .launcher
            .execute_logged(&context, label, &args, OutputSink::Trace)?;
        let command_line = process.command_line().to_string();
        *self.process.lock().await = Some(process);
        self.set_state(ContainerState::Created);

        let outcome = readiness::wait_until_ready(
            Arc::clone(self),
            Arc::clone(&self.spec.ready_check),
            self.runtime.startup_wait(),
            &command_line,
        )
        .await;

        match outcome {
            Ok(()) => {
                self.set_state(ContainerState::Running);
                Ok(())
            }
            Err(e) => {
                self.set_state(ContainerState::Error);
                Err(e)
            }
        }
    }

    /// Restart a stopped container and wait for it to become ready again
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let state = self.state();
        if state != ContainerState::Stopped {
            return Err(SupervisorError::InvalidState {
                name: self.name.clone(),
                state,
                operation: "start",
            });
        }

        let record = self.record();
        self.runtime.with_store(|store| store.container_put(&record))?;
        self.launch("start", command::start_arguments(&self.name))
            .await
    }

    /// Run `command` in the container, waiting at most `timeout`.
    ///
    /// [`ExecOutcome::TimedOut`] is not a failure: the command may still be
    /// running inside the container.
    pub async fn exec(&self, command: &[String], timeout: Duration) -> Result<ExecOutcome> {
        self.exec_until(command, Some(timeout)).await
    }

    /// Run `command` in the container and wait for it however long it takes
    pub async fn exec_indefinitely(&self, command: &[String]) -> Result<ExecOutcome> {
        self.exec_until(command, None).await
    }

    async fn exec_until(&self, command: &[String], timeout: Option<Duration>) -> Result<ExecOutcome> {
        let _busy = self.enter(ContainerState::Exec, "exec")?;
        let context = LogContext::for_resource(&self.name).with_source("exec");
        let mut process = self.runtime.launcher.execute_logged(
            &context,
            "exec",
            &command::exec_arguments(&self.name, command),
            OutputSink::Trace,
        )?;

        let status = match timeout {
            Some(limit) => process.wait_timeout(limit).await?,
            None => Some(process.wait().await?),
        };

        Ok(match status {
            Some(status) => match status.code() {
                Some(code) => ExecOutcome::Exited(code),
                None => ExecOutcome::Killed,
            },
            None => {
                tracing::warn!(
                    container = %self.name,
                    command = process.command_line(),
                    "exec did not finish within timeout; outcome unknown"
                );
                ExecOutcome::TimedOut
            }
        })
    }

    /// Copy a host file or directory into the container
    pub async fn copy_into(&self, source: impl AsRef<Path>, destination: &str) -> Result<()> {
        let _busy = self.enter(ContainerState::Copy, "copy")?;
        let context = LogContext::for_resource(&self.name).with_source("copy");
        self.runtime
            .run_checked(
                &context,
                "cp",
                &command::copy_into_arguments(&self.name, source.as_ref(), destination),
            )
            .await
    }

    /// Copy a file or directory out of the container onto the host
    pub async fn copy_from(&self, source: &str, destination: impl AsRef<Path>) -> Result<()> {
        let _busy = self.enter(ContainerState::Copy, "copy")?;
        let context = LogContext::for_resource(&self.name).with_source("copy");
        self.runtime
            .run_checked(
                &context,
                "cp",
                &command::copy_from_arguments(&self.name, source, destination.as_ref()),
            )
            .await
    }

    /// Gracefully stop the container.
    ///
    /// Fails with [`SupervisorError::StillAlive`] if the attached process is
    /// still running after the grace wait; the record is kept in that case.
    pub async fn stop(&self) -> Result<()> {
        let state = self.state();
        if state == ContainerState::Removed {
            return Err(SupervisorError::InvalidState {
                name: self.name.clone(),
                state,
                operation: "stop",
            });
        }

        self.set_state(ContainerState::Stopping);
        let context = LogContext::for_resource(&self.name);
        if let Err(e) = self
            .runtime
            .run_tolerant(&context, "stop", &command::stop_arguments(&self.name))
            .await
        {
            // Nothing was asked of the runtime
            self.set_state(state);
            return Err(e);
        }

        if !self.wait_for_exit(STOP_WAIT).await? {
            self.set_state(ContainerState::Error);
            return Err(SupervisorError::StillAlive {
                name: self.name.clone(),
            });
        }

        self.runtime
            .with_store(|store| store.container_delete(&self.name))?;
        self.set_state(ContainerState::Stopped);
        Ok(())
    }

    /// Stop and remove the container, then forget its record.
    ///
    /// Every step is attempted; a process that outlives the wait is only
    /// logged. Closing a removed container does nothing.
    pub async fn close(&self) -> Result<()> {
        if self.state() == ContainerState::Removed {
            return Ok(());
        }

        self.set_state(ContainerState::Stopping);
        let context = LogContext::for_resource(&self.name);
        let mut failures = FailureTracker::new();

        failures.record(
            self.runtime
                .run_tolerant(&context, "stop", &command::stop_arguments(&self.name))
                .await,
        );
        failures.record(
            self.runtime
                .run_tolerant(&context, "rm", &command::remove_arguments(&self.name))
                .await,
        );

        if let Some(false) = failures.record(self.wait_for_exit(CLOSE_WAIT).await) {
            tracing::warn!(
                container = %self.name,
                "Container process is still alive after {:?}",
                CLOSE_WAIT
            );
        }

        failures.record(
            self.runtime
                .with_store(|store| store.container_delete(&self.name)),
        );
        self.set_state(ContainerState::Removed);
        self.runtime
            .audit(audit_code::CONTAINER_REMOVED, format!("Removed container {}", self.name));

        failures.finish()
    }

    /// Removed as a side effect of its pod being removed
    pub(crate) fn mark_removed(&self) {
        self.set_state(ContainerState::Removed);
    }

    /// Wait for the attached process; false if it is still alive after `limit`
    pub(crate) async fn wait_for_exit(&self, limit: Duration) -> Result<bool> {
        let mut process = self.process.lock().await;
        match process.as_mut() {
            Some(process) => Ok(process.wait_timeout(limit).await?.is_some()),
            None => Ok(true),
        }
    }

    fn enter(&self, transient: ContainerState, operation: &'static str) -> Result<Busy<'_>> {
        let mut state = self.state.lock();
        if !state.accepts_operations() {
            return Err(SupervisorError::InvalidState {
                name: self.name.clone(),
                state: *state,
                operation,
            });
        }
        *state = transient;
        Ok(Busy {
            state: &self.state,
            transient,
        })
    }
}

/// Puts the handle back to `RUNNING` when an exec or copy ends
struct Busy<'a> {
    state: &'a Mutex<ContainerState>,
    transient: ContainerState,
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if *state == self.transient {
            *state = ContainerState::Running;
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("pod", &self.pod)
            .field("state", &self.state())
            .field("image", &self.spec.full_image_name())
            .finish()
    }
}

#[async_trait]
impl ReadinessTarget for Container {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_process_alive(&self) -> bool {
        match self.process.lock().await.as_mut() {
            Some(process) => process.is_alive(),
            None => false,
        }
    }

    async fn reports_up(&self) -> Result<bool> {
        self.runtime.reports_up(&self.name).await
    }

    async fn exit_description(&self) -> String {
        match self
            .process
            .lock()
            .await
            .as_mut()
            .and_then(|process| process.try_status())
        {
            Some(status) => status.to_string(),
            None => "no exit status".to_string(),
        }
    }

    fn on_live(&self) {
        self.set_state(ContainerState::Ready);
    }
}

#[async_trait]
impl ManagedResource for Container {
    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> Result<()> {
        Container::close(self).await
    }
}
