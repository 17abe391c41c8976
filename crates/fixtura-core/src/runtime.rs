//! State shared by a supervisor and every handle it creates

use parking_lot::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::command;
use crate::config::SupervisorConfig;
use crate::launcher::{LogContext, OutputSink, ProcessLauncher};
use crate::names::NameAllocator;
use crate::store::ContainerStore;
use crate::types::{AuditEvent, SupervisorScope};
use crate::{Result, SupervisorError, RUNTIME_COMMAND_WAIT, STATUS_SETTLE};

pub(crate) struct RuntimeContext {
    pub(crate) config: SupervisorConfig,
    pub(crate) launcher: ProcessLauncher,
    pub(crate) names: NameAllocator,
    pub(crate) instance_id: Uuid,
    pub(crate) scope: SupervisorScope,
    // None once the supervisor has closed the store
    store: Mutex<Option<ContainerStore>>,
}

impl RuntimeContext {
    pub(crate) fn new(
        config: SupervisorConfig,
        store: ContainerStore,
        scope: SupervisorScope,
    ) -> Self {
        Self {
            launcher: ProcessLauncher::new(config.executable.clone()),
            names: NameAllocator::new(config.project_name.clone()),
            config,
            instance_id: Uuid::new_v4(),
            scope,
            store: Mutex::new(Some(store)),
        }
    }

    /// Run `f` against the open store; the lock is held for the whole call
    pub(crate) fn with_store<T>(
        &self,
        f: impl FnOnce(&mut ContainerStore) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.store.lock();
        let store = guard.as_mut().ok_or(SupervisorError::StoreClosed)?;
        f(store)
    }

    /// Take the store out, leaving later callers with `StoreClosed`
    pub(crate) fn take_store(&self) -> Option<ContainerStore> {
        self.store.lock().take()
    }

    /// Append an audit event; failures are logged, never raised
    pub(crate) fn audit(&self, code: &str, text: impl Into<String>) {
        let event = AuditEvent::now(self.instance_id, self.scope, code, text);
        if let Err(e) = self.with_store(|store| store.audit_put(&event)) {
            tracing::warn!(code, error = %e, "Failed to write audit event");
        }
    }

    /// Run a runtime command issued with `--ignore`: wait a bounded time and
    /// disregard the exit status
    pub(crate) async fn run_tolerant(
        &self,
        context: &LogContext,
        label: &str,
        args: &[String],
    ) -> Result<()> {
        let mut process = self
            .launcher
            .execute_logged(context, label, args, OutputSink::Trace)?;
        if process.wait_timeout(RUNTIME_COMMAND_WAIT).await?.is_none() {
            tracing::warn!(
                command = process.command_line(),
                "Runtime command did not finish within {:?}",
                RUNTIME_COMMAND_WAIT
            );
        }
        Ok(())
    }

    /// Run a runtime command to completion and require exit code zero
    pub(crate) async fn run_checked(
        &self,
        context: &LogContext,
        label: &str,
        args: &[String],
    ) -> Result<()> {
        self.launcher
            .execute_logged(context, label, args, OutputSink::Trace)?
            .wait_success()
            .await
    }

    /// One status query: true if the runtime reports `name` as up
    pub(crate) async fn reports_up(&self, name: &str) -> Result<bool> {
        let context = LogContext::for_resource(name).with_source("status");
        let (status, last) = self
            .launcher
            .query(
                &context,
                "status",
                &command::status_arguments(name),
                STATUS_SETTLE,
            )
            .await?;
        Ok(status.success() && last.as_deref().map(command::is_up_status).unwrap_or(false))
    }

    /// Stop then remove a container, tolerating an already absent target
    pub(crate) async fn stop_and_remove(&self, name: &str) -> Result<()> {
        let context = LogContext::for_resource(name);
        self.run_tolerant(&context, "stop", &command::stop_arguments(name))
            .await?;
        self.run_tolerant(&context, "rm", &command::remove_arguments(name))
            .await
    }

    pub(crate) fn startup_wait(&self) -> Duration {
        self.config.startup_wait()
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("project", &self.config.project_name)
            .field("instance_id", &self.instance_id)
            .field("scope", &self.scope)
            .finish()
    }
}
