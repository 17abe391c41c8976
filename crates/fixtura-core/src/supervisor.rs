//! The container supervisor
//!
//! A [`Supervisor`] owns one project's store and the in-memory registry of
//! the containers and pods it started. It follows a write-ahead discipline:
//! a record is stored before its runtime process is spawned, and removed only
//! after teardown of the resource has been attempted. Whatever a crashed run
//! left behind is found and removed by [`Supervisor::startup_recover`].
//!
//! Calls into one supervisor may come from several tasks; registry and store
//! mutations are short critical sections behind mutexes.
//!
//! # Example
//!
//! ```no_run
//! use fixtura_core::{ContainerSpec, PortPublish, Supervisor, SupervisorConfig, SupervisorScope};
//!
//! # async fn run() -> fixtura_core::Result<()> {
//! let config = SupervisorConfig::new("shop");
//! let supervisor = Supervisor::open(config, SupervisorScope::PerSuite)?;
//! supervisor.startup_recover().await?;
//!
//! let pod = supervisor.create_pod(vec![PortPublish::tcp(15432, 5432)]).await?;
//! let db = pod.start(ContainerSpec::new("docker.io", "library/postgres", "16")).await?;
//! println!("started {}", db.name());
//!
//! supervisor.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use crate::command;
use crate::config::SupervisorConfig;
use crate::container::Container;
use crate::error::FailureTracker;
use crate::launcher::LogContext;
use crate::names::ResourceKind;
use crate::pod::Pod;
use crate::resource::ContainerFactory;
use crate::runtime::RuntimeContext;
use crate::spec::{ContainerSpec, PortPublish};
use crate::store::ContainerStore;
use crate::types::{audit_code, AuditEvent, ContainerRecord, PodRecord, SupervisorScope};
use crate::{Result, SupervisorError};

/// Live handles of one supervisor
#[derive(Debug, Default)]
pub(crate) struct Registry {
    containers: Mutex<HashMap<String, Arc<Container>>>,
    pods: Mutex<HashMap<String, Arc<Pod>>>,
}

impl Registry {
    fn insert_container(&self, container: Arc<Container>) {
        self.containers
            .lock()
            .insert(container.name().to_string(), container);
    }

    fn insert_pod(&self, pod: Arc<Pod>) {
        self.pods.lock().insert(pod.name().to_string(), pod);
    }

    pub(crate) fn remove_pod(&self, name: &str) {
        self.pods.lock().remove(name);
    }

    pub(crate) fn pod_members(&self, pod: &str) -> Vec<Arc<Container>> {
        self.containers
            .lock()
            .values()
            .filter(|c| c.pod_name() == Some(pod))
            .cloned()
            .collect()
    }

    /// Unregister and return every container that joined `pod`
    pub(crate) fn take_pod_members(&self, pod: &str) -> Vec<Arc<Container>> {
        let mut taken = Vec::new();
        self.containers.lock().retain(|_, container| {
            if container.pod_name() == Some(pod) {
                taken.push(Arc::clone(container));
                false
            } else {
                true
            }
        });
        taken
    }

    fn containers(&self) -> Vec<Arc<Container>> {
        self.containers.lock().values().cloned().collect()
    }

    fn pods(&self) -> Vec<Arc<Pod>> {
        self.pods.lock().values().cloned().collect()
    }

    fn drain_containers(&self) -> Vec<Arc<Container>> {
        self.containers.lock().drain().map(|(_, c)| c).collect()
    }

    fn drain_pods(&self) -> Vec<Arc<Pod>> {
        self.pods.lock().drain().map(|(_, p)| p).collect()
    }
}

/// Record, register, spawn and wait for one container
pub(crate) async fn start_container(
    runtime: &Arc<RuntimeContext>,
    registry: &Registry,
    pod: Option<&str>,
    spec: ContainerSpec,
) -> Result<Arc<Container>> {
    let name = runtime.names.container_name();
    let record = match pod {
        Some(pod) => ContainerRecord::in_pod(&name, pod),
        None => ContainerRecord::new(&name),
    };
    runtime.with_store(|store| store.container_put(&record))?;

    let arguments = command::run_arguments(&name, &spec, pod);
    let container = Container::new(
        name.clone(),
        pod.map(str::to_string),
        spec,
        Arc::clone(runtime),
    );
    registry.insert_container(Arc::clone(&container));
    runtime.audit(
        audit_code::CONTAINER_CREATED,
        format!("Created container {} ({})", name, container.spec().full_image_name()),
    );

    container
        .launch("run", arguments)
        .instrument(LogContext::for_resource(&name).span())
        .await?;

    tracing::debug!(container = %name, "Container appears to be running");
    Ok(container)
}

/// Creates, tracks and tears down the containers and pods of one project
pub struct Supervisor {
    runtime: Arc<RuntimeContext>,
    registry: Arc<Registry>,
    closed: AtomicBool,
}

impl Supervisor {
    /// Open the project's store (creating or migrating it) and build a supervisor.
    ///
    /// Does not touch the runtime; call [`Supervisor::startup_recover`] next.
    pub fn open(config: SupervisorConfig, scope: SupervisorScope) -> Result<Self> {
        config.validate()?;
        let store = ContainerStore::open(config.store_path())?;
        Ok(Self::with_store(config, store, scope))
    }

    /// Build a supervisor over an already opened store
    pub fn with_store(config: SupervisorConfig, store: ContainerStore, scope: SupervisorScope) -> Self {
        let runtime = Arc::new(RuntimeContext::new(config, store, scope));
        runtime.audit(
            audit_code::SUPERVISOR_OPENED,
            format!(
                "Supervisor opened for project {} ({})",
                runtime.config.project_name, scope
            ),
        );
        tracing::info!(
            project = %runtime.config.project_name,
            instance = %runtime.instance_id,
            scope = %scope,
            "Supervisor opened"
        );

        Self {
            runtime,
            registry: Arc::new(Registry::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.runtime.config
    }

    pub fn project(&self) -> &str {
        &self.runtime.config.project_name
    }

    pub fn instance_id(&self) -> Uuid {
        self.runtime.instance_id
    }

    pub fn scope(&self) -> SupervisorScope {
        self.runtime.scope
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Live container handles
    pub fn containers(&self) -> Vec<Arc<Container>> {
        self.registry.containers()
    }

    /// Live pod handles
    pub fn pods(&self) -> Vec<Arc<Pod>> {
        self.registry.pods()
    }

    /// Container records in the store
    pub fn container_records(&self) -> Result<Vec<ContainerRecord>> {
        self.runtime.with_store(|store| store.container_list())
    }

    /// Pod records in the store
    pub fn pod_records(&self) -> Result<Vec<PodRecord>> {
        self.runtime.with_store(|store| store.pod_list())
    }

    /// The most recent audit events, newest first
    pub fn audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        self.runtime.with_store(|store| store.audit_list(limit))
    }

    /// Store statistics
    pub fn stats(&self) -> Result<serde_json::Value> {
        self.runtime.with_store(|store| store.stats())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(SupervisorError::StoreClosed)
        } else {
            Ok(())
        }
    }

    /// Remove every container and pod recorded in the store.
    ///
    /// Containers are stopped and removed first, then pods. Every resource is
    /// attempted; failures are reported together at the end, and the record
    /// of a resource that failed is kept for the next attempt.
    pub async fn startup_recover(&self) -> Result<()> {
        self.ensure_open()?;
        let span = LogContext::supervisor().with_source("recovery").span();
        self.recover_all().instrument(span).await
    }

    async fn recover_all(&self) -> Result<()> {
        let containers = self.container_records()?;
        let pods = self.pod_records()?;
        let mut failures = FailureTracker::new();
        // Foreign records stay in the store; they are only counted
        let mut skipped = 0usize;

        tracing::debug!("Cleaning up {} old containers", containers.len());
        let mut containers_removed = 0usize;
        for record in &containers {
            if self.runtime.names.classify(&record.name) != Some(ResourceKind::Container) {
                tracing::warn!(name = %record.name, "Skipping record outside this project's namespace");
                skipped += 1;
                continue;
            }
            if failures.record(self.recover_container(&record.name).await).is_some() {
                containers_removed += 1;
            }
        }

        tracing::debug!("Cleaning up {} old pods", pods.len());
        let mut pods_removed = 0usize;
        for record in &pods {
            if self.runtime.names.classify(&record.name) != Some(ResourceKind::Pod) {
                tracing::warn!(name = %record.name, "Skipping record outside this project's namespace");
                skipped += 1;
                continue;
            }
            if failures.record(self.recover_pod(&record.name).await).is_some() {
                pods_removed += 1;
            }
        }

        let failed = failures.len();
        let outcome = failures.finish();
        match &outcome {
            Ok(()) => self.runtime.audit(
                audit_code::RECOVERY_COMPLETED,
                format!(
                    "Removed {} containers and {} pods left by earlier runs; skipped {} foreign records",
                    containers_removed, pods_removed, skipped
                ),
            ),
            Err(e) => {
                tracing::error!(failed, skipped, error = %e, "Crash recovery incomplete");
                self.runtime.audit(
                    audit_code::RECOVERY_FAILED,
                    format!("{}; skipped {} foreign records", e, skipped),
                );
            }
        }
        outcome
    }

    async fn recover_container(&self, name: &str) -> Result<()> {
        self.runtime.stop_and_remove(name).await?;
        self.runtime.with_store(|store| store.container_delete(name))?;
        Ok(())
    }

    async fn recover_pod(&self, name: &str) -> Result<()> {
        let context = LogContext::for_resource(name);
        self.runtime
            .run_checked(&context, "pod-rm", &command::pod_remove_arguments(name))
            .await?;
        self.runtime.with_store(|store| store.pod_delete(name))?;
        Ok(())
    }

    /// Start a standalone container and wait until it is ready.
    ///
    /// On a readiness timeout the container is left in place (and in the
    /// store) for inspection; [`Supervisor::close`] removes it.
    pub async fn start(&self, spec: ContainerSpec) -> Result<Arc<Container>> {
        self.ensure_open()?;
        start_container(&self.runtime, &self.registry, None, spec).await
    }

    /// Create a pod publishing `ports`; containers started through it join it
    pub async fn create_pod(&self, ports: Vec<PortPublish>) -> Result<Arc<Pod>> {
        self.ensure_open()?;
        let name = self.runtime.names.pod_name();
        self.runtime.with_store(|store| store.pod_put(&name))?;

        let context = LogContext::for_resource(&name);
        self.runtime
            .run_checked(
                &context,
                "pod-create",
                &command::pod_create_arguments(&name, &ports),
            )
            .await?;

        let pod = Pod::new(
            name.clone(),
            ports,
            Arc::clone(&self.runtime),
            Arc::clone(&self.registry),
        );
        self.registry.insert_pod(Arc::clone(&pod));
        self.runtime
            .audit(audit_code::POD_CREATED, format!("Created pod {}", name));
        Ok(pod)
    }

    /// Tear everything down: pods, then containers, then the records of the
    /// removed pods, then the store. Every step is attempted; failures come
    /// back as one [`SupervisorError::Teardown`]. Closing twice does nothing.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let span = LogContext::supervisor().span();
        self.close_all().instrument(span).await
    }

    async fn close_all(&self) -> Result<()> {
        let mut failures = FailureTracker::new();

        let pods = self.registry.drain_pods();
        tracing::debug!("Shutting down {} pods", pods.len());
        let mut removed_pods = Vec::with_capacity(pods.len());
        for pod in &pods {
            if failures.record(pod.close().await).is_some() {
                removed_pods.push(pod);
            }
        }

        let containers = self.registry.drain_containers();
        tracing::debug!("Shutting down {} containers", containers.len());
        for container in &containers {
            failures.record(container.close().await);
        }

        // A pod whose removal failed keeps its record for crash recovery
        tracing::debug!("Deleting pod records");
        for pod in &removed_pods {
            failures.record(self.runtime.with_store(|store| store.pod_delete(pod.name())));
        }

        self.runtime.audit(
            audit_code::SUPERVISOR_CLOSED,
            format!(
                "Supervisor closed ({} pods, {} containers, {} failures)",
                pods.len(),
                containers.len(),
                failures.len()
            ),
        );

        if let Some(store) = self.runtime.take_store() {
            failures.record(store.close());
        }

        let outcome = failures.finish();
        match &outcome {
            Ok(()) => tracing::info!(instance = %self.runtime.instance_id, "Supervisor closed"),
            Err(e) => tracing::error!(error = %e, "Supervisor closed with failures"),
        }
        outcome
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if !self.is_closed() {
            tracing::warn!(
                instance = %self.runtime.instance_id,
                "Supervisor dropped without close; records remain for crash recovery"
            );
            // Pods hold the registry; release them so nothing leaks
            self.registry.drain_pods();
            self.registry.drain_containers();
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("runtime", &self.runtime)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl ContainerFactory for Supervisor {
    async fn start(&self, spec: ContainerSpec) -> Result<Arc<Container>> {
        Supervisor::start(self, spec).await
    }
}
