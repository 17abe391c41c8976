//! Pod handles
//!
//! A pod owns the published ports for every container that joins it, and is
//! removed as a unit: one forced `pod rm` takes all members with it.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::command;
use crate::container::Container;
use crate::error::FailureTracker;
use crate::launcher::LogContext;
use crate::resource::{ContainerFactory, ManagedResource};
use crate::runtime::RuntimeContext;
use crate::spec::{ContainerSpec, PortPublish};
use crate::supervisor::{start_container, Registry};
use crate::types::audit_code;
use crate::{Result, SupervisorError, CLOSE_WAIT};

/// Handle to one supervised pod
pub struct Pod {
    name: String,
    ports: Vec<PortPublish>,
    runtime: Arc<RuntimeContext>,
    registry: Arc<Registry>,
    closed: AtomicBool,
}

impl Pod {
    pub(crate) fn new(
        name: String,
        ports: Vec<PortPublish>,
        runtime: Arc<RuntimeContext>,
        registry: Arc<Registry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            ports,
            runtime,
            registry,
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ports published by the pod
    pub fn ports(&self) -> &[PortPublish] {
        &self.ports
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Live member containers started through this pod
    pub fn members(&self) -> Vec<Arc<Container>> {
        self.registry.pod_members(&self.name)
    }

    /// Start a container joined to this pod.
    ///
    /// Ports in `spec` are ignored; a pod member shares the pod's ports.
    pub async fn start(&self, spec: ContainerSpec) -> Result<Arc<Container>> {
        if self.is_closed() {
            return Err(SupervisorError::PodNotFound(self.name.clone()));
        }
        if !spec.ports.is_empty() {
            tracing::warn!(
                pod = %self.name,
                "Ports of a pod member are ignored; publish them on the pod"
            );
        }
        start_container(&self.runtime, &self.registry, Some(&self.name), spec).await
    }

    /// Force-remove the pod and, with it, every member container.
    ///
    /// Member handles are waited for and their records deleted; then the pod
    /// record goes. If `pod rm` fails, each member is stopped and removed on
    /// its own and the pod record is kept, so crash recovery retries the pod.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let context = LogContext::for_resource(&self.name);
        let mut failures = FailureTracker::new();

        let removed = failures
            .record(
                self.runtime
                    .run_checked(
                        &context,
                        "pod-rm",
                        &command::pod_remove_arguments(&self.name),
                    )
                    .await,
            )
            .is_some();
        let members = self.registry.take_pod_members(&self.name);

        if !removed {
            tracing::warn!(
                pod = %self.name,
                members = members.len(),
                "Pod removal failed; removing members one by one"
            );
            for container in members {
                failures.record(container.close().await);
            }
            self.registry.remove_pod(&self.name);
            return failures.finish();
        }

        for container in members {
            if let Some(false) = failures.record(container.wait_for_exit(CLOSE_WAIT).await) {
                tracing::warn!(
                    container = container.name(),
                    "Container process is still alive after {:?}",
                    CLOSE_WAIT
                );
            }
            failures.record(
                self.runtime
                    .with_store(|store| store.container_delete(container.name())),
            );
            container.mark_removed();
        }

        failures.record(self.runtime.with_store(|store| store.pod_delete(&self.name)));
        self.registry.remove_pod(&self.name);
        self.runtime
            .audit(audit_code::POD_REMOVED, format!("Removed pod {}", self.name));

        failures.finish()
    }
}

impl std::fmt::Debug for Pod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pod")
            .field("name", &self.name)
            .field("ports", &self.ports)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl ContainerFactory for Pod {
    async fn start(&self, spec: ContainerSpec) -> Result<Arc<Container>> {
        Pod::start(self, spec).await
    }
}

#[async_trait]
impl ManagedResource for Pod {
    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> Result<()> {
        Pod::close(self).await
    }
}
