//! Capabilities shared by supervisors, pods and containers

use async_trait::async_trait;
use std::sync::Arc;

use crate::container::Container;
use crate::spec::ContainerSpec;
use crate::Result;

/// Something that starts containers: a supervisor, or a pod that new
/// containers join.
#[async_trait]
pub trait ContainerFactory: Send + Sync {
    /// Start a container from `spec` and wait until it is ready
    async fn start(&self, spec: ContainerSpec) -> Result<Arc<Container>>;
}

/// A runtime resource with a name that can be torn down
#[async_trait]
pub trait ManagedResource: Send + Sync {
    fn name(&self) -> &str;

    /// Remove the resource and forget its record
    async fn close(&self) -> Result<()>;
}
