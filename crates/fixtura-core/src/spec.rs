//! Container specifications: image, arguments, environment, mounts and ports

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::readiness::{AlwaysReady, ReadyCheck};

/// Transport protocol of a published port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// A port published from a container (or pod) to the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortPublish {
    /// Host address to bind; all addresses if absent
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortPublish {
    /// A TCP port published on all host addresses
    pub fn tcp(host_port: u16, container_port: u16) -> Self {
        Self {
            host_ip: None,
            host_port,
            container_port,
            protocol: Protocol::Tcp,
        }
    }

    /// A UDP port published on all host addresses
    pub fn udp(host_port: u16, container_port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            ..Self::tcp(host_port, container_port)
        }
    }

    /// Bind to a specific host address
    pub fn on_host_ip(mut self, ip: impl Into<String>) -> Self {
        self.host_ip = Some(ip.into());
        self
    }

    /// The `--publish` argument value: `[HOST_IP:]HOST:CONTAINER/PROTO`
    pub fn to_argument(&self) -> String {
        match &self.host_ip {
            Some(ip) => format!(
                "{}:{}:{}/{}",
                ip,
                self.host_port,
                self.container_port,
                self.protocol.as_str()
            ),
            None => format!(
                "{}:{}/{}",
                self.host_port,
                self.container_port,
                self.protocol.as_str()
            ),
        }
    }
}

/// A host directory mounted into a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: String,
}

impl VolumeMount {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
        }
    }

    /// The `--volume` argument value: `HOST:CONTAINER`, with the host side absolute
    pub fn to_argument(&self) -> String {
        let host = if self.host_path.is_absolute() {
            self.host_path.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.host_path))
                .unwrap_or_else(|_| self.host_path.clone())
        };
        format!("{}:{}", host.display(), self.container_path)
    }
}

/// Everything needed to run one container
#[derive(Clone)]
pub struct ContainerSpec {
    /// Registry host, e.g. `quay.io`; empty for the runtime's default
    pub registry: String,
    /// Repository name, e.g. `library/postgres`
    pub name: String,
    pub tag: String,
    /// Optional content digest, e.g. `sha256:...`
    pub digest: Option<String>,
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub volume_mounts: Vec<VolumeMount>,
    pub ports: Vec<PortPublish>,
    pub ready_check: Arc<dyn ReadyCheck>,
}

impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerSpec")
            .field("image", &self.full_image_name())
            .field("arguments", &self.arguments)
            .field("environment", &self.environment)
            .field("volume_mounts", &self.volume_mounts)
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}

impl ContainerSpec {
    /// A spec for `registry/name:tag` that is ready as soon as it is up
    pub fn new(
        registry: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            tag: tag.into(),
            digest: None,
            arguments: Vec::new(),
            environment: BTreeMap::new(),
            volume_mounts: Vec::new(),
            ports: Vec::new(),
            ready_check: Arc::new(AlwaysReady),
        }
    }

    /// Pin the image to a digest
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Append a container argument
    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    /// Set an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Add a volume mount
    pub fn with_volume(mut self, mount: VolumeMount) -> Self {
        self.volume_mounts.push(mount);
        self
    }

    /// Publish a port (ignored for containers started inside a pod)
    pub fn with_port(mut self, port: PortPublish) -> Self {
        self.ports.push(port);
        self
    }

    /// Replace the readiness capability
    pub fn with_ready_check(mut self, check: impl ReadyCheck + 'static) -> Self {
        self.ready_check = Arc::new(check);
        self
    }

    /// The image reference passed to the runtime
    pub fn full_image_name(&self) -> String {
        let mut image = String::new();
        if !self.registry.is_empty() {
            image.push_str(&self.registry);
            image.push('/');
        }
        image.push_str(&self.name);
        image.push(':');
        image.push_str(&self.tag);
        if let Some(digest) = &self.digest {
            image.push('@');
            image.push_str(digest);
        }
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_arguments() {
        assert_eq!(PortPublish::tcp(8080, 80).to_argument(), "8080:80/tcp");
        assert_eq!(PortPublish::udp(5353, 53).to_argument(), "5353:53/udp");
        assert_eq!(
            PortPublish::tcp(5432, 5432)
                .on_host_ip("127.0.0.1")
                .to_argument(),
            "127.0.0.1:5432:5432/tcp"
        );
    }

    #[test]
    fn test_volume_argument_is_absolute() {
        let mount = VolumeMount::new("data", "/var/lib/data");
        let arg = mount.to_argument();
        let (host, container) = arg.rsplit_once(':').unwrap();
        assert!(PathBuf::from(host).is_absolute());
        assert!(host.ends_with("data"));
        assert_eq!(container, "/var/lib/data");

        let mount = VolumeMount::new("/srv/x", "/x");
        assert_eq!(mount.to_argument(), "/srv/x:/x");
    }

    #[test]
    fn test_full_image_name() {
        let spec = ContainerSpec::new("quay.io", "example/postgres", "16");
        assert_eq!(spec.full_image_name(), "quay.io/example/postgres:16");

        let spec = ContainerSpec::new("", "alpine", "3.19").with_digest("sha256:abcd");
        assert_eq!(spec.full_image_name(), "alpine:3.19@sha256:abcd");
    }

    #[test]
    fn test_environment_is_sorted() {
        let spec = ContainerSpec::new("", "alpine", "3")
            .with_env("ZED", "1")
            .with_env("ALPHA", "2")
            .with_env("MIDDLE", "3");
        let keys: Vec<_> = spec.environment.keys().cloned().collect();
        assert_eq!(keys, vec!["ALPHA", "MIDDLE", "ZED"]);
    }

    #[test]
    fn test_debug_hides_ready_check() {
        let spec = ContainerSpec::new("docker.io", "library/redis", "7");
        let text = format!("{:?}", spec);
        assert!(text.contains("docker.io/library/redis:7"));
    }
}
