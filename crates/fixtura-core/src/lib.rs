//! Fixtura Core - Supervised containers and pods for ephemeral test fixtures
//!
//! Fixtura drives an external container runtime (podman by default) to start
//! the databases, brokers and servers a test suite needs, waits until they can
//! serve, and removes them afterwards. A small SQLite store records every
//! resource before it is spawned, so the next run can clean up after a run
//! that crashed.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! 1. **Store** (`store`): schema-versioned records of live pods and containers, plus an audit log
//! 2. **Names** (`names`): project-scoped names with a 72-bit random token
//! 3. **Launcher** (`launcher`): spawns the runtime and drains its output on background tasks
//! 4. **Readiness** (`readiness`): liveness then application readiness, under one deadline
//! 5. **Handles** (`container`, `pod`): start, stop, exec and copy for one resource
//! 6. **Supervisor** (`supervisor`, `factory`): registry, crash recovery, aggregated teardown
//!
//! # Quick Start
//!
//! ```no_run
//! use fixtura_core::{
//!     ContainerSpec, PortPublish, SupervisorConfig, SupervisorFactory, SupervisorScope,
//!     TcpSocketRead,
//! };
//! use std::time::Duration;
//!
//! # async fn run() -> fixtura_core::Result<()> {
//! let config = SupervisorConfig::new("billing").with_startup_wait(Duration::from_secs(60));
//!
//! // None if podman is missing and the configuration says to skip
//! let Some(supervisor) = SupervisorFactory::create(config, SupervisorScope::PerSuite).await?
//! else {
//!     return Ok(());
//! };
//!
//! let redis = supervisor
//!     .start(
//!         ContainerSpec::new("docker.io", "library/redis", "7")
//!             .with_port(PortPublish::tcp(16379, 6379))
//!             .with_ready_check(TcpSocketRead::new("127.0.0.1", 16379)),
//!     )
//!     .await?;
//!
//! let outcome = redis
//!     .exec(&["redis-cli".into(), "ping".into()], Duration::from_secs(5))
//!     .await?;
//! assert!(outcome.is_success());
//!
//! supervisor.close().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

use std::time::Duration;

pub mod command;
pub mod config;
pub mod container;
pub mod error;
pub mod factory;
pub mod launcher;
pub mod names;
pub mod pod;
pub mod readiness;
pub mod resource;
mod runtime;
pub mod spec;
pub mod store;
pub mod supervisor;
pub mod types;

// Re-export commonly used types for convenience
pub use config::SupervisorConfig;
pub use container::{Container, ContainerState, ExecOutcome};
pub use error::{FailureTracker, Result, ResultExt, SupervisorError};
pub use factory::{ContainerBackend, SupervisorFactory};
pub use launcher::{LogContext, OutputSink, ProcessHandle, ProcessLauncher};
pub use names::{NameAllocator, ResourceKind};
pub use pod::Pod;
pub use readiness::{AlwaysReady, ReadyCheck, TcpSocketRead};
pub use resource::{ContainerFactory, ManagedResource};
pub use spec::{ContainerSpec, PortPublish, Protocol, VolumeMount};
pub use store::{ContainerStore, SCHEMA_VERSION};
pub use supervisor::Supervisor;
pub use types::{audit_code, AuditEvent, ContainerRecord, PodRecord, SupervisorScope};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// First component of every container and pod name
pub const NAME_PREFIX: &str = "FIXTURA";

/// Marks pod names: `FIXTURA-POD-<project>-<token>`
pub const POD_INFIX: &str = "POD";

/// Status text (upper-cased) of a running container starts with this
pub const UP_STATUS_PREFIX: &str = "UP ";

/// Runtime executable used when none is configured
pub const DEFAULT_EXECUTABLE: &str = "podman";

/// Default upper bound on container startup, in milliseconds
pub const DEFAULT_STARTUP_WAIT_MS: u64 = 30_000;

/// Interval between application readiness checks
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `stop` and `rm` invocations are waited for
pub const RUNTIME_COMMAND_WAIT: Duration = Duration::from_secs(3);

/// How long [`Container::stop`] waits for the attached process to exit
pub const STOP_WAIT: Duration = Duration::from_secs(5);

/// How long a close waits for the attached process to exit
pub const CLOSE_WAIT: Duration = Duration::from_secs(10);

/// How long stdout is still collected after a status query exits
pub const STATUS_SETTLE: Duration = Duration::from_secs(1);
