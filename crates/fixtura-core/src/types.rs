//! Record types shared by the store and the supervisor

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::SupervisorError;

/// The lifetime a supervisor was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisorScope {
    /// One supervisor for a whole test suite
    PerSuite,
    /// One supervisor per test class/module
    PerClass,
    /// One supervisor per test
    PerTest,
}

impl SupervisorScope {
    /// Stable name used in the store
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerSuite => "PER_SUITE",
            Self::PerClass => "PER_CLASS",
            Self::PerTest => "PER_TEST",
        }
    }
}

impl fmt::Display for SupervisorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupervisorScope {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PER_SUITE" => Ok(Self::PerSuite),
            "PER_CLASS" => Ok(Self::PerClass),
            "PER_TEST" => Ok(Self::PerTest),
            other => Err(SupervisorError::InvalidConfig(format!(
                "unknown supervisor scope '{}'",
                other
            ))),
        }
    }
}

/// A container the supervisor believes may exist in the runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    pub pod_name: Option<String>,
}

impl ContainerRecord {
    /// A standalone container
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pod_name: None,
        }
    }

    /// A container joined to a pod
    pub fn in_pod(name: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pod_name: Some(pod.into()),
        }
    }
}

/// A pod grouping zero or more containers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodRecord {
    pub name: String,
}

impl PodRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Well-known audit event codes
pub mod audit_code {
    pub const SUPERVISOR_OPENED: &str = "SUPERVISOR_OPENED";
    pub const SUPERVISOR_CLOSED: &str = "SUPERVISOR_CLOSED";
    pub const RECOVERY_COMPLETED: &str = "RECOVERY_COMPLETED";
    pub const RECOVERY_FAILED: &str = "RECOVERY_FAILED";
    pub const CONTAINER_CREATED: &str = "CONTAINER_CREATED";
    pub const CONTAINER_REMOVED: &str = "CONTAINER_REMOVED";
    pub const POD_CREATED: &str = "POD_CREATED";
    pub const POD_REMOVED: &str = "POD_REMOVED";
}

/// Append-only record of a supervisor-level event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub instance_id: Uuid,
    pub scope: SupervisorScope,
    pub timestamp_ms: i64,
    pub code: String,
    pub text: String,
}

impl AuditEvent {
    /// An event stamped with the current time
    pub fn now(
        instance_id: Uuid,
        scope: SupervisorScope,
        code: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            instance_id,
            scope,
            timestamp_ms: Utc::now().timestamp_millis(),
            code: code.into(),
            text: text.into(),
        }
    }

    /// The event time, if representable
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp_ms).single()
    }
}
