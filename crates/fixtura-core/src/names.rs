//! Collision-resistant, project-scoped resource names
//!
//! Names look like `FIXTURA-<project>-<token>` for containers and
//! `FIXTURA-POD-<project>-<token>` for pods. The token is 9 bytes from the OS
//! random source, URL-safe base64 encoded and upper-cased, so it is safe to
//! pass through a shell or a URL unquoted.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

use crate::{NAME_PREFIX, POD_INFIX};

/// Number of random bytes per token
pub const TOKEN_BYTES: usize = 9;

/// Kind of resource a managed name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Container,
    Pod,
}

/// Generates fresh names for one project namespace
#[derive(Debug, Clone)]
pub struct NameAllocator {
    project: String,
}

impl NameAllocator {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// A fresh random token
    pub fn fresh_token(&self) -> String {
        let mut data = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut data);
        URL_SAFE_NO_PAD.encode(data).to_ascii_uppercase()
    }

    /// A fresh container name
    pub fn container_name(&self) -> String {
        format!("{}-{}-{}", NAME_PREFIX, self.project, self.fresh_token())
    }

    /// A fresh pod name
    pub fn pod_name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            NAME_PREFIX,
            POD_INFIX,
            self.project,
            self.fresh_token()
        )
    }

    /// Classify a name produced by this allocator; `None` for foreign names
    pub fn classify(&self, name: &str) -> Option<ResourceKind> {
        let pod_prefix = format!("{}-{}-{}-", NAME_PREFIX, POD_INFIX, self.project);
        let container_prefix = format!("{}-{}-", NAME_PREFIX, self.project);

        if name.starts_with(&pod_prefix) {
            Some(ResourceKind::Pod)
        } else if name.starts_with(&container_prefix) {
            Some(ResourceKind::Container)
        } else {
            None
        }
    }
}
