//! Runtime configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::limits;
use crate::types::ResourceLimits;

/// Label marking a sandbox as owned by this service
pub const MANAGED_LABEL: &str = "devbox.managed";

/// Label carrying the owning session id
pub const SESSION_LABEL: &str = "devbox.session";

/// Longest session-derived name component kept in sandbox names
const MAX_NAME_COMPONENT: usize = 48;

/// Workspace runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Container CLI binary
    pub docker_binary: String,
    /// Tag of the workspace base image
    pub image_tag: String,
    /// Image the workspace base image is built from
    pub base_image: String,
    /// Prefix of every managed sandbox name
    pub container_prefix: String,
    /// Mount point of the workspace inside the sandbox
    pub workspace_dir: String,
    /// Host directory holding one subdirectory per session
    pub storage_root: PathBuf,
    /// Per-sandbox resource ceiling
    pub limits: ResourceLimits,
    /// Deadline for a single runtime call, in seconds
    pub command_timeout_secs: u64,
    /// Deadline for the base image build, in seconds
    pub build_timeout_secs: u64,
    /// Program and arguments of the interactive shell
    pub shell_command: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            image_tag: "devbox-workspace:latest".to_string(),
            base_image: "debian:bookworm-slim".to_string(),
            container_prefix: "devbox".to_string(),
            workspace_dir: "/workspace".to_string(),
            storage_root: std::env::temp_dir().join("devbox-workspaces"),
            limits: ResourceLimits::default(),
            command_timeout_secs: limits::COMMAND_TIMEOUT_SECS,
            build_timeout_secs: limits::BUILD_TIMEOUT_SECS,
            shell_command: ["script", "-qfc", "/bin/bash", "/dev/null"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl RuntimeConfig {
    /// Set the container CLI binary
    #[must_use]
    pub fn with_docker_binary(mut self, binary: impl Into<String>) -> Self {
        self.docker_binary = binary.into();
        self
    }

    /// Set the base image tag
    #[must_use]
    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = tag.into();
        self
    }

    /// Set the host storage root
    #[must_use]
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Set the per-sandbox resource ceiling
    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the runtime call deadline
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Runtime call deadline
    #[inline]
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Image build deadline
    #[inline]
    #[must_use]
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Managed sandbox name for a session
    #[must_use]
    pub fn container_name(&self, session_id: &str) -> String {
        format!("{}-{}", self.container_prefix, name_component(session_id))
    }

    /// Whether a sandbox name carries this service's prefix
    #[must_use]
    pub fn is_managed_name(&self, name: &str) -> bool {
        name.strip_prefix(&self.container_prefix)
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Host directory backing a session's workspace
    #[must_use]
    pub fn host_path(&self, session_id: &str) -> PathBuf {
        self.storage_root.join(name_component(session_id))
    }

    /// Host directory backing a managed sandbox, recovered from its name
    ///
    /// Returns `None` for names this service did not generate.
    #[must_use]
    pub fn host_path_for_container(&self, name: &str) -> Option<PathBuf> {
        let component = name
            .strip_prefix(&self.container_prefix)?
            .strip_prefix('-')?;
        let generated = !component.is_empty()
            && component
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        generated.then(|| self.storage_root.join(component))
    }
}

/// Reduce a session id to characters valid in sandbox and directory names
///
/// Ids that needed rewriting get a hash suffix so two distinct ids never
/// share a sandbox.
#[must_use]
pub fn name_component(session_id: &str) -> String {
    let mut clean: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_NAME_COMPONENT)
        .collect();

    if clean.is_empty() || clean != session_id {
        clean.push_str(&format!("-{:08x}", fnv1a(session_id.as_bytes())));
    }
    clean
}

fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(0x0100_0193)
    })
}
