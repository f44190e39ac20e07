//! devbox runtime - isolated workspace sandboxes
//!
//! Provides:
//! - The [`WorkspaceRuntime`] abstraction over sandbox lifecycles
//! - A Docker CLI backend ([`DockerRuntime`])
//! - Argument vectors for in-workspace file operations ([`commands`])
//! - Startup cleanup of orphaned sandboxes ([`Reaper`])
//!
//! Every sandbox gets the same fixed resource ceiling ([`limits`]) and a
//! private host directory mounted at `/workspace`.

pub mod commands;
pub mod config;
pub mod docker;
pub mod error;
pub mod limits;
pub mod reaper;
pub mod runtime;
pub mod types;

pub use commands::{classify_failure, FailureKind};
pub use config::{name_component, RuntimeConfig, MANAGED_LABEL, SESSION_LABEL};
pub use docker::DockerRuntime;
pub use error::RuntimeError;
pub use reaper::{ReapReport, Reaper};
pub use runtime::WorkspaceRuntime;
pub use types::{ExecOutput, ResourceLimits, ShellProcess, WorkspaceHandle};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
