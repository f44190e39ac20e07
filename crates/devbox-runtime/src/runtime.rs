//! Workspace runtime abstraction
//!
//! The runtime owns sandbox lifecycles. Callers above it never see a
//! container CLI; they hold a [`WorkspaceHandle`] and issue argument
//! vectors built by [`crate::commands`].

use crate::error::RuntimeError;
use crate::types::{ExecOutput, ShellProcess, WorkspaceHandle};

/// Backend that provisions and drives isolated workspaces
///
/// Implementations must bound every call by the configured deadline and
/// must treat teardown of an already-removed sandbox as success.
#[async_trait::async_trait]
pub trait WorkspaceRuntime: Send + Sync {
    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Build the shared base image
    ///
    /// Idempotent within a process: concurrent and repeated calls share a
    /// single build.
    async fn build_base_image(&self) -> Result<(), RuntimeError>;

    /// Provision an empty workspace for a session
    ///
    /// Any stale sandbox or host directory left under the same name is
    /// removed first.
    async fn create_workspace(&self, session_id: &str) -> Result<WorkspaceHandle, RuntimeError>;

    /// Run a command in the workspace directory and capture its output
    ///
    /// A non-zero exit is reported through [`ExecOutput::exit_code`], not as
    /// an error. Errors mean the command could not be run at all.
    async fn exec(&self, handle: &WorkspaceHandle, argv: &[String])
        -> Result<ExecOutput, RuntimeError>;

    /// Unpack a tar archive into the workspace directory
    async fn inject_archive(
        &self,
        handle: &WorkspaceHandle,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError>;

    /// Attach an interactive shell
    async fn spawn_shell(&self, handle: &WorkspaceHandle) -> Result<ShellProcess, RuntimeError>;

    /// Wipe and remove a workspace along with its host directory
    async fn stop_and_remove(&self, handle: &WorkspaceHandle) -> Result<(), RuntimeError>;

    /// Names of every sandbox carrying the managed label and name prefix
    async fn list_managed(&self) -> Result<Vec<String>, RuntimeError>;

    /// Force-remove a sandbox by name along with the host directory its
    /// name maps to
    async fn remove_named(&self, name: &str) -> Result<(), RuntimeError>;
}
