//! Core runtime types

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;

use crate::limits;

/// Resource ceiling applied to a workspace sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memory ceiling in MiB
    pub memory_mb: u64,
    /// Relative CPU weight
    pub cpu_shares: u32,
    /// Maximum process count
    pub pids: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: limits::MEMORY_LIMIT_MB,
            cpu_shares: limits::CPU_SHARES,
            pids: limits::PIDS_LIMIT,
        }
    }
}

/// Opaque reference to a live workspace sandbox
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceHandle {
    container: String,
    host_path: PathBuf,
    limits: ResourceLimits,
}

impl WorkspaceHandle {
    /// Create a handle
    #[must_use]
    pub fn new(container: impl Into<String>, host_path: impl Into<PathBuf>, limits: ResourceLimits) -> Self {
        Self {
            container: container.into(),
            host_path: host_path.into(),
            limits,
        }
    }

    /// Runtime-level sandbox name
    #[inline]
    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Host directory backing `/workspace`
    #[inline]
    #[must_use]
    pub fn host_path(&self) -> &Path {
        &self.host_path
    }

    /// Resource ceiling the sandbox was created with
    #[inline]
    #[must_use]
    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }
}

impl fmt::Display for WorkspaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.container)
    }
}

/// Captured result of a command run inside a workspace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Raw standard output
    pub stdout: Vec<u8>,
    /// Raw standard error
    pub stderr: Vec<u8>,
    /// Exit code, `None` if terminated by a signal
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    /// Successful output with the given stdout
    #[must_use]
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            exit_code: Some(0),
        }
    }

    /// Failed output with the given exit code and stderr
    #[must_use]
    pub fn failed(exit_code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    /// Whether the command exited with status zero
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout decoded lossily
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr followed by stdout, decoded lossily, for failure classification
    #[must_use]
    pub fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stderr).into_owned();
        if !self.stdout.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stdout));
        }
        text
    }
}

/// Interactive shell attached to a workspace
///
/// The input and output streams are boxed so in-memory backends can hand
/// out duplex pipes instead of process handles.
pub struct ShellProcess {
    input: Box<dyn AsyncWrite + Send + Unpin>,
    output: Box<dyn AsyncRead + Send + Unpin>,
    child: Option<Child>,
}

impl ShellProcess {
    /// Wrap a pair of streams
    pub fn new(
        input: impl AsyncWrite + Send + Unpin + 'static,
        output: impl AsyncRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
            child: None,
        }
    }

    /// Attach the host process driving the shell
    #[must_use]
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// Split into input, output and the optional host process
    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        Box<dyn AsyncWrite + Send + Unpin>,
        Box<dyn AsyncRead + Send + Unpin>,
        Option<Child>,
    ) {
        (self.input, self.output, self.child)
    }
}

impl fmt::Debug for ShellProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellProcess")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_constants() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.memory_mb, 512);
        assert_eq!(limits.cpu_shares, 512);
        assert_eq!(limits.pids, 256);
    }

    #[test]
    fn exec_output_combined_text() {
        let output = ExecOutput {
            stdout: b"partial".to_vec(),
            stderr: b"cat: x: Permission denied".to_vec(),
            exit_code: Some(1),
        };
        assert!(!output.success());
        assert_eq!(output.combined_text(), "cat: x: Permission denied\npartial");
        assert_eq!(ExecOutput::ok("hi").combined_text(), "hi");
    }

    #[test]
    fn handle_accessors() {
        let handle = WorkspaceHandle::new("devbox-s1", "/tmp/ws/s1", ResourceLimits::default());
        assert_eq!(handle.container(), "devbox-s1");
        assert_eq!(handle.host_path(), Path::new("/tmp/ws/s1"));
        assert_eq!(handle.to_string(), "devbox-s1");
    }

    #[test]
    fn handles_are_hashable() {
        use std::collections::HashSet;

        let small = ResourceLimits {
            memory_mb: 128,
            ..ResourceLimits::default()
        };
        let handles: HashSet<WorkspaceHandle> = [
            WorkspaceHandle::new("devbox-s1", "/tmp/ws/s1", ResourceLimits::default()),
            WorkspaceHandle::new("devbox-s1", "/tmp/ws/s1", ResourceLimits::default()),
            WorkspaceHandle::new("devbox-s1", "/tmp/ws/s1", small),
        ]
        .into_iter()
        .collect();
        assert_eq!(handles.len(), 2);
    }
}
