//! Error types for the workspace runtime
//!
//! Runtime errors fall into three groups:
//! - The runtime could not be driven at all (spawn, timeout, image build)
//! - A runtime command ran and failed
//! - The target is already gone, which teardown paths treat as success

use std::path::PathBuf;

/// Workspace runtime error
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Runtime binary could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Runtime call exceeded its deadline
    #[error("{op} timed out after {secs}s")]
    Timeout {
        /// Operation name
        op: &'static str,
        /// Deadline in seconds
        secs: u64,
    },

    /// Runtime command exited unsuccessfully
    #[error("{op} failed (exit {code:?}): {stderr}")]
    CommandFailed {
        /// Operation name
        op: &'static str,
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Trimmed error output
        stderr: String,
    },

    /// Base image could not be built
    #[error("base image build failed: {0}")]
    ImageBuild(String),

    /// Sandbox no longer exists
    #[error("workspace not found: {0}")]
    NotFound(String),

    /// Host-side storage could not be prepared or removed
    #[error("host storage error at {}: {source}", path.display())]
    HostStorage {
        /// Host directory involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Interactive shell could not be attached
    #[error("shell unavailable: {0}")]
    Shell(String),

    /// Other I/O failure talking to the runtime
    #[error("runtime i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Check if the error means the target was already removed
    #[inline]
    #[must_use]
    pub fn is_already_gone(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if retrying the call could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_error_display() {
        let err = RuntimeError::Timeout {
            op: "exec",
            secs: 30,
        };
        assert_eq!(err.to_string(), "exec timed out after 30s");

        let err = RuntimeError::CommandFailed {
            op: "inject_archive",
            code: Some(1),
            stderr: "no space left".to_string(),
        };
        assert!(err.to_string().contains("inject_archive failed"));
    }

    #[test]
    fn runtime_error_classification() {
        assert!(RuntimeError::NotFound("devbox-a".to_string()).is_already_gone());
        assert!(!RuntimeError::ImageBuild("x".to_string()).is_already_gone());
        assert!(RuntimeError::Timeout { op: "exec", secs: 1 }.is_retryable());
        assert!(!RuntimeError::NotFound("x".to_string()).is_retryable());
    }
}
