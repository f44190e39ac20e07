//! Error types for devbox core
//!
//! Provides error handling for:
//! - Workspace file operations
//! - Session lifecycle and lookup
//! - Startup and configuration

use std::path::PathBuf;

use devbox_runtime::RuntimeError;
use devbox_sanitize::PathError;

use crate::types::{ConnectionId, SessionId};

/// Workspace file operation error
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// Path could not be made workspace-relative
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    /// Path does not exist in the workspace
    #[error("not found: {0}")]
    NotFound(String),

    /// Path exists but cannot be accessed
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Command failed for another reason
    #[error("{op} failed for {path}: {message}")]
    Command {
        /// Operation name
        op: &'static str,
        /// Workspace path involved
        path: String,
        /// Error text reported by the command
        message: String,
    },

    /// Upload could not be packed for injection
    #[error("archive error: {0}")]
    Archive(String),

    /// Runtime could not run the operation
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Session file queue stopped before the operation ran
    #[error("file queue closed")]
    QueueClosed,
}

impl FsError {
    /// Check if the error means the path is missing
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if retrying the operation could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Runtime(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Session lifecycle error
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live session with this id
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// Workspace is still being provisioned, or provisioning failed
    #[error("session not ready: {0}")]
    NotReady(SessionId),

    /// A live session already uses this id
    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    /// Connection is already bound to a session
    #[error("connection already bound: {0}")]
    ConnectionInUse(ConnectionId),

    /// File operation failed
    #[error(transparent)]
    Fs(#[from] FsError),
}

impl SessionError {
    /// Check if the error means a workspace path is missing
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Fs(e) if e.is_not_found())
    }

    /// Check if retrying could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotReady(_) => true,
            Self::Fs(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid configuration
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level startup error
#[derive(Debug, thiserror::Error)]
pub enum DevboxError {
    /// Base image could not be built; no session can be served
    #[error("workspace runtime unavailable: {0}")]
    RuntimeUnavailable(#[source] RuntimeError),

    /// Configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_error_display() {
        let err = FsError::NotFound("src/main.py".to_string());
        assert_eq!(err.to_string(), "not found: src/main.py");
        assert!(err.is_not_found());

        let err = FsError::from(PathError::ParentTraversal("../x".to_string()));
        assert!(err.to_string().starts_with("invalid path"));
    }

    #[test]
    fn session_error_not_found_passthrough() {
        let err = SessionError::from(FsError::NotFound("a".to_string()));
        assert!(err.is_not_found());
        assert!(!SessionError::NotFound(SessionId::from("s1")).is_not_found());
    }

    #[test]
    fn retryable_classification() {
        let timeout = FsError::Runtime(RuntimeError::Timeout { op: "exec", secs: 30 });
        assert!(timeout.is_retryable());
        assert!(SessionError::NotReady(SessionId::from("s1")).is_retryable());
        assert!(!SessionError::AlreadyExists(SessionId::from("s1")).is_retryable());
    }
}
