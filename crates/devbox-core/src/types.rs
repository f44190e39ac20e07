//! Core types for devbox sessions

use serde::{Deserialize, Serialize};

/// Session identifier, chosen by the collaborator or generated
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Client connection identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wrap an existing id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Outbound notification for the client bound to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Workspace provisioned and shell attached
    Ready,
    /// Provisioning failed; the session stays not ready
    Failed {
        /// Failure description
        reason: String,
    },
    /// Bytes produced by the shell, verbatim
    Output(Vec<u8>),
    /// Workspace file tree changed
    TreeChanged,
    /// Shell process exited on its own
    ShellExited,
}

/// Kind of a workspace path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    /// Regular file
    File,
    /// Directory
    Directory,
}

impl PathKind {
    /// Parse a `find -printf %y` type letter; other kinds are not tracked
    #[must_use]
    pub fn from_type_letter(letter: &str) -> Option<Self> {
        match letter {
            "f" => Some(Self::File),
            "d" => Some(Self::Directory),
            _ => None,
        }
    }

    /// Whether this is a directory
    #[inline]
    #[must_use]
    pub fn is_dir(self) -> bool {
        self == Self::Directory
    }
}

/// One child in a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Entry name
    pub name: String,
    /// Entry kind
    pub kind: PathKind,
}

/// Acknowledgement for an editor file write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAck {
    /// Path written (repaired on success, as submitted on failure)
    pub path: String,
    /// Whether the write landed
    pub success: bool,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileAck {
    /// Successful write
    #[must_use]
    pub fn ok(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            success: true,
            error: None,
        }
    }

    /// Failed write
    #[must_use]
    pub fn failed(path: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            path: path.into(),
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// What happened to client input sent to a shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputDelivery {
    /// Handed to the shell process
    Forwarded,
    /// Shell not attached yet; input dropped
    NotReady,
    /// Session torn down; input dropped
    Closed,
    /// Shell process has exited; input dropped
    Dropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_event_json() {
        let ready = serde_json::to_string(&SessionEvent::Ready).unwrap();
        assert_eq!(ready, r#"{"type":"ready"}"#);

        let failed = serde_json::to_value(SessionEvent::Failed {
            reason: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(failed["type"], "failed");
        assert_eq!(failed["data"]["reason"], "boom");
    }

    #[test]
    fn file_ack_omits_empty_error() {
        let ack = serde_json::to_string(&FileAck::ok("main.py")).unwrap();
        assert_eq!(ack, r#"{"path":"main.py","success":true}"#);

        let ack = FileAck::failed("x", "permission denied: x");
        assert_eq!(ack.error.as_deref(), Some("permission denied: x"));
    }

    #[test]
    fn type_letters() {
        assert_eq!(PathKind::from_type_letter("f"), Some(PathKind::File));
        assert_eq!(PathKind::from_type_letter("d"), Some(PathKind::Directory));
        assert_eq!(PathKind::from_type_letter("l"), None);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
