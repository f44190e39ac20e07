//! Service configuration
//!
//! Loaded from TOML; every field has a default, so an empty file is valid.
//!
//! ```toml
//! event_buffer = 256
//!
//! [runtime]
//! image_tag = "devbox-workspace:latest"
//! storage_root = "/var/lib/devbox"
//!
//! [runtime.limits]
//! memory_mb = 512
//! ```

use std::path::{Path, PathBuf};

use devbox_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevboxConfig {
    /// Workspace runtime settings
    pub runtime: RuntimeConfig,
    /// Capacity of each session's outbound event channel
    pub event_buffer: usize,
    /// Capacity of each shell's input channel
    pub input_buffer: usize,
}

impl Default for DevboxConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            event_buffer: 256,
            input_buffer: 64,
        }
    }
}

impl DevboxConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] if the text is not valid configuration.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Set runtime settings
    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Set the host storage root
    #[must_use]
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.runtime.storage_root = root.into();
        self
    }

    /// Set the base image tag
    #[must_use]
    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.runtime.image_tag = tag.into();
        self
    }

    /// Set the outbound event channel capacity
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Set the shell input channel capacity
    #[must_use]
    pub fn with_input_buffer(mut self, capacity: usize) -> Self {
        self.input_buffer = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_is_default() {
        assert_eq!(DevboxConfig::from_toml_str("").unwrap(), DevboxConfig::default());
    }

    #[test]
    fn nested_runtime_overrides() {
        let config = DevboxConfig::from_toml_str(
            r#"
            event_buffer = 32

            [runtime]
            image_tag = "custom:2"
            command_timeout_secs = 5

            [runtime.limits]
            pids = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.event_buffer, 32);
        assert_eq!(config.input_buffer, 64);
        assert_eq!(config.runtime.image_tag, "custom:2");
        assert_eq!(config.runtime.command_timeout_secs, 5);
        assert_eq!(config.runtime.limits.pids, 64);
        assert_eq!(config.runtime.limits.memory_mb, 512);
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\nstorage_root = \"/srv/devbox\"").unwrap();

        let config = DevboxConfig::from_file(file.path()).unwrap();
        assert_eq!(config.runtime.storage_root, PathBuf::from("/srv/devbox"));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = DevboxConfig::from_file("/nonexistent/devbox.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = DevboxConfig::from_toml_str("event_buffer = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn builders() {
        let config = DevboxConfig::new()
            .with_storage_root("/tmp/x")
            .with_image_tag("img:1")
            .with_event_buffer(0);
        assert_eq!(config.runtime.storage_root, PathBuf::from("/tmp/x"));
        assert_eq!(config.runtime.image_tag, "img:1");
        assert_eq!(config.event_buffer, 1);
    }
}
