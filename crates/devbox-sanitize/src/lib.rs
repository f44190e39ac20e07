//! devbox sanitize - pure cleaning functions for workspace file sync
//!
//! Everything that decides *what* gets written into a workspace, with no
//! knowledge of *how* it gets there:
//! - Path normalization and truncated-extension repair ([`path`])
//! - Byte-level content cleaning and terminal output scrubbing ([`content`])
//! - Structured manifest canonicalization and recovery ([`manifest`])
//!
//! # Example
//!
//! ```rust
//! use devbox_sanitize::prepare_write;
//!
//! let write = prepare_write("/src/app.j", b"let x = 1;\r\n").unwrap();
//! assert_eq!(write.path, "src/app.js");
//! assert_eq!(write.content, "let x = 1;\n");
//! ```

pub mod content;
pub mod manifest;
pub mod path;

pub use content::{clean_content, strip_control_sequences};
pub use manifest::{normalize_manifest, ManifestError, ManifestKind, ManifestOutcome};
pub use path::{
    canonical_sibling, is_truncation_artifact, repair_path, workspace_dir, workspace_relative,
    PathError, SHORT_EXTENSION_ALLOWLIST, TRUNCATED_EXTENSIONS,
};

/// A file write after path repair and content sanitization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWrite {
    /// Workspace-relative path with a canonical extension
    pub path: String,
    /// Cleaned content
    pub content: String,
    /// Manifest kind, if the path named one
    pub manifest: Option<ManifestKind>,
    /// Whether the upload was replaced by a manifest default
    pub recovered: bool,
}

/// Run the ingress pipeline for one editor write
///
/// 1. Normalize the path and repair a truncated extension
/// 2. Clean the content bytes
/// 3. Canonicalize (or replace) recognized manifests
///
/// # Errors
/// Returns [`PathError`] if the path cannot be made workspace-relative.
pub fn prepare_write(raw_path: &str, raw_content: &[u8]) -> Result<PreparedWrite, PathError> {
    let path = repair_path(&workspace_relative(raw_path)?);
    let cleaned = clean_content(raw_content);

    let Some(kind) = ManifestKind::from_path(&path) else {
        return Ok(PreparedWrite {
            path,
            content: cleaned,
            manifest: None,
            recovered: false,
        });
    };

    let outcome = normalize_manifest(kind, &cleaned);
    if let ManifestOutcome::Replaced { reason, .. } = &outcome {
        tracing::warn!(path = %path, %reason, "manifest upload replaced with default");
    }
    let recovered = outcome.was_replaced();

    Ok(PreparedWrite {
        path,
        content: outcome.into_content(),
        manifest: Some(kind),
        recovered,
    })
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_write_plain_file() {
        let write = prepare_write("main.py", b"print(1)").unwrap();
        assert_eq!(write.path, "main.py");
        assert_eq!(write.content, "print(1)");
        assert_eq!(write.manifest, None);
        assert!(!write.recovered);
    }

    #[test]
    fn prepare_write_repairs_then_cleans() {
        let write = prepare_write("./lib/util.p", b"x = 1\r\ny = 2\x00").unwrap();
        assert_eq!(write.path, "lib/util.py");
        assert_eq!(write.content, "x = 1\ny = 2");
    }

    #[test]
    fn prepare_write_recovers_corrupt_manifest() {
        let write = prepare_write("package.json", b"{\"name\": ").unwrap();
        assert_eq!(write.manifest, Some(ManifestKind::PackageJson));
        assert!(write.recovered);
        assert_eq!(write.content, ManifestKind::PackageJson.default_content());
    }

    #[test]
    fn prepare_write_repairs_manifest_extension() {
        let write = prepare_write("package.jso", b"{\"name\":\"a\",\"version\":\"1.0.0\"}").unwrap();
        assert_eq!(write.path, "package.json");
        assert!(!write.recovered);
        assert!(write.content.starts_with("{\n  \"name\": \"a\""));
    }

    #[test]
    fn prepare_write_rejects_traversal() {
        assert!(prepare_write("../outside.txt", b"x").is_err());
    }
}
