//! Structured manifest normalization
//!
//! Package-description files are parsed strictly after byte cleaning:
//! - Valid input is re-serialized in a canonical, stable layout
//! - Invalid input is replaced by a fixed minimal default for that kind
//!
//! Replacement is a deliberate safeguard against corrupted uploads breaking
//! package tooling inside a workspace; it is never reported as an error.

use serde_json::Value;

/// Serialization format of a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestFormat {
    /// JSON document with an object at the root
    Json,
    /// TOML document
    Toml,
}

/// Recognized manifest files, matched by exact file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    /// `package.json`
    PackageJson,
    /// `tsconfig.json`
    TsConfig,
    /// `composer.json`
    ComposerJson,
    /// `Cargo.toml`
    CargoToml,
    /// `pyproject.toml`
    PyProject,
}

/// Why a manifest could not be kept
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    /// Content failed to parse
    #[error("{kind} parse error: {message}")]
    Syntax {
        /// Manifest file name
        kind: &'static str,
        /// Parser message
        message: String,
    },

    /// Content parsed but lacks the expected top-level shape
    #[error("{kind} is missing {expected}")]
    Shape {
        /// Manifest file name
        kind: &'static str,
        /// Description of the missing structure
        expected: &'static str,
    },
}

impl ManifestKind {
    /// Every recognized manifest kind
    pub const ALL: [Self; 5] = [
        Self::PackageJson,
        Self::TsConfig,
        Self::ComposerJson,
        Self::CargoToml,
        Self::PyProject,
    ];

    /// File name this kind is recognized by
    #[inline]
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::PackageJson => "package.json",
            Self::TsConfig => "tsconfig.json",
            Self::ComposerJson => "composer.json",
            Self::CargoToml => "Cargo.toml",
            Self::PyProject => "pyproject.toml",
        }
    }

    /// Serialization format
    #[inline]
    #[must_use]
    pub fn format(self) -> ManifestFormat {
        match self {
            Self::PackageJson | Self::TsConfig | Self::ComposerJson => ManifestFormat::Json,
            Self::CargoToml | Self::PyProject => ManifestFormat::Toml,
        }
    }

    /// Detect the manifest kind from a workspace path
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let name = crate::path::file_name(path);
        Self::ALL.into_iter().find(|kind| kind.file_name() == name)
    }

    /// Fixed minimal default used when uploaded content is unusable
    #[must_use]
    pub fn default_content(self) -> &'static str {
        match self {
            Self::PackageJson => {
                "{\n  \"name\": \"workspace\",\n  \"version\": \"1.0.0\",\n  \"private\": true\n}\n"
            }
            Self::TsConfig => "{\n  \"compilerOptions\": {}\n}\n",
            Self::ComposerJson => "{\n  \"name\": \"devbox/workspace\",\n  \"require\": {}\n}\n",
            Self::CargoToml => {
                "[package]\nname = \"workspace\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[dependencies]\n"
            }
            Self::PyProject => "[project]\nname = \"workspace\"\nversion = \"0.1.0\"\n",
        }
    }

    /// Top-level tables a TOML manifest must contain at least one of
    fn anchor_tables(self) -> &'static [&'static str] {
        match self {
            Self::CargoToml => &["package", "workspace"],
            Self::PyProject => &["project", "build-system", "tool"],
            Self::PackageJson | Self::TsConfig | Self::ComposerJson => &[],
        }
    }

    /// Strictly parse and re-serialize in canonical form
    ///
    /// JSON is pretty-printed with two-space indentation in source key order;
    /// TOML is pretty-printed by the `toml` serializer. Both end with a
    /// single newline.
    ///
    /// # Errors
    /// Returns [`ManifestError`] if the content does not parse or does not
    /// have the expected top-level structure.
    pub fn canonicalize(self, content: &str) -> Result<String, ManifestError> {
        match self.format() {
            ManifestFormat::Json => self.canonicalize_json(content),
            ManifestFormat::Toml => self.canonicalize_toml(content),
        }
    }

    fn canonicalize_json(self, content: &str) -> Result<String, ManifestError> {
        let value: Value = serde_json::from_str(content).map_err(|e| ManifestError::Syntax {
            kind: self.file_name(),
            message: e.to_string(),
        })?;

        if !value.is_object() {
            return Err(ManifestError::Shape {
                kind: self.file_name(),
                expected: "an object at the root",
            });
        }

        let mut rendered =
            serde_json::to_string_pretty(&value).map_err(|e| ManifestError::Syntax {
                kind: self.file_name(),
                message: e.to_string(),
            })?;
        rendered.push('\n');
        Ok(rendered)
    }

    fn canonicalize_toml(self, content: &str) -> Result<String, ManifestError> {
        let table: toml::Table = toml::from_str(content).map_err(|e| ManifestError::Syntax {
            kind: self.file_name(),
            message: e.to_string(),
        })?;

        let anchors = self.anchor_tables();
        if !anchors.iter().any(|key| table.get(*key).is_some_and(toml::Value::is_table)) {
            return Err(ManifestError::Shape {
                kind: self.file_name(),
                expected: "a recognized top-level table",
            });
        }

        let mut rendered = toml::to_string_pretty(&table).map_err(|e| ManifestError::Syntax {
            kind: self.file_name(),
            message: e.to_string(),
        })?;
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        Ok(rendered)
    }
}

impl std::fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Result of manifest normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOutcome {
    /// Content parsed and was re-serialized
    Canonical(String),
    /// Content was unusable and has been replaced by the default
    Replaced {
        /// Default content now in effect
        content: String,
        /// Why the original was rejected
        reason: ManifestError,
    },
}

impl ManifestOutcome {
    /// Final content to write
    #[inline]
    #[must_use]
    pub fn into_content(self) -> String {
        match self {
            Self::Canonical(content) | Self::Replaced { content, .. } => content,
        }
    }

    /// Whether the upload was discarded
    #[inline]
    #[must_use]
    pub fn was_replaced(&self) -> bool {
        matches!(self, Self::Replaced { .. })
    }
}

/// Canonicalize a manifest, falling back to its default on any failure
#[must_use]
pub fn normalize_manifest(kind: ManifestKind, content: &str) -> ManifestOutcome {
    match kind.canonicalize(content) {
        Ok(canonical) => ManifestOutcome::Canonical(canonical),
        Err(reason) => ManifestOutcome::Replaced {
            content: kind.default_content().to_string(),
            reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_manifest_by_file_name() {
        assert_eq!(ManifestKind::from_path("package.json"), Some(ManifestKind::PackageJson));
        assert_eq!(ManifestKind::from_path("web/package.json"), Some(ManifestKind::PackageJson));
        assert_eq!(ManifestKind::from_path("crates/x/Cargo.toml"), Some(ManifestKind::CargoToml));
        assert_eq!(ManifestKind::from_path("package.json.bak"), None);
        assert_eq!(ManifestKind::from_path("data.json"), None);
    }

    #[test]
    fn valid_json_is_reformatted_in_source_order() {
        let outcome = normalize_manifest(
            ManifestKind::PackageJson,
            r#"{"version":"2.0.0","name":"app","scripts":{"start":"node ."}}"#,
        );
        assert_eq!(
            outcome,
            ManifestOutcome::Canonical(
                "{\n  \"version\": \"2.0.0\",\n  \"name\": \"app\",\n  \"scripts\": {\n    \"start\": \"node .\"\n  }\n}\n"
                    .to_string()
            )
        );
    }

    #[test]
    fn invalid_json_is_replaced_with_default() {
        let outcome = normalize_manifest(ManifestKind::PackageJson, "{\"name\": \"app\",,}");
        assert!(outcome.was_replaced());

        let content = outcome.into_content();
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["name"], "workspace");
        assert_eq!(parsed["version"], "1.0.0");
    }

    #[test]
    fn json_array_root_is_rejected() {
        let outcome = normalize_manifest(ManifestKind::TsConfig, "[1, 2]");
        assert!(matches!(
            outcome,
            ManifestOutcome::Replaced {
                reason: ManifestError::Shape { .. },
                ..
            }
        ));
    }

    #[test]
    fn empty_manifest_falls_back_to_default() {
        for kind in ManifestKind::ALL {
            let outcome = normalize_manifest(kind, "");
            assert!(outcome.was_replaced(), "{kind} accepted empty content");
        }
    }

    #[test]
    fn defaults_are_valid_for_their_kind() {
        for kind in ManifestKind::ALL {
            assert!(
                kind.canonicalize(kind.default_content()).is_ok(),
                "{kind} default does not parse"
            );
        }
    }

    #[test]
    fn json_defaults_are_already_canonical() {
        for kind in ManifestKind::ALL {
            if kind.format() == ManifestFormat::Json {
                assert_eq!(kind.canonicalize(kind.default_content()).unwrap(), kind.default_content());
            }
        }
    }

    #[test]
    fn valid_toml_is_kept() {
        let outcome = normalize_manifest(
            ManifestKind::CargoToml,
            "[package]\nname = \"demo\"\nversion = \"0.2.0\"\n",
        );
        let ManifestOutcome::Canonical(content) = outcome else {
            panic!("valid Cargo.toml was replaced");
        };
        let table: toml::Table = toml::from_str(&content).unwrap();
        let name = table
            .get("package")
            .and_then(|package| package.get("name"))
            .and_then(toml::Value::as_str);
        assert_eq!(name, Some("demo"));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn toml_without_anchor_table_is_replaced() {
        let outcome = normalize_manifest(ManifestKind::PyProject, "name = \"loose\"\n");
        assert!(outcome.was_replaced());
        assert_eq!(outcome.into_content(), ManifestKind::PyProject.default_content());
    }
}
