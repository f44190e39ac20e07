//! Path normalization and truncated-extension repair
//!
//! Editor clients occasionally deliver file names whose extension was cut
//! short upstream (`main.p` instead of `main.py`). Repair is table-driven:
//! [`TRUNCATED_EXTENSIONS`] is scanned in order and the first fragment equal
//! to the final extension wins. A single pass is made; the canonical result
//! is never fed back through the table.
//!
//! [`SHORT_EXTENSION_ALLOWLIST`] protects legitimate short
//! extensions from being treated as truncation artifacts by listing filters
//! and orphan cleanup.

/// Ordered `(truncated fragment, canonical extension)` pairs, without dots.
///
/// Matching is case-insensitive on the fragment and exact on length: `j`
/// matches `app.j` but not `app.jx`.
pub const TRUNCATED_EXTENSIONS: &[(&str, &str)] = &[
    ("jso", "json"),
    ("j", "js"),
    ("mj", "mjs"),
    ("p", "py"),
    ("ht", "html"),
    ("tx", "txt"),
    ("ym", "yml"),
    ("yam", "yaml"),
    ("tom", "toml"),
    ("ja", "java"),
    ("jav", "java"),
    ("cp", "cpp"),
    ("sq", "sql"),
];

/// Short extensions that are real file types, never truncation artifacts.
pub const SHORT_EXTENSION_ALLOWLIST: &[&str] = &[
    "c", "h", "m", "r", "d", "s", "v", "cs", "go", "rs", "ts", "py", "js", "md", "sh", "rb",
    "pl", "hs", "ml", "kt", "cc", "hh", "lua", "css", "htm", "ini", "cfg", "env", "lock",
];

/// Errors produced while normalizing workspace paths
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Path has no usable segment
    #[error("path is empty")]
    Empty,

    /// Path escapes the workspace root
    #[error("path escapes workspace root: {0}")]
    ParentTraversal(String),

    /// Path contains a NUL byte
    #[error("path contains NUL byte")]
    NulByte,
}

/// Final path component (everything after the last `/`)
#[inline]
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

/// Parent directory of a workspace-relative path, `"."` at the root
#[inline]
#[must_use]
pub fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => ".",
        Some((parent, _)) => parent,
    }
}

/// Extension of the final path component, without the dot
///
/// Dot-files such as `.env` have no extension, and neither does a name
/// ending in a dot.
#[must_use]
pub fn extension_of(path: &str) -> Option<&str> {
    let name = file_name(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

/// Look up the canonical extension for a truncated fragment
#[must_use]
pub fn canonical_extension(ext: &str) -> Option<&'static str> {
    TRUNCATED_EXTENSIONS
        .iter()
        .find(|(fragment, _)| fragment.eq_ignore_ascii_case(ext))
        .map(|(_, canonical)| *canonical)
}

/// Check whether an extension is on the short-extension allow-list
#[inline]
#[must_use]
pub fn is_allowlisted(ext: &str) -> bool {
    SHORT_EXTENSION_ALLOWLIST
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(ext))
}

/// Rewrite a truncated final extension to its canonical form
///
/// Paths whose extension is not a known fragment are returned unchanged.
///
/// # Examples
/// - `src/app.j` → `src/app.js`
/// - `src/app.js` → `src/app.js`
#[must_use]
pub fn repair_path(raw: &str) -> String {
    let Some(ext) = extension_of(raw) else {
        return raw.to_string();
    };
    if is_allowlisted(ext) {
        return raw.to_string();
    }
    match canonical_extension(ext) {
        Some(canonical) => {
            let stem = &raw[..raw.len() - ext.len()];
            format!("{stem}{canonical}")
        }
        None => raw.to_string(),
    }
}

/// Check whether a file name looks like a truncated-extension artifact
#[must_use]
pub fn is_truncation_artifact(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| !is_allowlisted(ext) && canonical_extension(ext).is_some())
}

/// Name the artifact would have had with its canonical extension
///
/// Returns `None` when `name` is not a truncation artifact.
#[must_use]
pub fn canonical_sibling(name: &str) -> Option<String> {
    is_truncation_artifact(name).then(|| repair_path(name))
}

/// Normalize a client path into a workspace-relative form
///
/// Leading separators, empty segments and `.` segments are dropped and
/// backslashes are treated as separators. `..` is rejected rather than
/// resolved.
///
/// # Errors
/// - [`PathError::Empty`] if nothing remains
/// - [`PathError::ParentTraversal`] if a `..` segment is present
/// - [`PathError::NulByte`] if the path contains `\0`
pub fn workspace_relative(raw: &str) -> Result<String, PathError> {
    if raw.contains('\0') {
        return Err(PathError::NulByte);
    }

    let mut segments = Vec::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(PathError::ParentTraversal(raw.to_string())),
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(segments.join("/"))
}

/// Like [`workspace_relative`] but maps the empty path to the root `"."`
///
/// # Errors
/// Same as [`workspace_relative`], except that empty input is accepted.
pub fn workspace_dir(raw: &str) -> Result<String, PathError> {
    match workspace_relative(raw) {
        Err(PathError::Empty) => Ok(".".to_string()),
        other => other,
    }
}

/// Join a parent directory and a child name into a workspace-relative path
///
/// # Errors
/// Propagates normalization errors from either half.
pub fn join_relative(parent: Option<&str>, child: &str) -> Result<String, PathError> {
    let child = workspace_relative(child)?;
    match parent.map(workspace_dir).transpose()? {
        Some(parent) if parent != "." => Ok(format!("{parent}/{child}")),
        _ => Ok(child),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn repair_rewrites_truncated_fragment() {
        assert_eq!(repair_path("src/app.j"), "src/app.js");
        assert_eq!(repair_path("main.p"), "main.py");
        assert_eq!(repair_path("data/config.jso"), "data/config.json");
        assert_eq!(repair_path("index.ht"), "index.html");
    }

    #[test]
    fn repair_leaves_canonical_paths_untouched() {
        assert_eq!(repair_path("src/app.js"), "src/app.js");
        assert_eq!(repair_path("main.py"), "main.py");
        assert_eq!(repair_path("Makefile"), "Makefile");
        assert_eq!(repair_path(".env"), ".env");
        assert_eq!(repair_path("lib.c"), "lib.c");
    }

    #[test]
    fn repair_is_single_pass() {
        // "jav" -> "java"; the result is never re-matched against "ja"
        assert_eq!(repair_path("Main.jav"), "Main.java");
        assert_eq!(repair_path("Main.ja"), "Main.java");
    }

    #[test]
    fn repair_only_looks_at_final_component() {
        assert_eq!(repair_path("a.j/readme"), "a.j/readme");
    }

    #[test]
    fn repair_matches_case_insensitively() {
        assert_eq!(repair_path("APP.J"), "APP.js");
    }

    #[test]
    fn table_and_allowlist_are_disjoint() {
        for (fragment, canonical) in TRUNCATED_EXTENSIONS {
            assert!(!is_allowlisted(fragment), "{fragment} is allow-listed");
            assert!(
                canonical_extension(canonical).is_none(),
                "{canonical} would be rewritten again"
            );
        }
    }

    #[test]
    fn truncation_artifact_detection() {
        assert!(is_truncation_artifact("app.j"));
        assert!(is_truncation_artifact("notes.tx"));
        assert!(!is_truncation_artifact("app.js"));
        assert!(!is_truncation_artifact("main.c"));
        assert!(!is_truncation_artifact("Program.cs"));
        assert!(!is_truncation_artifact(".j"));
    }

    #[test]
    fn canonical_sibling_names() {
        assert_eq!(canonical_sibling("app.j").as_deref(), Some("app.js"));
        assert_eq!(canonical_sibling("app.js"), None);
    }

    #[test]
    fn workspace_relative_strips_leading_separators() {
        assert_eq!(workspace_relative("/src/main.py").unwrap(), "src/main.py");
        assert_eq!(workspace_relative("./src//main.py").unwrap(), "src/main.py");
        assert_eq!(workspace_relative("src\\lib\\a.rs").unwrap(), "src/lib/a.rs");
    }

    #[test]
    fn workspace_relative_rejects_traversal() {
        assert!(matches!(
            workspace_relative("../etc/passwd"),
            Err(PathError::ParentTraversal(_))
        ));
        assert_eq!(workspace_relative("/"), Err(PathError::Empty));
        assert_eq!(workspace_relative("a\0b"), Err(PathError::NulByte));
    }

    #[test]
    fn workspace_dir_maps_empty_to_root() {
        assert_eq!(workspace_dir("").unwrap(), ".");
        assert_eq!(workspace_dir("/").unwrap(), ".");
        assert_eq!(workspace_dir("src/").unwrap(), "src");
    }

    #[test]
    fn join_relative_with_parent() {
        assert_eq!(join_relative(Some("src"), "utils").unwrap(), "src/utils");
        assert_eq!(join_relative(Some("/"), "utils").unwrap(), "utils");
        assert_eq!(join_relative(None, "/utils").unwrap(), "utils");
    }

    #[test]
    fn parent_and_file_name() {
        assert_eq!(parent_dir("src/app.js"), "src");
        assert_eq!(parent_dir("app.js"), ".");
        assert_eq!(file_name("src/app.js"), "app.js");
    }

    proptest! {
        #[test]
        fn repair_is_deterministic(path in "[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.[a-z]{1,4}") {
            prop_assert_eq!(repair_path(&path), repair_path(&path));
        }

        #[test]
        fn repaired_paths_are_fixed_points(path in "[a-z]{1,8}\\.[a-z]{1,4}") {
            let once = repair_path(&path);
            prop_assert_eq!(repair_path(&once), once.clone());
        }
    }
}
