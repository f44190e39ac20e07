//! Command lines executed inside a workspace
//!
//! Every command is an argument vector; user-supplied paths are passed as
//! positional arguments and never spliced into shell text. Commands that
//! take options end them with `--`; `find` has no such marker, so paths
//! handed to it are anchored with `./` when they start with `-`. The two guard
//! scripts report their failure class through an exit code:
//!
//! | Exit | Meaning           |
//! |------|-------------------|
//! | 66   | path not found    |
//! | 77   | permission denied |
//!
//! Anything else is classified from the error text with
//! [`classify_failure`].

/// Exit code for a missing path (`EX_NOINPUT`)
pub const EXIT_NOT_FOUND: i32 = 66;

/// Exit code for an unreadable path (`EX_NOPERM`)
pub const EXIT_PERMISSION_DENIED: i32 = 77;

/// Exit code the shell reports when a program cannot be executed
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Read a regular file, distinguishing "missing" from "unreadable"
pub const READ_FILE_SCRIPT: &str =
    r#"[ -e "$1" ] || exit 66; [ -r "$1" ] || exit 77; exec cat -- "$1""#;

/// List one directory level as `name|type` lines
pub const LIST_DIR_SCRIPT: &str = r#"[ -d "$1" ] || exit 66; [ -r "$1" ] && [ -x "$1" ] || exit 77; exec find "$1" -mindepth 1 -maxdepth 1 -printf '%f|%y\n'"#;

/// `$0` for the guard scripts
const SCRIPT_NAME: &str = "devbox";

/// Error-text phrases meaning the path does not exist
pub const NOT_FOUND_PHRASES: &[&str] = &[
    "no such file or directory",
    "cannot stat",
    "does not exist",
    "not found",
];

/// Error-text phrases meaning access was refused
pub const PERMISSION_PHRASES: &[&str] = &[
    "permission denied",
    "operation not permitted",
    "read-only file system",
];

/// Classified cause of a failed workspace command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Target path does not exist
    NotFound,
    /// Target path exists but access was refused
    PermissionDenied,
    /// Any other failure
    Other,
}

/// Classify a failed command by exit code, then by error text
///
/// Permission phrases are checked before not-found phrases, since messages
/// such as "cannot access 'x': Permission denied" contain both.
#[must_use]
pub fn classify_failure(exit_code: Option<i32>, output: &str) -> FailureKind {
    match exit_code {
        Some(EXIT_NOT_FOUND) => return FailureKind::NotFound,
        Some(EXIT_PERMISSION_DENIED | EXIT_NOT_EXECUTABLE) => {
            return FailureKind::PermissionDenied
        }
        _ => {}
    }

    let lowered = output.to_ascii_lowercase();
    if PERMISSION_PHRASES.iter().any(|p| lowered.contains(p)) {
        FailureKind::PermissionDenied
    } else if NOT_FOUND_PHRASES.iter().any(|p| lowered.contains(p)) {
        FailureKind::NotFound
    } else {
        FailureKind::Other
    }
}

fn argv<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.into_iter().map(String::from).collect()
}

fn script(body: &str, path: &str) -> Vec<String> {
    argv(["sh", "-c", body, SCRIPT_NAME, path])
}

/// Keep a relative path from being parsed as an option or `find` predicate
fn anchored(path: &str) -> String {
    if path.starts_with('-') {
        format!("./{path}")
    } else {
        path.to_string()
    }
}

/// Print a file's bytes
#[must_use]
pub fn read_file(path: &str) -> Vec<String> {
    script(READ_FILE_SCRIPT, path)
}

/// List every entry below the working directory as `relative/path|type`
#[must_use]
pub fn list_tree() -> Vec<String> {
    argv(["find", ".", "-mindepth", "1", "-printf", r"%P|%y\n"])
}

/// List the immediate children of a directory as `name|type`
#[must_use]
pub fn list_directory(dir: &str) -> Vec<String> {
    script(LIST_DIR_SCRIPT, &anchored(dir))
}

/// Create a directory and any missing parents
#[must_use]
pub fn make_directory(path: &str) -> Vec<String> {
    argv(["mkdir", "-p", "--", path])
}

/// Make a path owner-writable and world-readable
#[must_use]
pub fn normalize_permissions(path: &str) -> Vec<String> {
    argv(["chmod", "-R", "u+rwX,go+rX", "--", path])
}

/// Rename a path, refusing to merge into an existing directory
#[must_use]
pub fn move_path(from: &str, to: &str) -> Vec<String> {
    argv(["mv", "-T", "--", from, to])
}

/// Remove a file, or a directory tree when `recursive`
///
/// A missing path is an error in both forms.
#[must_use]
pub fn remove_path(path: &str, recursive: bool) -> Vec<String> {
    if recursive {
        argv(["rm", "-r", "--", path])
    } else {
        argv(["rm", "--", path])
    }
}

/// Remove files, ignoring ones already gone
#[must_use]
pub fn remove_files(paths: &[String]) -> Vec<String> {
    let mut cmd = argv(["rm", "-f", "--"]);
    cmd.extend(paths.iter().cloned());
    cmd
}

/// Flush filesystem buffers
#[must_use]
pub fn sync() -> Vec<String> {
    argv(["sync"])
}

/// Delete every entry below the working directory
#[must_use]
pub fn wipe_workspace() -> Vec<String> {
    argv(["find", ".", "-mindepth", "1", "-delete"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_exit_code() {
        assert_eq!(classify_failure(Some(66), ""), FailureKind::NotFound);
        assert_eq!(classify_failure(Some(77), ""), FailureKind::PermissionDenied);
        assert_eq!(classify_failure(Some(126), ""), FailureKind::PermissionDenied);
    }

    #[test]
    fn classify_by_phrase() {
        assert_eq!(
            classify_failure(Some(1), "rm: cannot remove 'x': No such file or directory"),
            FailureKind::NotFound
        );
        assert_eq!(
            classify_failure(Some(1), "mv: cannot move 'a': Operation not permitted"),
            FailureKind::PermissionDenied
        );
        assert_eq!(classify_failure(Some(1), "disk full"), FailureKind::Other);
        assert_eq!(classify_failure(None, ""), FailureKind::Other);
    }

    #[test]
    fn permission_wins_over_not_found() {
        assert_eq!(
            classify_failure(Some(2), "ls: cannot access 'secret': Permission denied"),
            FailureKind::PermissionDenied
        );
    }

    #[test]
    fn paths_are_positional_arguments() {
        let cmd = read_file("a b; rm -rf /");
        assert_eq!(cmd.len(), 5);
        assert_eq!(cmd[0], "sh");
        assert_eq!(cmd[4], "a b; rm -rf /");
        assert!(!cmd[2].contains("rm -rf"));

        assert_eq!(move_path("a", "b"), vec!["mv", "-T", "--", "a", "b"]);
        assert_eq!(remove_path("x", true), vec!["rm", "-r", "--", "x"]);
    }

    #[test]
    fn leading_dash_directory_is_not_a_find_predicate() {
        assert_eq!(list_directory("-delete")[4], "./-delete");
        assert_eq!(list_directory("-newer/x")[4], "./-newer/x");
        assert_eq!(list_directory("src")[4], "src");
        assert_eq!(list_directory(".")[4], ".");
    }

    #[test]
    fn remove_files_appends_every_path() {
        let cmd = remove_files(&["a.jso".to_string(), "b.p".to_string()]);
        assert_eq!(cmd, vec!["rm", "-f", "--", "a.jso", "b.p"]);
    }
}
