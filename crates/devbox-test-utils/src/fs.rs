//! In-memory workspace filesystem
//!
//! Interprets the argument vectors built by `devbox_runtime::commands` with
//! the exit codes and error text the real tools produce, so failure
//! classification is exercised the same way it is against a sandbox.

use std::collections::{BTreeMap, BTreeSet};

use devbox_runtime::commands;
use devbox_runtime::ExecOutput;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Dir,
    File(Vec<u8>),
}

/// Workspace-relative file tree
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    nodes: BTreeMap<String, Node>,
}

/// Reduce a path to `a/b/c` form; the workspace root is the empty string
pub fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn name_of(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}

fn is_within(path: &str, root: &str) -> bool {
    path == root || path.strip_prefix(root).is_some_and(|rest| rest.starts_with('/'))
}

fn done() -> ExecOutput {
    ExecOutput::ok(Vec::<u8>::new())
}

fn exit(code: i32) -> ExecOutput {
    ExecOutput::failed(code, Vec::<u8>::new())
}

fn fail(message: String) -> ExecOutput {
    ExecOutput::failed(1, message.into_bytes())
}

impl MemoryFs {
    /// Contents of a file
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        match self.nodes.get(&normalize(path)) {
            Some(Node::File(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Whether a directory exists (the root always does)
    pub fn is_dir(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || self.nodes.get(&path) == Some(&Node::Dir)
    }

    /// Whether any entry exists at the path
    pub fn exists(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || self.nodes.contains_key(&path)
    }

    /// Every path, sorted
    pub fn paths(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Whether the workspace has no entries
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create a directory and its parents
    pub fn make_dirs(&mut self, path: &str) -> Result<(), &'static str> {
        let path = normalize(path);
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            match self.nodes.get(&current) {
                Some(Node::File(_)) => return Err("File exists"),
                Some(Node::Dir) => {}
                None => {
                    self.nodes.insert(current.clone(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    /// Write a file, creating parent directories
    pub fn write_file(&mut self, path: &str, bytes: Vec<u8>) -> Result<(), &'static str> {
        let path = normalize(path);
        if path.is_empty() || self.nodes.get(&path) == Some(&Node::Dir) {
            return Err("Is a directory");
        }
        self.make_dirs(parent_of(&path)).map_err(|_| "Not a directory")?;
        self.nodes.insert(path, Node::File(bytes));
        Ok(())
    }

    fn remove_tree(&mut self, path: &str) {
        self.nodes.retain(|key, _| !is_within(key, path));
    }

    fn children(&self, dir: &str) -> Vec<(String, char)> {
        self.nodes
            .iter()
            .filter(|(key, _)| !key.is_empty() && parent_of(key) == dir && key.as_str() != dir)
            .map(|(key, node)| {
                let kind = if *node == Node::Dir { 'd' } else { 'f' };
                (name_of(key).to_string(), kind)
            })
            .collect()
    }

    /// Run one command against the tree
    pub fn exec(&mut self, argv: &[String], denied: &BTreeSet<String>) -> ExecOutput {
        let is_denied = |path: &str| denied.iter().any(|root| is_within(path, root));
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["sh", "-c", script, _, raw] if *script == commands::READ_FILE_SCRIPT => {
                let path = normalize(raw);
                if !self.exists(&path) {
                    exit(commands::EXIT_NOT_FOUND)
                } else if is_denied(&path) {
                    exit(commands::EXIT_PERMISSION_DENIED)
                } else {
                    match self.nodes.get(&path) {
                        Some(Node::File(bytes)) => ExecOutput::ok(bytes.clone()),
                        _ => fail(format!("cat: {raw}: Is a directory")),
                    }
                }
            }
            ["sh", "-c", script, _, raw] if *script == commands::LIST_DIR_SCRIPT => {
                let path = normalize(raw);
                if !self.is_dir(&path) {
                    exit(commands::EXIT_NOT_FOUND)
                } else if is_denied(&path) {
                    exit(commands::EXIT_PERMISSION_DENIED)
                } else if raw.starts_with('-') {
                    // find reads a leading-dash operand as an expression
                    fail(format!("find: unknown predicate `{raw}'"))
                } else {
                    let listing: String = self
                        .children(&path)
                        .into_iter()
                        .map(|(name, kind)| format!("{name}|{kind}\n"))
                        .collect();
                    ExecOutput::ok(listing)
                }
            }
            ["find", ".", "-mindepth", "1", "-printf", _] => {
                let listing: String = self
                    .nodes
                    .iter()
                    .map(|(path, node)| {
                        let kind = if *node == Node::Dir { 'd' } else { 'f' };
                        format!("{path}|{kind}\n")
                    })
                    .collect();
                ExecOutput::ok(listing)
            }
            ["find", ".", "-mindepth", "1", "-delete"] => {
                self.nodes.clear();
                done()
            }
            ["mkdir", "-p", "--", raw] => {
                let path = normalize(raw);
                if is_denied(&path) {
                    return fail(format!("mkdir: cannot create directory '{raw}': Permission denied"));
                }
                match self.make_dirs(&path) {
                    Ok(()) => done(),
                    Err(reason) => fail(format!("mkdir: cannot create directory '{raw}': {reason}")),
                }
            }
            ["chmod", "-R", _, "--", raw] => {
                if self.exists(raw) {
                    done()
                } else {
                    fail(format!("chmod: cannot access '{raw}': No such file or directory"))
                }
            }
            ["mv", "-T", "--", raw_from, raw_to] => self.rename(raw_from, raw_to, &is_denied),
            ["rm", "--", raw] => {
                let path = normalize(raw);
                if path.is_empty() || !self.exists(&path) {
                    fail(format!("rm: cannot remove '{raw}': No such file or directory"))
                } else if is_denied(&path) {
                    fail(format!("rm: cannot remove '{raw}': Permission denied"))
                } else if self.is_dir(&path) {
                    fail(format!("rm: cannot remove '{raw}': Is a directory"))
                } else {
                    self.nodes.remove(&path);
                    done()
                }
            }
            ["rm", "-r", "--", raw] => {
                let path = normalize(raw);
                if path.is_empty() || !self.exists(&path) {
                    fail(format!("rm: cannot remove '{raw}': No such file or directory"))
                } else if is_denied(&path) {
                    fail(format!("rm: cannot remove '{raw}': Permission denied"))
                } else {
                    self.remove_tree(&path);
                    done()
                }
            }
            ["rm", "-f", "--", targets @ ..] => {
                let mut errors = String::new();
                for raw in targets {
                    let path = normalize(raw);
                    if is_denied(&path) {
                        errors.push_str(&format!("rm: cannot remove '{raw}': Permission denied\n"));
                    } else if self.is_dir(&path) {
                        errors.push_str(&format!("rm: cannot remove '{raw}': Is a directory\n"));
                    } else {
                        self.nodes.remove(&path);
                    }
                }
                if errors.is_empty() {
                    done()
                } else {
                    fail(errors)
                }
            }
            ["sync"] => done(),
            [program, ..] => ExecOutput::failed(127, format!("sh: 1: {program}: not found").into_bytes()),
            [] => exit(127),
        }
    }

    fn rename(&mut self, raw_from: &str, raw_to: &str, is_denied: &dyn Fn(&str) -> bool) -> ExecOutput {
        let from = normalize(raw_from);
        let to = normalize(raw_to);

        if from.is_empty() || !self.exists(&from) {
            return fail(format!("mv: cannot stat '{raw_from}': No such file or directory"));
        }
        if is_denied(&from) || is_denied(&to) {
            return fail(format!("mv: cannot move '{raw_from}' to '{raw_to}': Permission denied"));
        }
        if to.is_empty() || !self.is_dir(parent_of(&to)) {
            return fail(format!("mv: cannot move '{raw_from}' to '{raw_to}': No such file or directory"));
        }
        if from == to {
            return done();
        }
        if is_within(&to, &from) {
            return fail(format!(
                "mv: cannot move '{raw_from}' to a subdirectory of itself, '{raw_to}'"
            ));
        }
        if self.is_dir(&to) {
            if !self.is_dir(&from) {
                return fail(format!(
                    "mv: cannot overwrite directory '{raw_to}' with non-directory"
                ));
            }
            if !self.children(&to).is_empty() {
                return fail(format!("mv: cannot move '{raw_from}' to '{raw_to}': Directory not empty"));
            }
        } else if self.exists(&to) && self.is_dir(&from) {
            return fail(format!(
                "mv: cannot overwrite non-directory '{raw_to}' with directory '{raw_from}'"
            ));
        }

        let moved: Vec<(String, Node)> = self
            .nodes
            .iter()
            .filter(|(key, _)| is_within(key, &from))
            .map(|(key, node)| (format!("{to}{}", &key[from.len()..]), node.clone()))
            .collect();
        self.remove_tree(&from);
        self.remove_tree(&to);
        self.nodes.extend(moved);
        done()
    }
}
