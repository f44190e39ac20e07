//! Workspace tree building
//!
//! Listings arrive as `path|type` lines. Parsing keeps only files and
//! directories, and drops hidden entries, the root itself and
//! truncated-extension artifacts. The nested tree serializes as JSON with
//! directories as objects and files as `null`:
//!
//! ```json
//! { "src": { "main.py": null }, "README.md": null }
//! ```

use std::collections::BTreeMap;

use devbox_sanitize::path::{file_name, is_truncation_artifact};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::types::{PathKind, TreeEntry};

/// Node of a workspace tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    /// Regular file
    File,
    /// Directory with its children
    Directory(Tree),
}

impl TreeNode {
    /// Kind of this node
    #[inline]
    #[must_use]
    pub fn kind(&self) -> PathKind {
        match self {
            Self::File => PathKind::File,
            Self::Directory(_) => PathKind::Directory,
        }
    }
}

/// Nested workspace tree, children sorted by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    children: BTreeMap<String, TreeNode>,
}

impl Tree {
    /// Empty tree
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of immediate children
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether there are no children
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Immediate children in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TreeNode)> {
        self.children.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Look up a `/`-separated path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut node = self.children.get(segments.next()?)?;
        for segment in segments {
            match node {
                TreeNode::Directory(tree) => node = tree.children.get(segment)?,
                TreeNode::File => return None,
            }
        }
        Some(node)
    }

    /// Insert a path, creating intermediate directories
    ///
    /// A directory always wins over a file of the same name.
    pub fn insert(&mut self, path: &str, kind: PathKind) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut tree = self;
        for segment in parents {
            tree = tree.directory_mut(segment);
        }
        match kind {
            PathKind::Directory => {
                tree.directory_mut(last);
            }
            PathKind::File => {
                tree.children.entry((*last).to_string()).or_insert(TreeNode::File);
            }
        }
    }

    fn directory_mut(&mut self, name: &str) -> &mut Tree {
        let node = self
            .children
            .entry(name.to_string())
            .or_insert_with(|| TreeNode::Directory(Tree::new()));
        if matches!(node, TreeNode::File) {
            *node = TreeNode::Directory(Tree::new());
        }
        match node {
            TreeNode::Directory(tree) => tree,
            TreeNode::File => unreachable!("file node was just replaced by a directory"),
        }
    }

    /// JSON rendering
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for Tree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.children.len()))?;
        for (name, node) in &self.children {
            map.serialize_entry(name, node)?;
        }
        map.end()
    }
}

impl Serialize for TreeNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::File => serializer.serialize_unit(),
            Self::Directory(tree) => tree.serialize(serializer),
        }
    }
}

fn is_hidden(path: &str) -> bool {
    path.split('/').any(|segment| segment.starts_with('.'))
}

/// Parse `path|type` listing lines into visible entries
///
/// Unknown type letters, hidden paths, the root and truncated-extension
/// artifacts are skipped. Order and duplicates are preserved.
#[must_use]
pub fn parse_entries(listing: &str) -> Vec<(String, PathKind)> {
    listing
        .lines()
        .filter_map(|line| {
            let (path, letter) = line.trim_end_matches('\r').rsplit_once('|')?;
            let kind = PathKind::from_type_letter(letter)?;
            let path = path.trim_start_matches("./").trim_matches('/');
            if path.is_empty() || path == "." || is_hidden(path) {
                return None;
            }
            if kind == PathKind::File && is_truncation_artifact(file_name(path)) {
                return None;
            }
            Some((path.to_string(), kind))
        })
        .collect()
}

/// Build a nested tree from listing lines
#[must_use]
pub fn build_tree(listing: &str) -> Tree {
    let mut tree = Tree::new();
    for (path, kind) in parse_entries(listing) {
        tree.insert(&path, kind);
    }
    tree
}

/// Build a flat, name-sorted list of one directory's children
///
/// Names are deduplicated with directories winning over files.
#[must_use]
pub fn build_listing(listing: &str) -> Vec<TreeEntry> {
    let mut children: BTreeMap<String, PathKind> = BTreeMap::new();
    for (path, kind) in parse_entries(listing) {
        let name = file_name(&path).to_string();
        children
            .entry(name)
            .and_modify(|existing| {
                if kind.is_dir() {
                    *existing = PathKind::Directory;
                }
            })
            .or_insert(kind);
    }
    children
        .into_iter()
        .map(|(name, kind)| TreeEntry { name, kind })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn duplicates_collapse() {
        let tree = build_tree("a.txt|f\nb|d\na.txt|f\n");
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.get("a.txt"), Some(&TreeNode::File));
        assert_eq!(tree.get("b").map(TreeNode::kind), Some(PathKind::Directory));
    }

    #[test]
    fn directory_wins_over_file() {
        let tree = build_tree("x|f\nx|d\ny|d\ny|f\n");
        assert_eq!(tree.get("x").map(TreeNode::kind), Some(PathKind::Directory));
        assert_eq!(tree.get("y").map(TreeNode::kind), Some(PathKind::Directory));
    }

    #[test]
    fn nested_json_shape() {
        let tree = build_tree("src|d\nsrc/main.py|f\nsrc/lib|d\nREADME.md|f\n");
        assert_eq!(
            tree.to_json(),
            json!({ "README.md": null, "src": { "lib": {}, "main.py": null } })
        );
    }

    #[test]
    fn parents_are_implied() {
        let tree = build_tree("deep/er/file.rs|f\n");
        assert_eq!(tree.to_json(), json!({ "deep": { "er": { "file.rs": null } } }));
    }

    #[test]
    fn filters_hidden_root_and_artifacts() {
        let entries = parse_entries(
            ".|d\n.git|d\n.git/config|f\nsrc/.cache|d\napp.jso|f\napp.json|f\nlink|l\nmain.c|f\nbad line\n",
        );
        assert_eq!(
            entries,
            vec![
                ("app.json".to_string(), PathKind::File),
                ("main.c".to_string(), PathKind::File),
            ]
        );
    }

    #[test]
    fn listing_is_sorted_and_deduplicated() {
        let entries = build_listing("zeta|f\nalpha|d\nzeta|f\nmid.py|f\n");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid.py", "zeta"]);
        assert_eq!(entries[0].kind, PathKind::Directory);
    }

    #[test]
    fn crlf_lines_parse() {
        let entries = parse_entries("a.txt|f\r\nb|d\r\n");
        assert_eq!(entries.len(), 2);
    }

    proptest! {
        #[test]
        fn each_name_appears_once(names in prop::collection::vec("[a-c]{1,2}", 0..20), dirs in prop::collection::vec(any::<bool>(), 20)) {
            let listing: String = names
                .iter()
                .zip(dirs.iter())
                .map(|(name, dir)| format!("{name}|{}\n", if *dir { 'd' } else { 'f' }))
                .collect();
            let tree = build_tree(&listing);
            let mut unique = names.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(tree.len(), unique.len());
        }
    }
}
