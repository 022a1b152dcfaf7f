//! Helper functions for tree-sitter AST navigation and path handling.

use std::path::{Component, Path, PathBuf};
use tree_sitter::Node;

/// Get the text content of a node.
pub fn get_node_text<'a>(node: &Node, source: &'a str) -> &'a str {
    let start = node.start_byte();
    let end = node.end_byte();
    if start < source.len() && end <= source.len() && start < end {
        &source[start..end]
    } else {
        ""
    }
}

/// Check if a node has a child whose text is `text` (e.g. a `static` specifier).
pub fn has_child_text(node: &Node, kind: &str, text: &str, source: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| child.kind() == kind && get_node_text(&child, source) == text);
    found
}

/// Node text with all whitespace removed, e.g. `Widget :: draw` -> `Widget::draw`.
pub fn compact_text(node: &Node, source: &str) -> String {
    get_node_text(node, source)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. Symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
