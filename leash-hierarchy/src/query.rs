//! Pure query operations over a hierarchy snapshot
//!
//! All traversal is pre-order (node first, then each child left to
//! right), building a breadcrumb path of the form
//! `Root > Child > Grandchild` as it descends.

use std::collections::{BTreeSet, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::node::HierarchyNode;

lazy_static! {
    static ref PURE_NUMBER_REGEX: Regex = Regex::new(r"^\d+(\.\d+)?$").unwrap();
}

/// Prefix of generic stringification noise like "[object Object]"
const OBJECT_STRING_PREFIX: &str = "[object";

/// A node located by a query, with its position in the tree
#[derive(Debug, Clone)]
pub struct NodeMatch<'a> {
    pub node: &'a HierarchyNode,
    /// Breadcrumb path from root, e.g. "App > HomeScreen > Button"
    pub path: String,
    pub depth: usize,
}

/// Walk every node in the tree in pre-order, calling `visitor` with the
/// node, its breadcrumb path, and its depth
///
/// Every other query in this module is expressed in terms of this.
pub fn walk<'a, F>(root: &'a HierarchyNode, visitor: &mut F)
where
    F: FnMut(NodeMatch<'a>),
{
    walk_from(root, &root.name, 0, visitor);
}

fn walk_from<'a, F>(node: &'a HierarchyNode, path: &str, depth: usize, visitor: &mut F)
where
    F: FnMut(NodeMatch<'a>),
{
    visitor(NodeMatch {
        node,
        path: path.to_string(),
        depth,
    });
    for child in &node.children {
        let child_path = format!("{} > {}", path, child.name);
        walk_from(child, &child_path, depth + 1, visitor);
    }
}

/// Matcher for text-valued queries
///
/// A string filter matches as a case-insensitive literal substring; a
/// pre-built regex matches as-is.
#[derive(Debug, Clone)]
pub enum TextFilter {
    Substring(String),
    Pattern(Regex),
}

impl TextFilter {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Substring(needle) => value
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            Self::Pattern(regex) => regex.is_match(value),
        }
    }
}

impl From<&str> for TextFilter {
    fn from(needle: &str) -> Self {
        Self::Substring(needle.to_string())
    }
}

impl From<String> for TextFilter {
    fn from(needle: String) -> Self {
        Self::Substring(needle)
    }
}

impl From<Regex> for TextFilter {
    fn from(regex: Regex) -> Self {
        Self::Pattern(regex)
    }
}

/// Toggles for [`get_all_texts`] noise filtering
#[derive(Debug, Clone, Copy, Default)]
pub struct TextOptions {
    /// Keep values matching `^\d+(\.\d+)?$`
    pub include_numbers: bool,
    /// Keep values starting with "[object"
    pub include_object_strings: bool,
}

/// Return all distinct non-empty text values in first-encounter order
///
/// Pure numbers and "[object …]" stringification noise are excluded by
/// default; each exclusion is independently toggleable.
pub fn get_all_texts(root: &HierarchyNode, options: &TextOptions) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut results = Vec::new();

    walk(root, &mut |m| {
        let Some(text) = m.node.text.as_deref() else {
            return;
        };
        if text.is_empty() {
            return;
        }
        if !options.include_object_strings && text.starts_with(OBJECT_STRING_PREFIX) {
            return;
        }
        if !options.include_numbers && PURE_NUMBER_REGEX.is_match(text) {
            return;
        }
        if seen.insert(text.to_string()) {
            results.push(text.to_string());
        }
    });

    results
}

/// Return all testIDs present in the tree, deduped and sorted
pub fn get_all_test_ids(root: &HierarchyNode) -> Vec<String> {
    let mut results = BTreeSet::new();
    walk(root, &mut |m| {
        if let Some(test_id) = &m.node.test_id {
            results.insert(test_id.clone());
        }
    });
    results.into_iter().collect()
}

/// Find all nodes whose text matches the filter, in traversal order
pub fn find_by_text<'a>(
    filter: impl Into<TextFilter>,
    root: &'a HierarchyNode,
) -> Vec<NodeMatch<'a>> {
    let filter = filter.into();
    let mut results = Vec::new();

    walk(root, &mut |m| {
        if let Some(text) = m.node.text.as_deref() {
            if filter.matches(text) {
                results.push(m);
            }
        }
    });

    results
}

/// Find all nodes whose name (component type) matches the filter
///
/// Useful for finding e.g. all "Header…" or "Screen…" components.
pub fn find_by_name<'a>(
    filter: impl Into<TextFilter>,
    root: &'a HierarchyNode,
) -> Vec<NodeMatch<'a>> {
    let filter = filter.into();
    let mut results = Vec::new();

    walk(root, &mut |m| {
        if filter.matches(&m.node.name) {
            results.push(m);
        }
    });

    results
}

/// Find the first node (in pre-order) with the given testID
pub fn find_by_test_id<'a>(test_id: &str, root: &'a HierarchyNode) -> Option<NodeMatch<'a>> {
    let mut result = None;

    walk(root, &mut |m| {
        if result.is_none() && m.node.test_id.as_deref() == Some(test_id) {
            result = Some(m);
        }
    });

    result
}

/// Return the breadcrumb path to the node with the given testID, if any
pub fn get_path_to_test_id(test_id: &str, root: &HierarchyNode) -> Option<String> {
    find_by_test_id(test_id, root).map(|m| m.path)
}

/// Render the whole tree as indented lines, one per node
///
/// Each line shows the name, `[testID=…]` if present, and quoted text if
/// present and not stringification noise.
pub fn dump_tree(root: &HierarchyNode) -> String {
    let mut lines = Vec::new();

    walk(root, &mut |m| {
        let indent = "  ".repeat(m.depth);
        let test_id = m
            .node
            .test_id
            .as_deref()
            .map(|id| format!(" [testID={}]", id))
            .unwrap_or_default();
        let text = m
            .node
            .text
            .as_deref()
            .filter(|t| !t.is_empty() && !t.starts_with(OBJECT_STRING_PREFIX))
            .map(|t| format!(" \"{}\"", t))
            .unwrap_or_default();
        lines.push(format!("{}{}{}{}", indent, m.node.name, test_id, text));
    });

    lines.join("\n")
}
