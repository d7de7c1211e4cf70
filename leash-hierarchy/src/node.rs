//! The UI-tree data shape reported by targets

use serde::{Deserialize, Serialize};

/// One UI element and its descendants
///
/// The root node has no parent; the tree is acyclic. Unknown fields a
/// target includes alongside these are ignored on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Component type, e.g. "Button" or "FlatList"
    pub name: String,
    /// Visible text content, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Stable automation identifier, if the target assigned one
    #[serde(default, rename = "testID", skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    /// Child elements, left to right
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    /// Create a leaf node with the given component name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: None,
            test_id: None,
            children: Vec::new(),
        }
    }

    /// Set the text content
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set the automation identifier
    pub fn with_test_id(mut self, test_id: impl Into<String>) -> Self {
        self.test_id = Some(test_id.into());
        self
    }

    /// Replace the children
    pub fn with_children(mut self, children: Vec<HierarchyNode>) -> Self {
        self.children = children;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_fields() {
        let node = HierarchyNode::new("Button")
            .with_text("Submit")
            .with_test_id("submit-btn");

        assert_eq!(node.name, "Button");
        assert_eq!(node.text.as_deref(), Some("Submit"));
        assert_eq!(node.test_id.as_deref(), Some("submit-btn"));
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_serialize_uses_wire_field_names() {
        let node = HierarchyNode::new("Button").with_test_id("submit-btn");
        let json = serde_json::to_value(&node).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"name": "Button", "testID": "submit-btn"})
        );
    }

    #[test]
    fn test_deserialize_ignores_unknown_fields() {
        let json = r#"{
            "name": "Text",
            "text": "Hello",
            "key": null,
            "props": {"numberOfLines": 1},
            "children": [{"name": "Inner"}]
        }"#;

        let node: HierarchyNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.name, "Text");
        assert_eq!(node.text.as_deref(), Some("Hello"));
        assert_eq!(node.test_id, None);
        assert_eq!(node.children.len(), 1);
    }

    #[test]
    fn test_missing_children_is_empty_vec() {
        let node: HierarchyNode = serde_json::from_str(r#"{"name": "View"}"#).unwrap();
        assert!(node.children.is_empty());
    }
}
