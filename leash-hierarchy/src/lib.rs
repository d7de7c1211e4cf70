//! leash-hierarchy: UI hierarchy model and query engine
//!
//! Pure functions for querying the view-hierarchy tree a target reports.
//! No I/O and no side effects; every query operates on an immutable
//! snapshot, so repeated calls on the same tree give identical results.
//!
//! These helpers let automation answer questions like "what text is on
//! screen right now?" or "is the submit button visible?" without walking
//! the raw tree by hand:
//!
//! ```
//! use leash_hierarchy::{find_by_test_id, get_all_texts, HierarchyNode, TextOptions};
//!
//! let root = HierarchyNode::new("App").with_children(vec![
//!     HierarchyNode::new("Button")
//!         .with_test_id("submit-btn")
//!         .with_text("Submit"),
//! ]);
//!
//! assert_eq!(get_all_texts(&root, &TextOptions::default()), vec!["Submit"]);
//! assert!(find_by_test_id("submit-btn", &root).is_some());
//! ```

pub mod node;
pub mod query;

pub use node::HierarchyNode;
pub use query::{
    dump_tree, find_by_name, find_by_test_id, find_by_text, get_all_test_ids, get_all_texts,
    get_path_to_test_id, walk, NodeMatch, TextFilter, TextOptions,
};
