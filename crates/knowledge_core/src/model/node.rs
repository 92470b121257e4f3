//! Tree node read model shared by organizers and pages.
//!
//! # Invariants
//! - Only `NodeKind::Organizer` nodes carry children.
//! - `parent` is `None` exactly for top-level nodes.

use crate::model::record::{RecordId, Table};
use serde::{Deserialize, Serialize};

/// Node variant. Tree walks and ordering treat both kinds alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Folder-like grouping node.
    Organizer,
    /// Leaf content node.
    Page,
}

impl NodeKind {
    /// Table holding records of this kind.
    pub fn table(self) -> Table {
        match self {
            Self::Organizer => Table::Organizers,
            Self::Page => Table::Pages,
        }
    }

    pub fn can_contain_children(self) -> bool {
        matches!(self, Self::Organizer)
    }
}

/// Resolved node inside a [`crate::tree::forest::Forest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: RecordId,
    pub kind: NodeKind,
    pub title: String,
    /// Sibling-relative sort key as read from the store.
    pub order: i64,
    /// Resolved parent organizer; `None` means top-level.
    pub parent: Option<RecordId>,
    /// Children sorted by `order`, ties in input sequence.
    pub children: Vec<RecordId>,
}

impl TreeNode {
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_organizer(&self) -> bool {
        self.kind == NodeKind::Organizer
    }
}
