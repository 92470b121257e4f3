//! Move planning for drag-and-drop reordering and re-parenting.
//!
//! # Responsibility
//! - Validate a move against the current forest.
//! - Produce the per-node field updates that persist the new arrangement.
//!
//! # Invariants
//! - Pure: reads the forest, never mutates it or the store.
//! - A node never becomes a child of itself or of its own descendant.
//! - Every sibling group a plan touches ends up dense: `order` is 0..n-1.
//! - Only the moved node's entry carries a parent change.

use crate::model::node::NodeKind;
use crate::model::record::RecordId;
use crate::tree::forest::Forest;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Move rejected before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    /// Target is the node itself, one of its descendants, or a page.
    InvalidMove {
        node_id: RecordId,
        target_parent: RecordId,
    },
    /// Moved node or target parent is absent from the forest.
    NotFound(RecordId),
}

impl Display for MoveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMove {
                node_id,
                target_parent,
            } => write!(
                f,
                "invalid move: node {node_id} cannot be placed under {target_parent}"
            ),
            Self::NotFound(id) => write!(f, "tree node not found: {id}"),
        }
    }
}

impl Error for MoveError {}

/// New parent of the moved node. `parent: None` means top level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentChange {
    pub parent: Option<RecordId>,
}

/// Field update for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub node_id: RecordId,
    pub kind: NodeKind,
    pub order: i64,
    /// Set only on the moved node, and only when its parent changes.
    pub parent: Option<ParentChange>,
}

/// Ordered field updates produced for one move.
///
/// Each entry rewrites only its own node's record, so entries may be
/// written in any order and complete out of order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    pub moved: RecordId,
    pub entries: Vec<PlanEntry>,
}

impl MovePlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, node_id: &RecordId) -> Option<&PlanEntry> {
        self.entries.iter().find(|entry| &entry.node_id == node_id)
    }
}

/// Plans moving `moved` under `target_parent` (`None` = top level) at
/// `target_index` among the target's children after the move.
///
/// `target_index` past the end is clamped to append. When the move changes
/// neither parent nor any order value the plan is empty; otherwise the
/// target group, and the source group if the parent changed, are fully
/// renumbered.
pub fn plan_move(
    forest: &Forest,
    moved: &RecordId,
    target_parent: Option<&RecordId>,
    target_index: usize,
) -> Result<MovePlan, MoveError> {
    let moved_node = forest
        .node(moved)
        .ok_or_else(|| MoveError::NotFound(moved.clone()))?;

    if let Some(target) = target_parent {
        let invalid = || MoveError::InvalidMove {
            node_id: moved.clone(),
            target_parent: target.clone(),
        };
        if target == moved {
            return Err(invalid());
        }
        let target_node = forest
            .node(target)
            .ok_or_else(|| MoveError::NotFound(target.clone()))?;
        if !target_node.kind.can_contain_children() || forest.is_ancestor_or_self(moved, target) {
            return Err(invalid());
        }
    }

    let source_parent = moved_node.parent.as_ref();
    let parent_changed = source_parent != target_parent;

    let mut target_group: Vec<RecordId> = forest
        .children(target_parent)
        .unwrap_or_default()
        .iter()
        .filter(|id| *id != moved)
        .cloned()
        .collect();
    let index = target_index.min(target_group.len());
    target_group.insert(index, moved.clone());

    let already_in_place = !parent_changed
        && target_group
            .iter()
            .enumerate()
            .all(|(position, id)| forest.node(id).map(|node| node.order) == Some(position as i64));
    if already_in_place {
        return Ok(MovePlan {
            moved: moved.clone(),
            entries: Vec::new(),
        });
    }

    let mut entries = Vec::with_capacity(target_group.len());
    entries.push(PlanEntry {
        node_id: moved.clone(),
        kind: moved_node.kind,
        order: index as i64,
        parent: parent_changed.then(|| ParentChange {
            parent: target_parent.cloned(),
        }),
    });
    renumber(forest, &target_group, moved, &mut entries);

    if parent_changed {
        let source_group: Vec<RecordId> = forest
            .children(source_parent)
            .unwrap_or_default()
            .iter()
            .filter(|id| *id != moved)
            .cloned()
            .collect();
        renumber(forest, &source_group, moved, &mut entries);
    }

    Ok(MovePlan {
        moved: moved.clone(),
        entries,
    })
}

fn renumber(forest: &Forest, group: &[RecordId], moved: &RecordId, entries: &mut Vec<PlanEntry>) {
    for (position, id) in group.iter().enumerate() {
        if id == moved {
            continue;
        }
        let Some(node) = forest.node(id) else {
            continue;
        };
        entries.push(PlanEntry {
            node_id: id.clone(),
            kind: node.kind,
            order: position as i64,
            parent: None,
        });
    }
}
