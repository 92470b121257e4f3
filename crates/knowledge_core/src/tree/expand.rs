//! Expand/collapse view state for organizers.
//!
//! # Invariants
//! - Unknown ids default to collapsed.
//! - Stale ids (organizers no longer in the forest) are kept and inert.

use crate::model::record::RecordId;
use crate::tree::forest::Forest;
use std::collections::BTreeSet;

/// Set of expanded organizer ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandState {
    expanded: BTreeSet<RecordId>,
}

impl ExpandState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips one organizer and returns the new state.
    pub fn toggle(&mut self, organizer_id: &RecordId) -> bool {
        if self.expanded.remove(organizer_id) {
            false
        } else {
            self.expanded.insert(organizer_id.clone());
            true
        }
    }

    pub fn set_expanded(&mut self, organizer_id: &RecordId, expanded: bool) {
        if expanded {
            self.expanded.insert(organizer_id.clone());
        } else {
            self.expanded.remove(organizer_id);
        }
    }

    pub fn is_expanded(&self, organizer_id: &RecordId) -> bool {
        self.expanded.contains(organizer_id)
    }

    pub fn snapshot(&self) -> BTreeSet<RecordId> {
        self.expanded.clone()
    }

    /// Replaces the whole state with persisted ids.
    pub fn restore(&mut self, ids: impl IntoIterator<Item = RecordId>) {
        self.expanded = ids.into_iter().collect();
    }

    /// Expanded ids that still name an organizer in `forest`.
    pub fn visible_in(&self, forest: &Forest) -> BTreeSet<RecordId> {
        self.expanded
            .iter()
            .filter(|id| forest.node(id).is_some_and(|node| node.is_organizer()))
            .cloned()
            .collect()
    }
}
