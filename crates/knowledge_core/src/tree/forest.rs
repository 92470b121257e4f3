//! Forest of organizers and pages derived from store records.
//!
//! # Responsibility
//! - Resolve link fields into a parent/child structure with sorted children.
//! - Answer path and membership queries used to validate moves.
//!
//! # Invariants
//! - The result is always a forest: acyclic, each node under at most one
//!   parent, pages never have children.
//! - Sibling lists are sorted by `order` ascending; equal orders keep input
//!   sequence (organizer records first, then page records).
//! - Building from the same input twice yields equal forests.
//! - Dangling link ids are skipped, never an error.

use crate::model::node::{NodeKind, TreeNode};
use crate::model::record::{
    Record, RecordId, FIELD_CHILD_ORGANIZERS, FIELD_ORDER, FIELD_ORGANIZER, FIELD_PAGES,
    FIELD_PARENT_ORGANIZER, FIELD_TITLE,
};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

/// One entry of a depth-first outline walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    /// 0 for top-level nodes.
    pub depth: usize,
    pub id: RecordId,
}

/// Read-derived cache of the organizer hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Forest {
    nodes: HashMap<RecordId, TreeNode>,
    roots: Vec<RecordId>,
}

struct Candidate<'r> {
    record: &'r Record,
    kind: NodeKind,
    order: i64,
}

impl Forest {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the forest from the full organizer and page record sets.
    ///
    /// Parent-side lists (`Child Organizers`, `Pages`) own membership. A
    /// child-side back-reference is used only for nodes no list claims.
    pub fn build(organizers: &[Record], pages: &[Record]) -> Self {
        let mut candidates: Vec<Candidate<'_>> = Vec::with_capacity(organizers.len() + pages.len());
        let mut index: HashMap<&RecordId, usize> = HashMap::new();
        let inputs = organizers
            .iter()
            .map(|record| (record, NodeKind::Organizer))
            .chain(pages.iter().map(|record| (record, NodeKind::Page)));
        for (record, kind) in inputs {
            if index.contains_key(&record.id) {
                warn!(
                    "event=forest_build module=tree status=duplicate_record record_id={}",
                    record.id
                );
                continue;
            }
            index.insert(&record.id, candidates.len());
            candidates.push(Candidate {
                record,
                kind,
                order: record.integer(FIELD_ORDER).unwrap_or(0),
            });
        }

        // parent[i] = index of the claiming organizer.
        let mut parent: Vec<Option<usize>> = vec![None; candidates.len()];

        for (owner, candidate) in candidates.iter().enumerate() {
            if candidate.kind != NodeKind::Organizer {
                continue;
            }
            let listed = [
                (FIELD_CHILD_ORGANIZERS, NodeKind::Organizer),
                (FIELD_PAGES, NodeKind::Page),
            ];
            for (field, expected_kind) in listed {
                for child_id in candidate.record.links(field) {
                    let Some(&child) = index.get(child_id) else {
                        debug!(
                            "event=forest_build module=tree status=dangling_link record_id={} field={} target={}",
                            candidate.record.id, field, child_id
                        );
                        continue;
                    };
                    if child == owner || candidates[child].kind != expected_kind {
                        continue;
                    }
                    if let Some(existing) = parent[child] {
                        if existing != owner {
                            warn!(
                                "event=forest_build module=tree status=duplicate_parent record_id={} kept={} ignored={}",
                                child_id, candidates[existing].record.id, candidate.record.id
                            );
                        }
                        continue;
                    }
                    parent[child] = Some(owner);
                }
            }
        }

        for (child, candidate) in candidates.iter().enumerate() {
            if parent[child].is_some() {
                continue;
            }
            let back_field = match candidate.kind {
                NodeKind::Organizer => FIELD_PARENT_ORGANIZER,
                NodeKind::Page => FIELD_ORGANIZER,
            };
            let Some(parent_id) = candidate.record.links(back_field).first() else {
                continue;
            };
            match index.get(parent_id) {
                Some(&owner)
                    if owner != child && candidates[owner].kind == NodeKind::Organizer =>
                {
                    parent[child] = Some(owner);
                }
                _ => debug!(
                    "event=forest_build module=tree status=dangling_link record_id={} field={} target={}",
                    candidate.record.id, back_field, parent_id
                ),
            }
        }

        break_cycles(&candidates, &mut parent);

        let sort_key = |position: &usize| (candidates[*position].order, *position);
        let mut child_positions: Vec<Vec<usize>> = vec![Vec::new(); candidates.len()];
        let mut root_positions = Vec::new();
        for (position, owner) in parent.iter().enumerate() {
            match owner {
                Some(owner) => child_positions[*owner].push(position),
                None => root_positions.push(position),
            }
        }
        root_positions.sort_by_key(sort_key);

        let mut nodes = HashMap::with_capacity(candidates.len());
        for (position, candidate) in candidates.iter().enumerate() {
            let mut children = std::mem::take(&mut child_positions[position]);
            children.sort_by_key(sort_key);
            let node = TreeNode {
                id: candidate.record.id.clone(),
                kind: candidate.kind,
                title: candidate
                    .record
                    .text(FIELD_TITLE)
                    .unwrap_or_default()
                    .to_string(),
                order: candidate.order,
                parent: parent[position].map(|owner| candidates[owner].record.id.clone()),
                children: children
                    .into_iter()
                    .map(|child| candidates[child].record.id.clone())
                    .collect(),
            };
            nodes.insert(node.id.clone(), node);
        }

        let forest = Self {
            nodes,
            roots: root_positions
                .into_iter()
                .map(|position| candidates[position].record.id.clone())
                .collect(),
        };
        debug!(
            "event=forest_build module=tree status=ok nodes={} roots={}",
            forest.len(),
            forest.roots.len()
        );
        forest
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &RecordId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    /// Top-level organizers and pages, sorted.
    pub fn roots(&self) -> &[RecordId] {
        &self.roots
    }

    /// Sorted sibling list under `parent` (`None` = top level).
    ///
    /// Returns `None` when `parent` is absent from the forest.
    pub fn children(&self, parent: Option<&RecordId>) -> Option<&[RecordId]> {
        match parent {
            None => Some(self.roots.as_slice()),
            Some(id) => self.nodes.get(id).map(|node| node.children.as_slice()),
        }
    }

    pub fn parent_of(&self, id: &RecordId) -> Option<&RecordId> {
        self.nodes.get(id).and_then(|node| node.parent.as_ref())
    }

    pub fn is_top_level(&self, id: &RecordId) -> Option<bool> {
        self.nodes.get(id).map(TreeNode::is_top_level)
    }

    /// Ids from the top-level ancestor down to `id` (inclusive).
    pub fn find_path(&self, id: &RecordId) -> Option<Vec<RecordId>> {
        let mut node = self.nodes.get(id)?;
        let mut path = vec![node.id.clone()];
        while let Some(parent_id) = node.parent.as_ref() {
            node = self.nodes.get(parent_id)?;
            path.push(node.id.clone());
        }
        path.reverse();
        Some(path)
    }

    /// Whether `ancestor` lies on the path from the top level to `id`.
    pub fn is_ancestor_or_self(&self, ancestor: &RecordId, id: &RecordId) -> bool {
        self.find_path(id)
            .is_some_and(|path| path.iter().any(|step| step == ancestor))
    }

    /// Every node below `id`, depth first.
    pub fn descendants(&self, id: &RecordId) -> Vec<RecordId> {
        let mut result = Vec::new();
        if let Some(node) = self.nodes.get(id) {
            self.walk(&node.children, 0, &mut |_, child| result.push(child.clone()));
        }
        result
    }

    /// Depth-first, sibling-ordered walk of the whole forest.
    pub fn outline(&self) -> Vec<OutlineEntry> {
        let mut entries = Vec::with_capacity(self.nodes.len());
        self.walk(&self.roots, 0, &mut |depth, id| {
            entries.push(OutlineEntry {
                depth,
                id: id.clone(),
            })
        });
        entries
    }

    fn walk(&self, ids: &[RecordId], depth: usize, visit: &mut dyn FnMut(usize, &RecordId)) {
        for id in ids {
            visit(depth, id);
            if let Some(node) = self.nodes.get(id) {
                self.walk(&node.children, depth + 1, visit);
            }
        }
    }
}

/// Detaches one node per parent cycle until every node reaches the top level.
///
/// The detached node is the cycle member with the earliest input sequence.
fn break_cycles(candidates: &[Candidate<'_>], parent: &mut [Option<usize>]) {
    loop {
        let reachable = reachable_from_roots(parent);
        let Some(start) = (0..parent.len()).find(|position| !reachable.contains(position)) else {
            return;
        };

        let mut trail = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = start;
        while seen.insert(cursor) {
            trail.push(cursor);
            match parent[cursor] {
                Some(next) => cursor = next,
                None => break,
            }
        }
        let cycle_start = trail
            .iter()
            .position(|position| *position == cursor)
            .unwrap_or(0);
        let detached = trail[cycle_start..]
            .iter()
            .copied()
            .min()
            .unwrap_or(start);

        warn!(
            "event=forest_build module=tree status=cycle_detected record_id={}",
            candidates[detached].record.id
        );
        parent[detached] = None;
    }
}

fn reachable_from_roots(parent: &[Option<usize>]) -> HashSet<usize> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); parent.len()];
    let mut stack = Vec::new();
    for (position, owner) in parent.iter().enumerate() {
        match owner {
            Some(owner) => children[*owner].push(position),
            None => stack.push(position),
        }
    }

    let mut reachable = HashSet::with_capacity(parent.len());
    while let Some(position) = stack.pop() {
        if reachable.insert(position) {
            stack.extend(children[position].iter().copied());
        }
    }
    reachable
}
