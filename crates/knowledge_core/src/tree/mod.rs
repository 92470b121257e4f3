//! Organizer tree: forest model, move planning, expand state.
//!
//! # Responsibility
//! - Derive an ordered forest from organizer/page records.
//! - Compute field updates for drag-and-drop moves.
//! - Track which organizers are expanded.
//!
//! # Invariants
//! - Nothing in this module talks to the record store.

pub mod expand;
pub mod forest;
pub mod ordering;
