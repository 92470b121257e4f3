//! Domain model for the organizer tree.
//!
//! # Responsibility
//! - Define the record shape exchanged with the record store.
//! - Define the node read model shared by organizers and pages.
//!
//! # Invariants
//! - The record store is the system of record; nodes are derived views.

pub mod node;
pub mod record;
