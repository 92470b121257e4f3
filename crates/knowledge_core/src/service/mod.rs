//! Use-case services over the record store and local state.
//!
//! # Responsibility
//! - Orchestrate store writes, tree sync, and view state into user-level
//!   actions.
//! - Keep callers (CLI, UI shells) decoupled from storage details.

pub mod workspace_service;
