//! Core logic for a knowledge base organized as a tree of organizers and
//! pages kept in a tabular record store.

pub mod db;
pub mod logging;
pub mod model;
pub mod service;
pub mod state;
pub mod store;
pub mod sync;
pub mod tree;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::node::{NodeKind, TreeNode};
pub use model::record::{FieldValue, Fields, Record, RecordId, Table};
pub use service::workspace_service::{
    Action, ActionAvailability, MoveNotice, MoveOutcome, ServiceError, ServiceResult,
    WorkspaceService,
};
pub use state::{DetailMode, LocalState, LocalStateRepository, SqliteLocalStateRepository};
pub use store::{
    Operation, PermissionPolicy, RecordSource, RecordStore, SqliteRecordStore, StoreError,
    StoreResult, View,
};
pub use sync::{PartialWriteError, SyncConfig, SyncError, TreeSync};
pub use tree::expand::ExpandState;
pub use tree::forest::{Forest, OutlineEntry};
pub use tree::ordering::{plan_move, MoveError, MovePlan, PlanEntry};

/// Health check used by shells to confirm the core is linked.
pub fn ping() -> &'static str {
    "pong"
}

pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
