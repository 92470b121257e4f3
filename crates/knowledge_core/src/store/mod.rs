//! Record store adapter contract.
//!
//! # Responsibility
//! - Define the create/read/update/delete surface the organizer tree needs
//!   from the tabular record store.
//! - Define change subscription and capability checks.
//!
//! # Invariants
//! - Writes are asynchronous; callers may issue several and await them
//!   together. Futures are not `Send`: everything runs on one logical thread.
//! - Permission is checked with [`RecordStore::has_permission`] before a
//!   write is attempted. Core code never relies on catching a denial.
//! - Listeners receive only the table that changed, never a payload.

use crate::db::DbError;
use crate::model::record::{Fields, Record, RecordId, Table};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

pub mod sqlite_store;

pub use sqlite_store::SqliteRecordStore;

/// Boxed future for object-safe async adapter methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Callback invoked after records of a table changed.
pub type ChangeListener = Box<dyn Fn(Table)>;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from record store adapter operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target record does not exist in the given table.
    RecordNotFound { table: Table, id: RecordId },
    /// Persisted data cannot be converted into a record.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::RecordNotFound { table, id } => {
                write!(f, "record not found: {id} in table {table}")
            }
            Self::InvalidData(message) => write!(f, "invalid record data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::RecordNotFound { .. } => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Write operation guarded by a capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Filtered, sorted result set over one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Organizers flagged `Is Top-level`, ascending by `Order`.
    TopLevelOrganizers,
    /// Pages with no `Organizer` link, ascending by `Order`.
    TopLevelPages,
}

impl View {
    pub fn table(self) -> Table {
        match self {
            Self::TopLevelOrganizers => Table::Organizers,
            Self::TopLevelPages => Table::Pages,
        }
    }
}

/// Source of a record listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    Table(Table),
    View(View),
}

impl From<Table> for RecordSource {
    fn from(value: Table) -> Self {
        Self::Table(value)
    }
}

impl From<View> for RecordSource {
    fn from(value: View) -> Self {
        Self::View(value)
    }
}

/// Handle returned by [`RecordStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Table/operation grants of the current collaborator.
///
/// Everything is allowed unless explicitly denied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionPolicy {
    denied: HashSet<(Table, Operation)>,
}

impl PermissionPolicy {
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Returns the policy with one table/operation pair denied.
    pub fn deny(mut self, table: Table, operation: Operation) -> Self {
        self.denied.insert((table, operation));
        self
    }

    pub fn allows(&self, table: Table, operation: Operation) -> bool {
        !self.denied.contains(&(table, operation))
    }
}

/// Adapter over the external tabular record store.
pub trait RecordStore {
    /// Lists records of a table or view in store order.
    fn list_records(&self, source: RecordSource) -> StoreResult<Vec<Record>>;
    /// Creates one record and returns its new id.
    fn create_record<'a>(
        &'a self,
        table: Table,
        fields: Fields,
    ) -> BoxFuture<'a, StoreResult<RecordId>>;
    /// Merges `fields` into an existing record.
    fn update_record<'a>(
        &'a self,
        table: Table,
        id: &'a RecordId,
        fields: Fields,
    ) -> BoxFuture<'a, StoreResult<()>>;
    /// Deletes one record.
    fn delete_record<'a>(&'a self, table: Table, id: &'a RecordId)
        -> BoxFuture<'a, StoreResult<()>>;
    /// Registers a change listener for one table.
    fn subscribe(&self, table: Table, listener: ChangeListener) -> SubscriptionId;
    /// Removes a listener. Returns whether it was registered.
    fn unsubscribe(&self, subscription: SubscriptionId) -> bool;
    /// Whether the current collaborator may perform `operation` on `table`.
    fn has_permission(&self, table: Table, operation: Operation) -> bool;
}

#[cfg(test)]
mod tests {
    use super::{Operation, PermissionPolicy};
    use crate::model::record::Table;

    #[test]
    fn permission_policy_denies_only_listed_pairs() {
        let policy = PermissionPolicy::allow_all().deny(Table::Pages, Operation::Delete);

        assert!(!policy.allows(Table::Pages, Operation::Delete));
        assert!(policy.allows(Table::Pages, Operation::Update));
        assert!(policy.allows(Table::Organizers, Operation::Delete));
    }
}
