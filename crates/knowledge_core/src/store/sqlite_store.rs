//! SQLite-backed record store adapter.
//!
//! # Responsibility
//! - Persist organizer/page records as JSON field maps in the `records` table.
//! - Maintain linked-record fields symmetrically, the way a hosted table
//!   store does: writing one side of a link updates the inverse side.
//! - Notify subscribers after each committed write.
//!
//! # Invariants
//! - Listing order is insertion order (`seq ASC`).
//! - Each write runs in one immediate transaction; listeners fire only after
//!   commit and never while an internal borrow is held.
//! - Inverse updates that target a missing record are skipped (dangling).

use crate::db::ensure_migrated;
use crate::model::record::{
    FieldValue, Fields, Record, RecordId, Table, FIELD_CHILD_ORGANIZERS, FIELD_IS_TOP_LEVEL,
    FIELD_ORDER, FIELD_ORGANIZER, FIELD_PAGES, FIELD_PARENT_ORGANIZER,
};
use crate::store::{
    BoxFuture, ChangeListener, Operation, PermissionPolicy, RecordSource, RecordStore,
    StoreError, StoreResult, SubscriptionId, View,
};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use uuid::Uuid;

/// One direction of a symmetric link pair.
#[derive(Debug, Clone, Copy)]
struct LinkField {
    table: Table,
    field: &'static str,
    inverse_table: Table,
    inverse_field: &'static str,
}

const LINK_FIELDS: &[LinkField] = &[
    LinkField {
        table: Table::Pages,
        field: FIELD_ORGANIZER,
        inverse_table: Table::Organizers,
        inverse_field: FIELD_PAGES,
    },
    LinkField {
        table: Table::Organizers,
        field: FIELD_PAGES,
        inverse_table: Table::Pages,
        inverse_field: FIELD_ORGANIZER,
    },
    LinkField {
        table: Table::Organizers,
        field: FIELD_PARENT_ORGANIZER,
        inverse_table: Table::Organizers,
        inverse_field: FIELD_CHILD_ORGANIZERS,
    },
    LinkField {
        table: Table::Organizers,
        field: FIELD_CHILD_ORGANIZERS,
        inverse_table: Table::Organizers,
        inverse_field: FIELD_PARENT_ORGANIZER,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkChange {
    Add,
    Remove,
}

struct Subscription {
    id: SubscriptionId,
    table: Table,
    listener: Rc<dyn Fn(Table)>,
}

/// Record store adapter over a migrated SQLite connection.
pub struct SqliteRecordStore<'conn> {
    conn: &'conn Connection,
    permissions: PermissionPolicy,
    subscriptions: RefCell<Vec<Subscription>>,
    next_subscription: Cell<u64>,
}

impl<'conn> SqliteRecordStore<'conn> {
    /// Creates the adapter from a migrated connection with all operations allowed.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_migrated(conn)?;
        Ok(Self {
            conn,
            permissions: PermissionPolicy::allow_all(),
            subscriptions: RefCell::new(Vec::new()),
            next_subscription: Cell::new(1),
        })
    }

    pub fn with_permissions(mut self, permissions: PermissionPolicy) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn set_permissions(&mut self, permissions: PermissionPolicy) {
        self.permissions = permissions;
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    fn create_now(&self, table: Table, fields: Fields) -> StoreResult<RecordId> {
        let id = RecordId::new(format!("rec{}", Uuid::new_v4().simple()));
        let mut touched = BTreeSet::from([table]);

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO records (record_id, table_name, fields) VALUES (?1, ?2, ?3);",
            params![id.as_str(), table.as_str(), encode_fields(&fields)?],
        )?;
        for link in links_of(table) {
            for target in dedup(links_in(&fields, link.field)) {
                if update_inverse(&tx, link, &target, &id, LinkChange::Add)? {
                    touched.insert(link.inverse_table);
                }
            }
        }
        tx.commit()?;

        self.notify(&touched);
        Ok(id)
    }

    fn update_now(&self, table: Table, id: &RecordId, fields: Fields) -> StoreResult<()> {
        let mut touched = BTreeSet::from([table]);

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut current = load_fields(&tx, table, id)?.ok_or_else(|| StoreError::RecordNotFound {
            table,
            id: id.clone(),
        })?;

        let mut changes = Vec::new();
        for link in links_of(table) {
            let Some(value) = fields.get(link.field) else {
                continue;
            };
            let old_ids = links_in(&current, link.field);
            let new_ids = dedup(value_links(value));
            for removed in old_ids.iter().filter(|item| !new_ids.contains(item)) {
                changes.push((link, removed.clone(), LinkChange::Remove));
            }
            for added in new_ids.iter().filter(|item| !old_ids.contains(item)) {
                changes.push((link, added.clone(), LinkChange::Add));
            }
        }

        current.extend(fields);
        write_fields(&tx, table, id, &current)?;
        for (link, target, change) in changes {
            if update_inverse(&tx, link, &target, id, change)? {
                touched.insert(link.inverse_table);
            }
        }
        tx.commit()?;

        self.notify(&touched);
        Ok(())
    }

    fn delete_now(&self, table: Table, id: &RecordId) -> StoreResult<()> {
        let mut touched = BTreeSet::from([table]);

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let current = load_fields(&tx, table, id)?.ok_or_else(|| StoreError::RecordNotFound {
            table,
            id: id.clone(),
        })?;
        tx.execute(
            "DELETE FROM records WHERE record_id = ?1 AND table_name = ?2;",
            params![id.as_str(), table.as_str()],
        )?;
        for link in links_of(table) {
            for target in links_in(&current, link.field) {
                if update_inverse(&tx, link, &target, id, LinkChange::Remove)? {
                    touched.insert(link.inverse_table);
                }
            }
        }
        tx.commit()?;

        self.notify(&touched);
        Ok(())
    }

    fn notify(&self, touched: &BTreeSet<Table>) {
        // Collect first so listeners may (un)subscribe re-entrantly.
        let targets: Vec<(Table, Rc<dyn Fn(Table)>)> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|subscription| touched.contains(&subscription.table))
            .map(|subscription| (subscription.table, Rc::clone(&subscription.listener)))
            .collect();
        for (table, listener) in targets {
            listener(table);
        }
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn list_records(&self, source: RecordSource) -> StoreResult<Vec<Record>> {
        let table = match source {
            RecordSource::Table(table) => table,
            RecordSource::View(view) => view.table(),
        };

        let mut stmt = self.conn.prepare(
            "SELECT record_id, fields
             FROM records
             WHERE table_name = ?1
             ORDER BY seq ASC;",
        )?;
        let mut rows = stmt.query([table.as_str()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let fields_text: String = row.get(1)?;
            records.push(Record::new(id, decode_fields(&fields_text)?));
        }

        if let RecordSource::View(view) = source {
            match view {
                View::TopLevelOrganizers => {
                    records.retain(|record| record.flag(FIELD_IS_TOP_LEVEL) == Some(true));
                }
                View::TopLevelPages => {
                    records.retain(|record| record.links(FIELD_ORGANIZER).is_empty());
                }
            }
            // Stable sort keeps insertion order among equal `Order` values.
            records.sort_by_key(|record| record.integer(FIELD_ORDER).unwrap_or(0));
        }
        Ok(records)
    }

    fn create_record<'a>(
        &'a self,
        table: Table,
        fields: Fields,
    ) -> BoxFuture<'a, StoreResult<RecordId>> {
        Box::pin(async move {
            let result = self.create_now(table, fields);
            match &result {
                Ok(id) => debug!(
                    "event=record_create module=store status=ok table={table} record_id={id}"
                ),
                Err(err) => warn!(
                    "event=record_create module=store status=error table={table} error={err}"
                ),
            }
            result
        })
    }

    fn update_record<'a>(
        &'a self,
        table: Table,
        id: &'a RecordId,
        fields: Fields,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let result = self.update_now(table, id, fields);
            log_write("record_update", table, id, &result);
            result
        })
    }

    fn delete_record<'a>(
        &'a self,
        table: Table,
        id: &'a RecordId,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let result = self.delete_now(table, id);
            log_write("record_delete", table, id, &result);
            result
        })
    }

    fn subscribe(&self, table: Table, listener: ChangeListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.get());
        self.next_subscription.set(id.0 + 1);
        self.subscriptions.borrow_mut().push(Subscription {
            id,
            table,
            listener: Rc::from(listener),
        });
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.borrow_mut();
        let before = subscriptions.len();
        subscriptions.retain(|item| item.id != subscription);
        subscriptions.len() != before
    }

    fn has_permission(&self, table: Table, operation: Operation) -> bool {
        self.permissions.allows(table, operation)
    }
}

fn log_write(event: &str, table: Table, id: &RecordId, result: &StoreResult<()>) {
    match result {
        Ok(()) => debug!("event={event} module=store status=ok table={table} record_id={id}"),
        Err(err) => warn!(
            "event={event} module=store status=error table={table} record_id={id} error={err}"
        ),
    }
}

fn links_of(table: Table) -> impl Iterator<Item = &'static LinkField> {
    LINK_FIELDS.iter().filter(move |link| link.table == table)
}

fn value_links(value: &FieldValue) -> Vec<RecordId> {
    match value {
        FieldValue::Links(ids) => ids.clone(),
        _ => Vec::new(),
    }
}

fn links_in(fields: &Fields, name: &str) -> Vec<RecordId> {
    fields.get(name).map(value_links).unwrap_or_default()
}

fn dedup(ids: Vec<RecordId>) -> Vec<RecordId> {
    let mut seen = BTreeSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Adds or removes `source` in the inverse link cell of `target`.
///
/// Returns whether a record was modified.
fn update_inverse(
    conn: &Connection,
    link: &LinkField,
    target: &RecordId,
    source: &RecordId,
    change: LinkChange,
) -> StoreResult<bool> {
    let Some(mut fields) = load_fields(conn, link.inverse_table, target)? else {
        return Ok(false);
    };

    let mut ids = links_in(&fields, link.inverse_field);
    let before = ids.len();
    match change {
        LinkChange::Add if !ids.contains(source) => ids.push(source.clone()),
        LinkChange::Add => {}
        LinkChange::Remove => ids.retain(|id| id != source),
    }
    if ids.len() == before {
        return Ok(false);
    }

    fields.insert(link.inverse_field.to_string(), FieldValue::Links(ids));
    write_fields(conn, link.inverse_table, target, &fields)?;
    Ok(true)
}

fn load_fields(conn: &Connection, table: Table, id: &RecordId) -> StoreResult<Option<Fields>> {
    let text: Option<String> = conn
        .query_row(
            "SELECT fields
             FROM records
             WHERE record_id = ?1
               AND table_name = ?2;",
            params![id.as_str(), table.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    text.map(|value| decode_fields(&value)).transpose()
}

fn write_fields(conn: &Connection, table: Table, id: &RecordId, fields: &Fields) -> StoreResult<()> {
    let changed = conn.execute(
        "UPDATE records
         SET fields = ?3,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE record_id = ?1
           AND table_name = ?2;",
        params![id.as_str(), table.as_str(), encode_fields(fields)?],
    )?;
    if changed == 0 {
        return Err(StoreError::RecordNotFound {
            table,
            id: id.clone(),
        });
    }
    Ok(())
}

fn encode_fields(fields: &Fields) -> StoreResult<String> {
    serde_json::to_string(fields)
        .map_err(|err| StoreError::InvalidData(format!("cannot encode fields: {err}")))
}

fn decode_fields(value: &str) -> StoreResult<Fields> {
    serde_json::from_str(value)
        .map_err(|err| StoreError::InvalidData(format!("invalid fields json `{value}`: {err}")))
}
