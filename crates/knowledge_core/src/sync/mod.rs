//! Synchronization between the forest and the record store.
//!
//! # Responsibility
//! - Write move plans to the record store, concurrently.
//! - Rebuild the forest after the store reports changes, debounced.
//! - Flush coalesced field edits.
//!
//! # Invariants
//! - The forest is only ever replaced by a full rebuild, never patched.
//! - A partial plan write is reported, logged, and followed by a scheduled
//!   rebuild so the forest converges on what the store actually holds.
//! - Subscriptions registered at construction are removed on drop.

use crate::model::node::NodeKind;
use crate::model::record::{
    FieldValue, Fields, RecordId, Table, FIELD_IS_TOP_LEVEL, FIELD_ORDER, FIELD_ORGANIZER,
    FIELD_PARENT_ORGANIZER,
};
use crate::store::{RecordSource, RecordStore, StoreError, SubscriptionId};
use crate::tree::forest::Forest;
use crate::tree::ordering::{plan_move, MoveError, MovePlan, PlanEntry};
use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub mod schedule;

use schedule::{Debouncer, PendingWrite, WriteQueue};

const DEFAULT_REBUILD_DEBOUNCE_MS: u64 = 300;
const DEFAULT_WRITE_DEBOUNCE_MS: u64 = 500;

/// Timing knobs for the synchronization layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet window after the last change notification before rebuilding.
    pub rebuild_debounce_ms: u64,
    /// Quiet window after the last edit to a record before writing it.
    pub write_debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rebuild_debounce_ms: DEFAULT_REBUILD_DEBOUNCE_MS,
            write_debounce_ms: DEFAULT_WRITE_DEBOUNCE_MS,
        }
    }
}

impl SyncConfig {
    pub fn rebuild_debounce(&self) -> Duration {
        Duration::from_millis(self.rebuild_debounce_ms)
    }

    pub fn write_debounce(&self) -> Duration {
        Duration::from_millis(self.write_debounce_ms)
    }
}

/// One plan entry the store refused.
#[derive(Debug)]
pub struct FailedWrite {
    pub entry: PlanEntry,
    pub error: StoreError,
}

/// Some updates of a plan were acknowledged, others failed.
#[derive(Debug)]
pub struct PartialWriteError {
    pub succeeded: Vec<PlanEntry>,
    pub failed: Vec<FailedWrite>,
}

impl PartialWriteError {
    pub fn failed_ids(&self) -> Vec<&RecordId> {
        self.failed.iter().map(|item| &item.entry.node_id).collect()
    }
}

impl Display for PartialWriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} tree updates failed",
            self.failed.len(),
            self.failed.len() + self.succeeded.len()
        )
    }
}

impl Error for PartialWriteError {}

/// Errors from synchronization operations.
#[derive(Debug)]
pub enum SyncError {
    /// Reading from the record store failed.
    Store(StoreError),
    /// Some plan updates failed; the rest were applied.
    PartialWrite(PartialWriteError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::PartialWrite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::PartialWrite(err) => Some(err),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Outcome of flushing queued edits.
#[derive(Debug, Default)]
pub struct EditFlush {
    pub written: Vec<RecordId>,
    pub failed: Vec<(RecordId, StoreError)>,
}

/// Owns the current forest and keeps it in step with the record store.
pub struct TreeSync<'s, S: RecordStore + ?Sized> {
    store: &'s S,
    config: SyncConfig,
    forest: RefCell<Rc<Forest>>,
    changes: Rc<RefCell<Debouncer<Table>>>,
    edits: RefCell<WriteQueue>,
    subscriptions: Vec<SubscriptionId>,
    rebuilds: Cell<u64>,
}

impl<'s, S: RecordStore + ?Sized> TreeSync<'s, S> {
    /// Subscribes to organizer/page changes. The forest starts empty until
    /// [`TreeSync::hydrate`] runs.
    pub fn new(store: &'s S, config: SyncConfig) -> Self {
        let changes = Rc::new(RefCell::new(Debouncer::new(config.rebuild_debounce())));
        let subscriptions = [Table::Organizers, Table::Pages]
            .into_iter()
            .map(|table| {
                let changes = Rc::clone(&changes);
                store.subscribe(
                    table,
                    Box::new(move |changed| {
                        changes.borrow_mut().touch(changed, Instant::now());
                    }),
                )
            })
            .collect();

        Self {
            store,
            config,
            forest: RefCell::new(Rc::new(Forest::empty())),
            changes,
            edits: RefCell::new(WriteQueue::new(config.write_debounce())),
            subscriptions,
            rebuilds: Cell::new(0),
        }
    }

    pub fn store(&self) -> &'s S {
        self.store
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    /// Current forest snapshot.
    pub fn forest(&self) -> Rc<Forest> {
        Rc::clone(&self.forest.borrow())
    }

    /// Number of completed rebuilds.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.get()
    }

    /// Rebuilds the forest from the store immediately.
    pub fn hydrate(&self) -> Result<Rc<Forest>, SyncError> {
        let organizers = self
            .store
            .list_records(RecordSource::Table(Table::Organizers))?;
        let pages = self.store.list_records(RecordSource::Table(Table::Pages))?;
        let forest = Rc::new(Forest::build(&organizers, &pages));

        self.changes.borrow_mut().clear();
        *self.forest.borrow_mut() = Rc::clone(&forest);
        self.rebuilds.set(self.rebuilds.get() + 1);
        info!(
            "event=forest_rebuild module=sync status=ok organizers={} pages={} roots={}",
            organizers.len(),
            pages.len(),
            forest.roots().len()
        );
        Ok(forest)
    }

    /// Whether a change notification is waiting for its rebuild.
    pub fn rebuild_pending(&self) -> bool {
        !self.changes.borrow().is_empty()
    }

    /// Schedules a rebuild as if the store had reported a change at `now`.
    pub fn mark_stale(&self, now: Instant) {
        self.changes.borrow_mut().touch(Table::Organizers, now);
    }

    /// Rebuilds if the notification quiet window has elapsed at `now`.
    ///
    /// Returns whether a rebuild happened.
    pub fn poll(&self, now: Instant) -> Result<bool, SyncError> {
        let ready = self.changes.borrow_mut().take_ready(now);
        if ready.is_empty() {
            return Ok(false);
        }
        self.hydrate()?;
        Ok(true)
    }

    /// Plans a move against the current forest.
    pub fn plan(
        &self,
        moved: &RecordId,
        target_parent: Option<&RecordId>,
        target_index: usize,
    ) -> Result<MovePlan, MoveError> {
        plan_move(&self.forest(), moved, target_parent, target_index)
    }

    /// Issues one update per plan entry, all at once, and waits for every
    /// acknowledgement.
    pub async fn apply_plan(&self, plan: &MovePlan) -> Result<(), SyncError> {
        if plan.is_empty() {
            return Ok(());
        }

        let writes = plan.entries.iter().map(|entry| {
            self.store
                .update_record(entry.kind.table(), &entry.node_id, plan_entry_fields(entry))
        });
        let results = join_all(writes).await;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (entry, result) in plan.entries.iter().zip(results) {
            match result {
                Ok(()) => succeeded.push(entry.clone()),
                Err(error) => failed.push(FailedWrite {
                    entry: entry.clone(),
                    error,
                }),
            }
        }

        if failed.is_empty() {
            info!(
                "event=plan_apply module=sync status=ok moved={} updates={}",
                plan.moved,
                succeeded.len()
            );
            return Ok(());
        }

        warn!(
            "event=plan_apply module=sync status=partial moved={} succeeded={} failed={}",
            plan.moved,
            succeeded.len(),
            failed.len()
        );
        self.mark_stale(Instant::now());
        Err(SyncError::PartialWrite(PartialWriteError { succeeded, failed }))
    }

    /// Queues a debounced field edit for one record.
    pub fn queue_edit(&self, table: Table, id: RecordId, fields: Fields, now: Instant) {
        self.edits.borrow_mut().queue(table, id, fields, now);
    }

    pub fn discard_edits(&self, id: &RecordId) -> bool {
        self.edits.borrow_mut().discard(id)
    }

    pub fn has_queued_edits(&self) -> bool {
        !self.edits.borrow().is_empty()
    }

    /// Writes edits whose quiet window elapsed at `now`.
    pub async fn flush_due_edits(&self, now: Instant) -> EditFlush {
        let due = self.edits.borrow_mut().take_due(now);
        self.write_edits(due).await
    }

    /// Writes every queued edit immediately.
    pub async fn flush_all_edits(&self) -> EditFlush {
        let all = self.edits.borrow_mut().take_all();
        self.write_edits(all).await
    }

    async fn write_edits(&self, pending: Vec<PendingWrite>) -> EditFlush {
        let mut flush = EditFlush::default();
        if pending.is_empty() {
            return flush;
        }

        let writes = pending.iter().map(|write| {
            self.store
                .update_record(write.table, &write.id, write.fields.clone())
        });
        let results = join_all(writes).await;
        for (write, result) in pending.iter().zip(results) {
            match result {
                Ok(()) => flush.written.push(write.id.clone()),
                Err(err) => {
                    warn!(
                        "event=edit_flush module=sync status=error record_id={} error={}",
                        write.id, err
                    );
                    flush.failed.push((write.id.clone(), err));
                }
            }
        }
        flush
    }
}

impl<S: RecordStore + ?Sized> Drop for TreeSync<'_, S> {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.store.unsubscribe(subscription);
        }
    }
}

/// Record fields written for one plan entry.
///
/// Organizers keep `Is Top-level` in step with their parent link.
pub fn plan_entry_fields(entry: &PlanEntry) -> Fields {
    let mut fields = Fields::new();
    fields.insert(FIELD_ORDER.to_string(), FieldValue::Integer(entry.order));
    if let Some(change) = &entry.parent {
        let link = FieldValue::single_link(change.parent.as_ref());
        match entry.kind {
            NodeKind::Page => {
                fields.insert(FIELD_ORGANIZER.to_string(), link);
            }
            NodeKind::Organizer => {
                fields.insert(FIELD_PARENT_ORGANIZER.to_string(), link);
                fields.insert(
                    FIELD_IS_TOP_LEVEL.to_string(),
                    FieldValue::Bool(change.parent.is_none()),
                );
            }
        }
    }
    fields
}
