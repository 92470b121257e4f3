//! Coalescing timers for rebuilds and pending writes.
//!
//! # Responsibility
//! - Track "last touched" instants per key and report keys whose quiet
//!   window has elapsed.
//! - Queue field edits per record, merging repeated edits to one write.
//!
//! # Invariants
//! - Touching a key again restarts its window.
//! - Time is passed in explicitly; nothing here reads the clock.

use crate::model::record::{Fields, RecordId, Table};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Per-key debounce timers.
#[derive(Debug, Clone)]
pub struct Debouncer<K> {
    window: Duration,
    pending: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Marks `key` as touched at `now`, restarting its window.
    pub fn touch(&mut self, key: K, now: Instant) {
        self.pending.insert(key, now);
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn is_ready(&self, key: &K, now: Instant) -> bool {
        self.pending
            .get(key)
            .is_some_and(|touched| now.saturating_duration_since(*touched) >= self.window)
    }

    /// Removes and returns keys whose window elapsed, oldest first.
    pub fn take_ready(&mut self, now: Instant) -> Vec<K> {
        let mut ready: Vec<(K, Instant)> = self
            .pending
            .iter()
            .filter(|(_, touched)| now.saturating_duration_since(**touched) >= self.window)
            .map(|(key, touched)| (key.clone(), *touched))
            .collect();
        ready.sort_by_key(|(_, touched)| *touched);
        for (key, _) in &ready {
            self.pending.remove(key);
        }
        ready.into_iter().map(|(key, _)| key).collect()
    }

    /// Removes and returns every pending key regardless of its window.
    pub fn take_all(&mut self) -> Vec<K> {
        let mut all: Vec<(K, Instant)> = self.pending.drain().collect();
        all.sort_by_key(|(_, touched)| *touched);
        all.into_iter().map(|(key, _)| key).collect()
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Coalesced field edits for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub table: Table,
    pub id: RecordId,
    pub fields: Fields,
}

/// Pending-write queue keyed by record id.
#[derive(Debug, Clone)]
pub struct WriteQueue {
    timers: Debouncer<RecordId>,
    writes: HashMap<RecordId, PendingWrite>,
}

impl WriteQueue {
    pub fn new(window: Duration) -> Self {
        Self {
            timers: Debouncer::new(window),
            writes: HashMap::new(),
        }
    }

    /// Queues `fields` for `id`; later values win per field.
    pub fn queue(&mut self, table: Table, id: RecordId, fields: Fields, now: Instant) {
        let pending = self
            .writes
            .entry(id.clone())
            .or_insert_with(|| PendingWrite {
                table,
                id: id.clone(),
                fields: Fields::new(),
            });
        pending.fields.extend(fields);
        self.timers.touch(id, now);
    }

    pub fn take_due(&mut self, now: Instant) -> Vec<PendingWrite> {
        let due = self.timers.take_ready(now);
        due.into_iter()
            .filter_map(|id| self.writes.remove(&id))
            .collect()
    }

    pub fn take_all(&mut self) -> Vec<PendingWrite> {
        let all = self.timers.take_all();
        all.into_iter()
            .filter_map(|id| self.writes.remove(&id))
            .collect()
    }

    /// Drops queued edits for a record, e.g. after it was deleted.
    pub fn discard(&mut self, id: &RecordId) -> bool {
        self.timers.cancel(id);
        self.writes.remove(id).is_some()
    }

    pub fn is_queued(&self, id: &RecordId) -> bool {
        self.writes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}
