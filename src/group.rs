// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Consumer Group State
//!
//! A group is a cursor over never-delivered entries plus a pending set of
//! entries that were delivered but not yet acknowledged.
//!
//! # Invariants
//! - An entry enters the pending set only through a "new" delivery.
//! - Inside a group, a pending entry is owned by exactly one consumer.
//! - Delivery counts never decrease and grow by one per redelivery or claim.
//! - Only an ack removes an entry from the pending set.
//!
//! Every transition here is driven by a [`LogRecord`](crate::record::LogRecord)
//! so replaying the log rebuilds the same state.

use std::collections::BTreeMap;

use crate::entry::{EntryId, PendingEntry};

#[derive(Debug, Clone, Default)]
pub struct ConsumerGroup {
    /// Last id handed out through a "new" read.
    last_delivered: Option<EntryId>,
    pending: BTreeMap<EntryId, PendingEntry>,
}

impl ConsumerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// First id a "new" read would hand out.
    pub fn next_new(&self) -> EntryId {
        self.last_delivered.map(EntryId::next).unwrap_or(EntryId::FIRST)
    }

    pub fn last_delivered(&self) -> Option<EntryId> {
        self.last_delivered
    }

    /// Record a first delivery of `ids` to `consumer`.
    pub fn deliver_new(&mut self, consumer: &str, ids: &[EntryId], now_ms: u64) {
        for &id in ids {
            self.pending.insert(
                id,
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivery_count: 1,
                    last_delivered_ms: now_ms,
                },
            );
            if self.last_delivered.map_or(true, |last| id > last) {
                self.last_delivered = Some(id);
            }
        }
    }

    /// Record a redelivery of pending entries to their current owner.
    ///
    /// Ids that are no longer pending are skipped.
    pub fn redeliver(&mut self, ids: &[EntryId], now_ms: u64) {
        for id in ids {
            if let Some(p) = self.pending.get_mut(id) {
                p.delivery_count = p.delivery_count.saturating_add(1);
                p.last_delivered_ms = now_ms;
            }
        }
    }

    /// Transfer ownership of pending entries to `consumer`; counts as a delivery.
    pub fn claim(&mut self, consumer: &str, ids: &[EntryId], now_ms: u64) {
        for id in ids {
            if let Some(p) = self.pending.get_mut(id) {
                p.consumer = consumer.to_string();
                p.delivery_count = p.delivery_count.saturating_add(1);
                p.last_delivered_ms = now_ms;
            }
        }
    }

    /// Remove an entry from the pending set. Returns whether it was pending.
    pub fn ack(&mut self, id: EntryId) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn pending(&self, id: EntryId) -> Option<&PendingEntry> {
        self.pending.get(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending ids owned by `consumer`, oldest first.
    pub fn pending_for(&self, consumer: &str, limit: usize) -> Vec<EntryId> {
        self.pending
            .iter()
            .filter(|(_, p)| p.consumer == consumer)
            .take(limit)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Pending ids owned by other consumers that have been idle for at least
    /// `min_idle_ms`, oldest first.
    pub fn idle_for_others(&self, consumer: &str, min_idle_ms: u64, now_ms: u64, limit: usize) -> Vec<EntryId> {
        self.pending
            .iter()
            .filter(|(_, p)| p.consumer != consumer && p.idle_ms(now_ms) >= min_idle_ms)
            .take(limit)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn iter_pending(&self) -> impl Iterator<Item = (&EntryId, &PendingEntry)> {
        self.pending.iter()
    }
}
