// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Event Log with Consumer Groups
//!
//! The synchronous heart of the pipeline: an ordered entry list, a set of
//! named consumer groups, and an optional file that every mutation is written
//! to before it is applied in memory.
//!
//! # Protocol
//! ```text
//! append ─────────────▶ entries
//! read_new ───────────▶ pending (count = 1), cursor advances
//! read_pending ───────▶ pending (count += 1), cursor untouched
//! claim_idle ─────────▶ pending owner changes (count += 1)
//! ack ────────────────▶ removed from pending
//! ```
//!
//! All operations take the current time as an argument so replay and tests
//! are deterministic.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::entry::{Delivery, EntryId, EntryMeta, LogEntry, PendingEntry};
use crate::error::{LogError, Result};
use crate::group::ConsumerGroup;
use crate::reader::LogReader;
use crate::record::LogRecord;
use crate::writer::LogWriter;

/// What opening a log file found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub records: u64,
    pub entries: u64,
    /// Bytes of a partial final frame that were discarded.
    pub torn_bytes: u64,
}

pub struct EventLog {
    entries: Vec<LogEntry>,
    groups: FxHashMap<String, ConsumerGroup>,
    writer: Option<LogWriter>,
    replay: ReplayStats,
}

impl EventLog {
    /// A log that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            entries: Vec::new(),
            groups: FxHashMap::default(),
            writer: None,
            replay: ReplayStats::default(),
        }
    }

    /// Open (or create) a file-backed log, replaying existing records.
    ///
    /// A torn tail is dropped from the file; a corrupt frame before the tail
    /// fails the open.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> Result<Self> {
        let path = path.as_ref();
        let (mut log, valid_len) = if has_log(path) {
            let (log, valid_len) = Self::replay(LogReader::open(path)?)?;
            (log, Some(valid_len))
        } else {
            (Self::in_memory(), None)
        };

        log.writer = Some(LogWriter::open(path, sync, valid_len)?);
        Ok(log)
    }

    /// Read a log file without taking ownership of it. Nothing is written,
    /// not even torn-tail truncation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let (log, _) = Self::replay(LogReader::open(path)?)?;
        Ok(log)
    }

    fn replay(mut reader: LogReader) -> Result<(Self, u64)> {
        let mut log = Self::in_memory();
        let mut records = 0u64;

        for record in reader.by_ref() {
            log.apply(record?);
            records += 1;
        }

        log.replay = ReplayStats {
            records,
            entries: log.entries.len() as u64,
            torn_bytes: reader.torn_bytes(),
        };
        Ok((log, reader.valid_len()))
    }

    fn apply(&mut self, record: LogRecord) {
        match record {
            LogRecord::Appended(entry) => self.entries.push(entry),
            LogRecord::GroupCreated { group, .. } => {
                self.groups.entry(group).or_default();
            }
            LogRecord::Delivered {
                group,
                consumer,
                ids,
                at_ms,
            } => {
                if let Some(g) = self.groups.get_mut(&group) {
                    g.deliver_new(&consumer, &ids, at_ms);
                }
            }
            LogRecord::Redelivered { group, ids, at_ms } => {
                if let Some(g) = self.groups.get_mut(&group) {
                    g.redeliver(&ids, at_ms);
                }
            }
            LogRecord::Claimed {
                group,
                consumer,
                ids,
                at_ms,
            } => {
                if let Some(g) = self.groups.get_mut(&group) {
                    g.claim(&consumer, &ids, at_ms);
                }
            }
            LogRecord::Acked { group, id } => {
                if let Some(g) = self.groups.get_mut(&group) {
                    g.ack(id);
                }
            }
        }
    }

    /// Persist first, then apply. A failed write leaves memory untouched.
    fn commit(&mut self, record: LogRecord) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.append(&record)?;
        }
        self.apply(record);
        Ok(())
    }

    fn group(&self, name: &str) -> Result<&ConsumerGroup> {
        self.groups
            .get(name)
            .ok_or_else(|| LogError::UnknownGroup(name.to_string()))
    }

    fn deliveries(&self, group: &str, ids: &[EntryId]) -> Result<Vec<Delivery>> {
        let g = self.group(group)?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                let entry = self.get(*id)?.clone();
                let delivery_count = g.pending(*id).map_or(1, |p| p.delivery_count);
                Some(Delivery {
                    entry,
                    delivery_count,
                })
            })
            .collect())
    }

    pub fn append(&mut self, payload: Vec<u8>, meta: EntryMeta) -> Result<EntryId> {
        let id = self.last_id().map_or(EntryId::FIRST, EntryId::next);
        self.commit(LogRecord::Appended(LogEntry {
            id,
            payload,
            produced_at_ms: meta.produced_at_ms,
            received_at_ms: meta.received_at_ms,
        }))?;
        Ok(id)
    }

    /// Create a group reading from the start of the log.
    /// Returns `false` when it already existed.
    pub fn create_group(&mut self, group: &str, now_ms: u64) -> Result<bool> {
        if self.groups.contains_key(group) {
            return Ok(false);
        }
        self.commit(LogRecord::GroupCreated {
            group: group.to_string(),
            at_ms: now_ms,
        })?;
        Ok(true)
    }

    /// Hand out up to `limit` never-delivered entries to `consumer`.
    pub fn read_new(&mut self, group: &str, consumer: &str, limit: usize, now_ms: u64) -> Result<Vec<Delivery>> {
        let start = self.group(group)?.next_new();
        let end = self.last_id().map_or(0, |id| id.0);
        let ids: Vec<EntryId> = (start.0..=end).take(limit).map(EntryId).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.commit(LogRecord::Delivered {
            group: group.to_string(),
            consumer: consumer.to_string(),
            ids: ids.clone(),
            at_ms: now_ms,
        })?;
        self.deliveries(group, &ids)
    }

    /// Redeliver up to `limit` of `consumer`'s own unacknowledged entries.
    pub fn read_pending(&mut self, group: &str, consumer: &str, limit: usize, now_ms: u64) -> Result<Vec<Delivery>> {
        let ids = self.group(group)?.pending_for(consumer, limit);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.commit(LogRecord::Redelivered {
            group: group.to_string(),
            ids: ids.clone(),
            at_ms: now_ms,
        })?;
        self.deliveries(group, &ids)
    }

    /// Take over entries other consumers left idle for at least `min_idle_ms`.
    pub fn claim_idle(
        &mut self,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        limit: usize,
        now_ms: u64,
    ) -> Result<Vec<Delivery>> {
        let ids = self.group(group)?.idle_for_others(consumer, min_idle_ms, now_ms, limit);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.commit(LogRecord::Claimed {
            group: group.to_string(),
            consumer: consumer.to_string(),
            ids: ids.clone(),
            at_ms: now_ms,
        })?;
        self.deliveries(group, &ids)
    }

    /// Acknowledge an entry. Acking an id that is not pending is a no-op and
    /// returns `false`.
    pub fn ack(&mut self, group: &str, id: EntryId) -> Result<bool> {
        if self.group(group)?.pending(id).is_none() {
            return Ok(false);
        }
        self.commit(LogRecord::Acked {
            group: group.to_string(),
            id,
        })?;
        Ok(true)
    }

    /// Delivery count of a pending entry; entries that are not pending
    /// report 1.
    pub fn pending_info(&self, group: &str, id: EntryId) -> Result<u32> {
        Ok(self.group(group)?.pending(id).map_or(1, |p| p.delivery_count))
    }

    pub fn pending_entry(&self, group: &str, id: EntryId) -> Result<Option<PendingEntry>> {
        Ok(self.group(group)?.pending(id).cloned())
    }

    pub fn pending_count(&self, group: &str) -> Result<usize> {
        Ok(self.group(group)?.pending_count())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_id(&self) -> Option<EntryId> {
        self.entries.last().map(|e| e.id)
    }

    pub fn get(&self, id: EntryId) -> Option<&LogEntry> {
        let idx = id.0.checked_sub(1)? as usize;
        self.entries.get(idx)
    }

    /// Entries with id >= `start`, in order.
    pub fn range(&self, start: EntryId, limit: usize) -> Vec<LogEntry> {
        let from = start.0.saturating_sub(1) as usize;
        self.entries.iter().skip(from).take(limit).cloned().collect()
    }

    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn group_state(&self, name: &str) -> Option<&ConsumerGroup> {
        self.groups.get(name)
    }

    pub fn replay_stats(&self) -> ReplayStats {
        self.replay
    }

    pub fn sync(&mut self) -> Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.sync(),
            None => Ok(()),
        }
    }
}

/// Whether a path holds at least a log header.
pub fn has_log(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.len() >= crate::codec::HEADER_SIZE as u64)
        .unwrap_or(false)
}
