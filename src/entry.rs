// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Log entry types shared by the log, its consumers and the tooling.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Log-assigned entry identifier.
///
/// Ids start at 1 and grow by one per append, so they are globally ordered
/// within a single log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl EntryId {
    pub const FIRST: EntryId = EntryId(1);

    pub fn next(self) -> EntryId {
        EntryId(self.0 + 1)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamps supplied alongside a payload at append time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Producer capture time.
    pub produced_at_ms: u64,
    /// Arrival time at the gateway.
    pub received_at_ms: u64,
}

/// An immutable record of the log.
///
/// The payload is opaque to the log: it is stored and handed back byte for
/// byte, and only consumers give it structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: EntryId,
    pub payload: Vec<u8>,
    pub produced_at_ms: u64,
    pub received_at_ms: u64,
}

impl LogEntry {
    /// Payload as text, with invalid UTF-8 replaced.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Delivery bookkeeping for one unacknowledged entry of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub consumer: String,
    pub delivery_count: u32,
    pub last_delivered_ms: u64,
}

impl PendingEntry {
    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_delivered_ms)
    }
}

/// An entry handed to a consumer together with its delivery count
/// after this delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub entry: LogEntry,
    pub delivery_count: u32,
}

/// Record appended to the dead-letter log for an entry that exhausted its
/// retry budget. Stored as a JSON document in the payload of a dead-letter
/// log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub original_entry_id: EntryId,
    pub payload: String,
    pub error_description: String,
    pub failed_at_ms: u64,
}

impl DeadLetterEntry {
    pub fn new(entry: &LogEntry, error_description: impl Into<String>, failed_at_ms: u64) -> Self {
        Self {
            original_entry_id: entry.id,
            payload: entry.payload_lossy(),
            error_description: error_description.into(),
            failed_at_ms,
        }
    }

    /// Decode a dead-letter record back out of a dead-letter log entry.
    pub fn from_log_entry(entry: &LogEntry) -> Option<Self> {
        serde_json::from_slice(&entry.payload).ok()
    }
}
