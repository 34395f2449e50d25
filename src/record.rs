// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Log records: the unit of durability.
//!
//! Appends and every consumer-group transition are written as records, so
//! the file alone is enough to rebuild entries, cursors and pending sets.

use serde::{Deserialize, Serialize};

use crate::entry::{EntryId, LogEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    Appended(LogEntry),
    GroupCreated {
        group: String,
        at_ms: u64,
    },
    /// First delivery through the "new" cursor.
    Delivered {
        group: String,
        consumer: String,
        ids: Vec<EntryId>,
        at_ms: u64,
    },
    /// Redelivery of pending entries to their owner.
    Redelivered {
        group: String,
        ids: Vec<EntryId>,
        at_ms: u64,
    },
    /// Ownership transfer of idle pending entries.
    Claimed {
        group: String,
        consumer: String,
        ids: Vec<EntryId>,
        at_ms: u64,
    },
    Acked {
        group: String,
        id: EntryId,
    },
}
