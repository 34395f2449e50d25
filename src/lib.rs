// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! conduit-log: an append-only, file-backed event log with consumer groups.
//!
//! This crate is synchronous and runtime-agnostic. The async service in
//! `conduit-node` wraps [`log::EventLog`] and adds blocking reads on top.

pub mod entry;
pub mod error;
pub mod group;
pub mod record;
pub mod codec;
pub mod writer;
pub mod reader;
pub mod log;

pub use entry::{DeadLetterEntry, Delivery, EntryId, EntryMeta, LogEntry, PendingEntry};
pub use error::{LogError, Result};
pub use log::{EventLog, ReplayStats};

#[cfg(test)]
pub mod tests;
