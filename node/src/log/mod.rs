// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Durable Log Interface
//!
//! The async face of the log the rest of the node talks to. The gateway
//! appends, the worker consumes through a consumer group, the health reporter
//! only introspects.
//!
//! # Delivery contract
//! - `read_new` assigns each entry to exactly one consumer of a group and
//!   puts it in the pending set with delivery count 1
//! - `read_pending` never blocks and never advances the "new" cursor
//! - `ack` is idempotent
//! - `pending_info` reports 1 for entries that are not pending

pub mod embedded;

pub use embedded::EmbeddedLog;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use conduit_log::{Delivery, EntryId, EntryMeta, LogEntry, LogError};

pub type LogResult<T> = Result<T, LogError>;

/// Boxed future returned by [`DurableLog`] operations.
pub type LogFuture<'a, T> = Pin<Box<dyn Future<Output = LogResult<T>> + Send + 'a>>;

pub trait DurableLog: Send + Sync {
    /// Append an opaque payload. Either the entry is durable or the call fails.
    fn append(&self, payload: Vec<u8>, meta: EntryMeta) -> LogFuture<'_, EntryId>;

    /// Create a consumer group. An existing group is not an error.
    fn create_group<'a>(&'a self, group: &'a str) -> LogFuture<'a, ()>;

    /// Redeliver this consumer's own unacknowledged entries. Non-blocking.
    fn read_pending<'a>(&'a self, group: &'a str, consumer: &'a str, limit: usize) -> LogFuture<'a, Vec<Delivery>>;

    /// Deliver never-delivered entries, waiting up to `block` when there are none.
    fn read_new<'a>(
        &'a self,
        group: &'a str,
        consumer: &'a str,
        limit: usize,
        block: Duration,
    ) -> LogFuture<'a, Vec<Delivery>>;

    /// Take over entries other consumers left pending for at least `min_idle`.
    fn claim_idle<'a>(
        &'a self,
        group: &'a str,
        consumer: &'a str,
        min_idle: Duration,
        limit: usize,
    ) -> LogFuture<'a, Vec<Delivery>>;

    fn ack<'a>(&'a self, group: &'a str, id: EntryId) -> LogFuture<'a, ()>;

    fn pending_info<'a>(&'a self, group: &'a str, id: EntryId) -> LogFuture<'a, u32>;

    /// Number of entries in the log.
    fn length(&self) -> LogFuture<'_, u64>;

    fn pending_count<'a>(&'a self, group: &'a str) -> LogFuture<'a, u64>;

    /// Entries with id >= `start`, without touching any group.
    fn range(&self, start: EntryId, limit: usize) -> LogFuture<'_, Vec<LogEntry>>;

    /// Flush and stop serving; later calls fail with `Unavailable`.
    fn close(&self) -> LogFuture<'_, ()>;
}
