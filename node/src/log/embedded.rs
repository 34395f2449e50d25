// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-process durable log backed by a [`conduit_log::EventLog`] file.
//!
//! The event log itself is synchronous; this wrapper serializes access
//! behind an async mutex (which also serializes id assignment) and turns
//! `read_new` into a bounded blocking read using a [`Notify`] that every
//! append signals.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use conduit_log::{Delivery, EntryId, EntryMeta, EventLog, LogEntry, LogError};
use tokio::sync::{Mutex, Notify};

use super::{DurableLog, LogFuture, LogResult};
use crate::clock::now_ms;

pub struct EmbeddedLog {
    name: String,
    inner: Mutex<EventLog>,
    appended: Notify,
    closed: AtomicBool,
}

impl EmbeddedLog {
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::from_log(name, EventLog::in_memory())
    }

    /// Open a file-backed log, replaying whatever is already on disk.
    pub fn open(name: impl Into<String>, path: &Path, sync: bool) -> LogResult<Self> {
        let name = name.into();
        let start = std::time::Instant::now();
        let log = EventLog::open(path, sync)?;

        let stats = log.replay_stats();
        if stats.torn_bytes > 0 {
            tracing::warn!(
                "Log '{}': dropped {} bytes of torn tail at {:?}",
                name,
                stats.torn_bytes,
                path
            );
        }
        tracing::info!(
            "Log '{}' opened at {:?}: {} records, {} entries",
            name,
            path,
            stats.records,
            stats.entries
        );
        metrics::histogram!("conduit_log_replay_duration_seconds", start.elapsed().as_secs_f64());

        Ok(Self::from_log(name, log))
    }

    fn from_log(name: impl Into<String>, log: EventLog) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(log),
            appended: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self) -> LogResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LogError::Unavailable(format!("log '{}' is closed", self.name)));
        }
        Ok(())
    }
}

impl DurableLog for EmbeddedLog {
    fn append(&self, payload: Vec<u8>, meta: EntryMeta) -> LogFuture<'_, EntryId> {
        Box::pin(async move {
            self.ensure_open()?;
            let id = self.inner.lock().await.append(payload, meta)?;
            self.appended.notify_waiters();
            Ok(id)
        })
    }

    fn create_group<'a>(&'a self, group: &'a str) -> LogFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            if self.inner.lock().await.create_group(group, now_ms())? {
                tracing::info!("Log '{}': consumer group '{}' created", self.name, group);
            } else {
                tracing::debug!("Log '{}': consumer group '{}' already exists", self.name, group);
            }
            Ok(())
        })
    }

    fn read_pending<'a>(&'a self, group: &'a str, consumer: &'a str, limit: usize) -> LogFuture<'a, Vec<Delivery>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.inner.lock().await.read_pending(group, consumer, limit, now_ms())
        })
    }

    fn read_new<'a>(
        &'a self,
        group: &'a str,
        consumer: &'a str,
        limit: usize,
        block: Duration,
    ) -> LogFuture<'a, Vec<Delivery>> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + block;
            loop {
                self.ensure_open()?;

                // Register interest before looking so an append between the
                // read and the wait is not missed.
                let notified = self.appended.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let batch = self.inner.lock().await.read_new(group, consumer, limit, now_ms())?;
                if !batch.is_empty() {
                    return Ok(batch);
                }

                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(Vec::new());
                }
            }
        })
    }

    fn claim_idle<'a>(
        &'a self,
        group: &'a str,
        consumer: &'a str,
        min_idle: Duration,
        limit: usize,
    ) -> LogFuture<'a, Vec<Delivery>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.inner
                .lock()
                .await
                .claim_idle(group, consumer, min_idle.as_millis() as u64, limit, now_ms())
        })
    }

    fn ack<'a>(&'a self, group: &'a str, id: EntryId) -> LogFuture<'a, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            self.inner.lock().await.ack(group, id)?;
            Ok(())
        })
    }

    fn pending_info<'a>(&'a self, group: &'a str, id: EntryId) -> LogFuture<'a, u32> {
        Box::pin(async move {
            self.ensure_open()?;
            self.inner.lock().await.pending_info(group, id)
        })
    }

    fn length(&self) -> LogFuture<'_, u64> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(self.inner.lock().await.len() as u64)
        })
    }

    fn pending_count<'a>(&'a self, group: &'a str) -> LogFuture<'a, u64> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(self.inner.lock().await.pending_count(group)? as u64)
        })
    }

    fn range(&self, start: EntryId, limit: usize) -> LogFuture<'_, Vec<LogEntry>> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(self.inner.lock().await.range(start, limit))
        })
    }

    fn close(&self) -> LogFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            self.appended.notify_waiters();
            self.inner.lock().await.sync()?;
            tracing::info!("Log '{}' closed", self.name);
            Ok(())
        })
    }
}
