// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Backlog and worker health, derived from log and store introspection.
//! Every figure degrades to zero when its source cannot be read.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::clock::now_ms;
use crate::log::DurableLog;
use crate::store::ColdStore;

/// Window for `coldStorageWrites`.
const WRITE_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Ok,
    Retrying,
    Error,
}

impl WorkerStatus {
    pub fn from_pending(pending: u64) -> Self {
        if pending < 10 {
            WorkerStatus::Ok
        } else if pending < 100 {
            WorkerStatus::Retrying
        } else {
            WorkerStatus::Error
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStats {
    /// Entries appended per second since the previous sample.
    pub ingestion_rate: u64,
    pub pending_messages: u64,
    pub worker_status: WorkerStatus,
    /// Rows written to the cold store in the last minute.
    pub cold_storage_writes: u64,
}

struct RateSample {
    length: u64,
    at: Instant,
}

pub struct HealthReporter {
    log: Arc<dyn DurableLog>,
    store: Arc<dyn ColdStore>,
    group: String,
    last: Mutex<Option<RateSample>>,
}

impl HealthReporter {
    pub fn new(log: Arc<dyn DurableLog>, store: Arc<dyn ColdStore>, group: impl Into<String>) -> Self {
        Self {
            log,
            store,
            group: group.into(),
            last: Mutex::new(None),
        }
    }

    pub async fn stats(&self) -> HealthStats {
        let ingestion_rate = self.ingestion_rate().await;
        let pending_messages = self.pending_messages().await;

        HealthStats {
            ingestion_rate,
            pending_messages,
            worker_status: WorkerStatus::from_pending(pending_messages),
            cold_storage_writes: self.cold_storage_writes().await,
        }
    }

    /// The first call only records a baseline and reports 0.
    async fn ingestion_rate(&self) -> u64 {
        let length = match self.log.length().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Health: log length unavailable: {}", e);
                return 0;
            }
        };
        let now = Instant::now();

        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let rate = match last.as_ref() {
            Some(prev) => {
                let secs = now.duration_since(prev.at).as_secs_f64();
                if secs > 0.0 {
                    (length.saturating_sub(prev.length) as f64 / secs).round() as u64
                } else {
                    0
                }
            }
            None => 0,
        };
        *last = Some(RateSample { length, at: now });
        rate
    }

    async fn pending_messages(&self) -> u64 {
        match self.log.pending_count(&self.group).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Health: pending count unavailable: {}", e);
                0
            }
        }
    }

    async fn cold_storage_writes(&self) -> u64 {
        let since = now_ms().saturating_sub(WRITE_WINDOW_MS);
        match self.store.count_ingested_since(since).await {
            Ok(n) => n as u64,
            Err(e) => {
                tracing::warn!("Health: store write count unavailable: {}", e);
                0
            }
        }
    }
}
