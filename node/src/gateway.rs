// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ingest Gateway (hot path)
//!
//! Validates that the body is a JSON object and hands it off to a detached
//! task that appends to the durable log and then publishes a notification.
//! The caller never waits on either. When the log refuses the append the
//! event is dropped with a warning; the gateway does not retry.

use std::sync::Arc;

use conduit_log::{EntryMeta, LogError};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::clock::now_ms;
use crate::errors::PipelineError;
use crate::fanout::{Notification, NotificationChannel};
use crate::faults::FaultInjector;
use crate::log::DurableLog;
use crate::sample::timestamp_ms;

#[derive(Clone)]
pub struct IngestGateway {
    log: Arc<dyn DurableLog>,
    channel: NotificationChannel,
    faults: Arc<FaultInjector>,
}

impl IngestGateway {
    pub fn new(log: Arc<dyn DurableLog>, channel: NotificationChannel, faults: Arc<FaultInjector>) -> Self {
        Self { log, channel, faults }
    }

    /// Accept one event.
    ///
    /// The returned handle resolves to the published notification, or `None`
    /// if the event was dropped. Dropping the handle detaches the task.
    pub fn ingest(&self, body: Vec<u8>) -> Result<JoinHandle<Option<Notification>>, PipelineError> {
        let document: Value = serde_json::from_slice(&body)
            .map_err(|e| PipelineError::InvalidPayload(format!("invalid JSON: {}", e)))?;
        let obj = document
            .as_object()
            .ok_or_else(|| PipelineError::InvalidPayload("invalid payload".into()))?;

        let received_at_ms = now_ms();
        let meta = EntryMeta {
            produced_at_ms: timestamp_ms(obj).unwrap_or(received_at_ms),
            received_at_ms,
        };

        let log = Arc::clone(&self.log);
        let channel = self.channel.clone();
        let fail_append = self.faults.log_appends_fail();

        Ok(tokio::spawn(async move {
            let appended = if fail_append {
                Err(LogError::Unavailable("append disabled by fault injection".into()))
            } else {
                log.append(body, meta).await
            };

            match appended {
                Ok(entry_id) => {
                    metrics::increment_counter!("conduit_events_ingested_total");
                    let notification = Notification {
                        entry_id,
                        produced_at_ms: meta.produced_at_ms,
                        received_at_ms: meta.received_at_ms,
                    };
                    channel.publish(&notification);
                    tracing::debug!("Ingested entry {}", entry_id);
                    Some(notification)
                }
                Err(e) => {
                    metrics::increment_counter!("conduit_events_dropped_total");
                    tracing::warn!("Log unavailable, event received at {} dropped: {}", received_at_ms, e);
                    None
                }
            }
        }))
    }
}
