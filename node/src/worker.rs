// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Cold-Path Worker
//!
//! One consumer identity of the stream's consumer group. Each iteration
//! first drains this consumer's own pending entries, then entries other
//! consumers abandoned, and only when both are empty blocks on new entries.
//!
//! Per entry: decode -> insert-if-absent keyed by entry id -> ack. A failed
//! entry stays pending and comes back through `read_pending` until its
//! delivery count reaches `max_retries`; then it is written to the
//! dead-letter log and acked whether or not that write succeeded.
//!
//! On shutdown the worker stops issuing reads and leaves the rest of the
//! current batch pending for the next worker.

use std::sync::Arc;
use std::time::Duration;

use conduit_log::{DeadLetterEntry, Delivery, EntryId, EntryMeta, LogEntry};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::clock::now_ms;
use crate::config::WorkerConfig;
use crate::errors::PipelineError;
use crate::faults::FaultInjector;
use crate::log::DurableLog;
use crate::sample::MetricSample;
use crate::store::{ColdStore, InsertOutcome, PersistedRecord, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Recovering,
    DrainingNew,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Persisted,
    /// Already in the store from an earlier delivery; acked again.
    Duplicate,
    /// Left pending after failed attempt number `attempt`.
    Retrying { attempt: u32 },
    DeadLettered,
}

pub struct ColdPathWorker {
    log: Arc<dyn DurableLog>,
    dead_letters: Arc<dyn DurableLog>,
    store: Arc<dyn ColdStore>,
    faults: Arc<FaultInjector>,
    group: String,
    consumer: String,
    config: WorkerConfig,
    state: watch::Sender<WorkerState>,
}

impl ColdPathWorker {
    pub fn new(
        log: Arc<dyn DurableLog>,
        dead_letters: Arc<dyn DurableLog>,
        store: Arc<dyn ColdStore>,
        faults: Arc<FaultInjector>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        config: WorkerConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Starting);
        Self {
            log,
            dead_letters,
            store,
            faults,
            group: group.into(),
            consumer: consumer.into(),
            config,
            state,
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    fn set_state(&self, next: WorkerState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::trace!("Worker {}: {:?} -> {:?}", self.consumer, prev, next);
        }
    }

    /// Ensure the consumer group exists. Failure here is fatal.
    pub async fn start(&self) -> Result<(), PipelineError> {
        self.set_state(WorkerState::Starting);
        self.log.create_group(&self.group).await.map_err(|e| {
            PipelineError::Config(format!("cannot create consumer group '{}': {}", self.group, e))
        })?;
        tracing::info!("Worker {} started in group '{}'", self.consumer, self.group);
        Ok(())
    }

    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<Result<(), PipelineError>> {
        let span = tracing::info_span!("worker", consumer = %self.consumer);
        tokio::spawn(async move { self.run(token).await }.instrument(span))
    }

    /// Main loop. Returns only on shutdown or a fatal startup error.
    pub async fn run(&self, token: CancellationToken) -> Result<(), PipelineError> {
        self.start().await?;

        while !token.is_cancelled() {
            if let Err(e) = self.tick(&token).await {
                tracing::error!("Worker {}: error reading log: {}", self.consumer, e);
                self.pause(self.config.error_backoff, &token).await;
            }
        }

        self.set_state(WorkerState::ShuttingDown);
        tracing::info!("Worker {} shutting down gracefully", self.consumer);
        self.set_state(WorkerState::Stopped);
        Ok(())
    }

    /// One loop iteration. Returns how many entries were handled.
    pub async fn tick(&self, token: &CancellationToken) -> Result<usize, PipelineError> {
        let limit = self.config.batch_size;

        self.set_state(WorkerState::Recovering);
        let pending = self.log.read_pending(&self.group, &self.consumer, limit).await?;
        if !pending.is_empty() {
            tracing::info!("Worker {}: recovering {} pending entries", self.consumer, pending.len());
            return self.process_batch(pending, token).await;
        }

        let claimed = self
            .log
            .claim_idle(&self.group, &self.consumer, self.config.claim_min_idle, limit)
            .await?;
        if !claimed.is_empty() {
            tracing::info!("Worker {}: claimed {} idle entries", self.consumer, claimed.len());
            return self.process_batch(claimed, token).await;
        }

        self.set_state(WorkerState::DrainingNew);
        let fresh = tokio::select! {
            _ = token.cancelled() => return Ok(0),
            batch = self.log.read_new(&self.group, &self.consumer, limit, self.config.block_timeout) => batch?,
        };
        self.process_batch(fresh, token).await
    }

    async fn process_batch(&self, batch: Vec<Delivery>, token: &CancellationToken) -> Result<usize, PipelineError> {
        let mut handled = 0;
        for delivery in batch {
            if token.is_cancelled() {
                break;
            }
            self.process(&delivery, token).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Handle one delivered entry. Errors are log failures only; processing
    /// failures are absorbed into the retry/dead-letter path.
    pub async fn process(&self, delivery: &Delivery, token: &CancellationToken) -> Result<EntryOutcome, PipelineError> {
        let entry = &delivery.entry;

        let outcome = match self.persist(entry).await {
            Ok(InsertOutcome::Inserted) => {
                metrics::increment_counter!("conduit_records_persisted_total");
                EntryOutcome::Persisted
            }
            Ok(InsertOutcome::Duplicate) => {
                metrics::increment_counter!("conduit_records_duplicate_total");
                tracing::debug!("Entry {} already stored", entry.id);
                EntryOutcome::Duplicate
            }
            Err(e) => return self.handle_failure(entry, &e, token).await,
        };

        self.log.ack(&self.group, entry.id).await?;
        Ok(outcome)
    }

    async fn persist(&self, entry: &LogEntry) -> Result<InsertOutcome, PipelineError> {
        let sample = MetricSample::decode(&entry.payload)?;

        if self.faults.store_writes_fail() {
            return Err(StoreError::Injected.into());
        }

        let record = PersistedRecord {
            entry_id: entry.id,
            payload: sample.document,
            produced_at_ms: entry.produced_at_ms,
            received_at_ms: entry.received_at_ms,
            ingested_at_ms: now_ms(),
        };
        Ok(self.store.insert_if_absent(record).await?)
    }

    async fn handle_failure(
        &self,
        entry: &LogEntry,
        err: &PipelineError,
        token: &CancellationToken,
    ) -> Result<EntryOutcome, PipelineError> {
        metrics::increment_counter!("conduit_processing_failures_total");
        tracing::error!("Worker {}: failed to process {}: {}", self.consumer, entry.id, err);

        let attempt = self.log.pending_info(&self.group, entry.id).await?;
        if attempt < self.config.max_retries {
            tracing::warn!(
                "Worker {}: will retry {} (attempt {}/{})",
                self.consumer,
                entry.id,
                attempt + 1,
                self.config.max_retries
            );
            self.pause(self.config.retry_backoff, token).await;
            return Ok(EntryOutcome::Retrying { attempt });
        }

        // The ack happens even when the dead-letter write fails.
        let _ = self.dead_letter(entry, &err.to_string()).await;
        self.log.ack(&self.group, entry.id).await?;
        Ok(EntryOutcome::DeadLettered)
    }

    async fn dead_letter(&self, entry: &LogEntry, description: &str) -> Result<EntryId, PipelineError> {
        let failed_at_ms = now_ms();
        let dead = DeadLetterEntry::new(entry, description, failed_at_ms);
        let meta = EntryMeta {
            produced_at_ms: entry.produced_at_ms,
            received_at_ms: failed_at_ms,
        };

        let appended = match serde_json::to_vec(&dead) {
            Ok(bytes) => self.dead_letters.append(bytes, meta).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match appended {
            Ok(id) => {
                metrics::increment_counter!("conduit_dead_letters_total");
                tracing::error!("Worker {}: moved {} to dead-letter log as {}", self.consumer, entry.id, id);
                Ok(id)
            }
            Err(e) => {
                metrics::increment_counter!("conduit_dead_letter_write_failures_total");
                tracing::error!("Worker {}: failed to write {} to dead-letter log: {}", self.consumer, entry.id, e);
                Err(PipelineError::DeadLetterWriteFailure(e))
            }
        }
    }

    async fn pause(&self, duration: Duration, token: &CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faults::FaultSettings;
    use crate::log::EmbeddedLog;
    use crate::store::RecordStore;

    const GROUP: &str = "conduit-workers";

    struct Harness {
        log: Arc<EmbeddedLog>,
        dlq: Arc<EmbeddedLog>,
        store: Arc<RecordStore>,
        faults: Arc<FaultInjector>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                log: Arc::new(EmbeddedLog::in_memory("events")),
                dlq: Arc::new(EmbeddedLog::in_memory("dead-letters")),
                store: Arc::new(RecordStore::in_memory()),
                faults: Arc::new(FaultInjector::new()),
            }
        }

        fn worker(&self, consumer: &str) -> ColdPathWorker {
            let config = WorkerConfig {
                block_timeout: Duration::from_millis(20),
                retry_backoff: Duration::from_millis(1),
                error_backoff: Duration::from_millis(1),
                ..WorkerConfig::default()
            };
            ColdPathWorker::new(
                self.log.clone(),
                self.dlq.clone(),
                self.store.clone(),
                self.faults.clone(),
                GROUP,
                consumer,
                config,
            )
        }

        async fn append(&self, body: &str) -> EntryId {
            self.log.append(body.as_bytes().to_vec(), EntryMeta::default()).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_new_entry_is_persisted_and_acked() {
        let h = Harness::new();
        let worker = h.worker("w1");
        worker.start().await.unwrap();
        let id = h.append(r#"{"metric":"cpu","value":42.5}"#).await;

        let token = CancellationToken::new();
        assert_eq!(worker.tick(&token).await.unwrap(), 1);
        assert_eq!(worker.state(), WorkerState::DrainingNew);

        let row = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(row.payload["metric"], "cpu");
        assert_eq!(h.log.pending_count(GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_three_failures_dead_letter_once() {
        let h = Harness::new();
        let worker = h.worker("w1");
        worker.start().await.unwrap();
        let id = h.append(r#"{"metric":"cpu","value":"high"}"#).await;
        let token = CancellationToken::new();

        let first = h.log.read_new(GROUP, "w1", 10, Duration::ZERO).await.unwrap();
        assert_eq!(
            worker.process(&first[0], &token).await.unwrap(),
            EntryOutcome::Retrying { attempt: 1 }
        );

        let second = h.log.read_pending(GROUP, "w1", 10).await.unwrap();
        assert_eq!(
            worker.process(&second[0], &token).await.unwrap(),
            EntryOutcome::Retrying { attempt: 2 }
        );

        let third = h.log.read_pending(GROUP, "w1", 10).await.unwrap();
        assert_eq!(worker.process(&third[0], &token).await.unwrap(), EntryOutcome::DeadLettered);

        assert_eq!(h.log.pending_count(GROUP).await.unwrap(), 0);
        let dead = h.dlq.range(EntryId::FIRST, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        let dead = DeadLetterEntry::from_log_entry(&dead[0]).unwrap();
        assert_eq!(dead.original_entry_id, id);
        assert!(dead.error_description.contains("numeric"));
        assert_eq!(h.store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unacked_entry_is_recovered_before_new_ones() {
        let h = Harness::new();
        let worker = h.worker("w1");
        worker.start().await.unwrap();
        let first = h.append(r#"{"metric":"cpu"}"#).await;

        // Delivered, then the previous process died before acking
        h.log.read_new(GROUP, "w1", 10, Duration::ZERO).await.unwrap();
        h.append(r#"{"metric":"mem"}"#).await;

        let token = CancellationToken::new();
        assert_eq!(worker.tick(&token).await.unwrap(), 1);
        assert_eq!(worker.state(), WorkerState::Recovering);
        assert!(h.store.get(first).await.unwrap().is_some());
        assert_eq!(h.store.len().await.unwrap(), 1);

        assert_eq!(worker.tick(&token).await.unwrap(), 1);
        assert_eq!(h.store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_redelivered_stored_entry_is_duplicate() {
        let h = Harness::new();
        let worker = h.worker("w1");
        worker.start().await.unwrap();
        h.append(r#"{"metric":"cpu"}"#).await;
        let token = CancellationToken::new();

        let batch = h.log.read_new(GROUP, "w1", 10, Duration::ZERO).await.unwrap();
        assert_eq!(worker.process(&batch[0], &token).await.unwrap(), EntryOutcome::Persisted);
        assert_eq!(worker.process(&batch[0], &token).await.unwrap(), EntryOutcome::Duplicate);
        assert_eq!(h.store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_injected_store_failure_is_retried_then_succeeds() {
        let h = Harness::new();
        let worker = h.worker("w1");
        worker.start().await.unwrap();
        h.append(r#"{"metric":"cpu","value":1}"#).await;
        let token = CancellationToken::new();

        h.faults.apply(FaultSettings {
            fail_store_writes: true,
            fail_log_appends: false,
        });
        worker.tick(&token).await.unwrap();
        assert_eq!(h.log.pending_count(GROUP).await.unwrap(), 1);

        h.faults.apply(FaultSettings::default());
        worker.tick(&token).await.unwrap();
        assert_eq!(h.log.pending_count(GROUP).await.unwrap(), 0);
        assert_eq!(h.store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_dead_letter_log_still_acks() {
        let h = Harness::new();
        let worker = h.worker("w1");
        worker.start().await.unwrap();
        h.append("[]").await;
        h.dlq.close().await.unwrap();
        let token = CancellationToken::new();

        for _ in 0..3 {
            worker.tick(&token).await.unwrap();
        }
        assert_eq!(h.log.pending_count(GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_entries_are_claimed() {
        let h = Harness::new();
        let mut worker = h.worker("w2");
        worker.config.claim_min_idle = Duration::ZERO;
        worker.start().await.unwrap();
        let id = h.append(r#"{"metric":"cpu"}"#).await;

        h.log.read_new(GROUP, "w1-dead", 10, Duration::ZERO).await.unwrap();

        let token = CancellationToken::new();
        assert_eq!(worker.tick(&token).await.unwrap(), 1);
        assert!(h.store.get(id).await.unwrap().is_some());
        assert_eq!(h.log.pending_count(GROUP).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = Harness::new();
        let worker = Arc::new(h.worker("w1"));
        let token = CancellationToken::new();
        let handle = worker.clone().spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }
}
