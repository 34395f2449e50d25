// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Wiring of the whole node: logs, store, gateway, workers, fan-out and the
//! health reporter, plus ordered shutdown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{NodeConfig, DEAD_LETTER_FILE, EVENT_LOG_FILE, RECORD_STORE_FILE};
use crate::errors::PipelineError;
use crate::fanout::{Broadcaster, NotificationChannel};
use crate::faults::FaultInjector;
use crate::gateway::IngestGateway;
use crate::health::HealthReporter;
use crate::log::{DurableLog, EmbeddedLog};
use crate::server::AppState;
use crate::store::{ColdStore, RecordStore};
use crate::worker::ColdPathWorker;

pub struct Pipeline {
    pub config: NodeConfig,
    pub log: Arc<dyn DurableLog>,
    pub dead_letters: Arc<dyn DurableLog>,
    pub store: Arc<dyn ColdStore>,
    pub faults: Arc<FaultInjector>,
    pub channel: NotificationChannel,
    pub gateway: IngestGateway,
    pub broadcaster: Arc<Broadcaster>,
    pub health: Arc<HealthReporter>,
    token: CancellationToken,
    workers: Vec<JoinHandle<Result<(), PipelineError>>>,
    fanout: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Open storage and create the consumer group. Any failure is fatal.
    pub async fn open(config: NodeConfig) -> Result<Self, PipelineError> {
        let (log, dead_letters, store) = open_storage(&config)?;

        log.create_group(&config.group)
            .await
            .map_err(|e| PipelineError::Config(format!("cannot create consumer group '{}': {}", config.group, e)))?;

        let faults = Arc::new(FaultInjector::new());
        let channel = NotificationChannel::new(config.fanout.channel_capacity);
        let gateway = IngestGateway::new(log.clone(), channel.clone(), faults.clone());
        let broadcaster = Arc::new(Broadcaster::new(&config.fanout));
        let health = Arc::new(HealthReporter::new(log.clone(), store.clone(), config.group.clone()));

        Ok(Self {
            config,
            log,
            dead_letters,
            store,
            faults,
            channel,
            gateway,
            broadcaster,
            health,
            token: CancellationToken::new(),
            workers: Vec::new(),
            fanout: None,
        })
    }

    /// Spawn the broadcaster loop and one task per worker identity.
    pub fn start(&mut self) {
        if self.fanout.is_none() {
            let rx = self.channel.subscribe();
            self.fanout = Some(self.broadcaster.clone().spawn(rx, self.token.child_token()));
        }

        for index in self.workers.len()..self.config.workers {
            let worker = Arc::new(ColdPathWorker::new(
                self.log.clone(),
                self.dead_letters.clone(),
                self.store.clone(),
                self.faults.clone(),
                self.config.group.clone(),
                self.config.consumer_name(index),
                self.config.worker.clone(),
            ));
            self.workers.push(worker.spawn(self.token.child_token()));
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            gateway: self.gateway.clone(),
            broadcaster: self.broadcaster.clone(),
            health: self.health.clone(),
            faults: self.faults.clone(),
            keep_alive: self.config.fanout.keep_alive,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop reads, give in-flight entries the grace interval, then release
    /// the logs and the store. Unfinished entries stay pending.
    pub async fn shutdown(mut self) -> Result<(), PipelineError> {
        self.token.cancel();
        self.broadcaster.close_all();

        let grace = self.config.worker.shutdown_grace;
        let workers = std::mem::take(&mut self.workers);
        match tokio::time::timeout(grace, futures::future::join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::error!("Worker exited with error: {}", e),
                        Err(e) => tracing::error!("Worker task failed: {}", e),
                    }
                }
            }
            Err(_) => {
                tracing::warn!("Workers still busy after {:?}; their entries stay pending", grace);
            }
        }

        if let Some(fanout) = self.fanout.take() {
            if let Err(e) = fanout.await {
                tracing::error!("Fan-out task failed: {}", e);
            }
        }

        self.store.flush().await?;
        self.log.close().await?;
        self.dead_letters.close().await?;
        tracing::info!("Pipeline stopped");
        Ok(())
    }
}

type Storage = (Arc<dyn DurableLog>, Arc<dyn DurableLog>, Arc<dyn ColdStore>);

fn open_storage(config: &NodeConfig) -> Result<Storage, PipelineError> {
    let Some(dir) = &config.data_dir else {
        tracing::warn!("No data directory configured; running in memory only");
        let log: Arc<dyn DurableLog> = Arc::new(EmbeddedLog::in_memory("events"));
        let dlq: Arc<dyn DurableLog> = Arc::new(EmbeddedLog::in_memory("dead-letters"));
        let store: Arc<dyn ColdStore> = Arc::new(RecordStore::in_memory());
        return Ok((log, dlq, store));
    };

    std::fs::create_dir_all(dir).map_err(|e| PipelineError::Config(format!("data dir {:?}: {}", dir, e)))?;

    let log: Arc<dyn DurableLog> = Arc::new(
        EmbeddedLog::open("events", &dir.join(EVENT_LOG_FILE), config.sync_writes)
            .map_err(|e| PipelineError::Config(format!("event log: {}", e)))?,
    );
    let dlq: Arc<dyn DurableLog> = Arc::new(
        EmbeddedLog::open("dead-letters", &dir.join(DEAD_LETTER_FILE), config.sync_writes)
            .map_err(|e| PipelineError::Config(format!("dead-letter log: {}", e)))?,
    );
    let store: Arc<dyn ColdStore> = Arc::new(
        RecordStore::open(&dir.join(RECORD_STORE_FILE))
            .map_err(|e| PipelineError::Config(format!("record store: {}", e)))?,
    );
    Ok((log, dlq, store))
}
