// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GROUP: &str = "conduit-workers";
pub const EVENT_LOG_FILE: &str = "events.log";
pub const DEAD_LETTER_FILE: &str = "dead-letter.log";
pub const RECORD_STORE_FILE: &str = "records.jsonl";

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    /// Directory for the log, dead-letter log and record store.
    /// `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// fsync every log write.
    pub sync_writes: bool,
    pub group: String,
    /// Base consumer identity; workers beyond the first get a `-<n>` suffix.
    pub consumer: String,
    pub workers: usize,
    /// Maximum accepted ingest body size in bytes.
    pub body_limit: usize,
    pub worker: WorkerConfig,
    pub fanout: FanoutConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub block_timeout: Duration,
    pub max_retries: u32,
    /// Pause after a failed attempt that will be retried.
    pub retry_backoff: Duration,
    /// Pause after the loop itself failed (log unreachable).
    pub error_backoff: Duration,
    pub shutdown_grace: Duration,
    /// Pending entries of other consumers idle this long are claimed.
    pub claim_min_idle: Duration,
}

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Capacity of the shared notification channel.
    pub channel_capacity: usize,
    /// Frames queued per observer session. A full queue fails the write.
    pub session_buffer: usize,
    pub keep_alive: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            block_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
            error_backoff: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(6),
            claim_min_idle: Duration::from_secs(60),
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            session_buffer: 64,
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            data_dir: None,
            sync_writes: true,
            group: DEFAULT_GROUP.to_string(),
            consumer: format!("worker-{}", std::process::id()),
            workers: 1,
            body_limit: 256 * 1024,
            worker: WorkerConfig::default(),
            fanout: FanoutConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Defaults overridden by `CONDUIT_*` environment variables.
    pub fn from_env() -> Result<Self, String> {
        let mut cfg = Self::default();

        if let Ok(addr) = std::env::var("CONDUIT_BIND_ADDR") {
            cfg.bind_addr = addr
                .parse()
                .map_err(|e| format!("CONDUIT_BIND_ADDR {:?}: {}", addr, e))?;
        }
        if let Ok(dir) = std::env::var("CONDUIT_DATA_DIR") {
            cfg.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(consumer) = std::env::var("CONDUIT_CONSUMER") {
            cfg.consumer = consumer;
        }
        if let Ok(workers) = std::env::var("CONDUIT_WORKERS") {
            cfg.workers = workers
                .parse()
                .map_err(|e| format!("CONDUIT_WORKERS {:?}: {}", workers, e))?;
        }

        Ok(cfg)
    }

    /// Consumer identity of the `index`-th worker.
    pub fn consumer_name(&self, index: usize) -> String {
        if index == 0 {
            self.consumer.clone()
        } else {
            format!("{}-{}", self.consumer, index)
        }
    }
}
