// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Initialize Tracing (Logs)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "conduit_node=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Initialize Metrics (Prometheus)
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if PROM_HANDLE.set(handle).is_err() {
        tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
    }

    metrics::describe_counter!("conduit_events_ingested_total", "Events appended to the durable log");
    metrics::describe_counter!("conduit_events_dropped_total", "Accepted events dropped because the log was unavailable");
    metrics::describe_counter!("conduit_records_persisted_total", "Entries written to the cold store");
    metrics::describe_counter!("conduit_records_duplicate_total", "Redelivered entries already present in the cold store");
    metrics::describe_counter!("conduit_processing_failures_total", "Failed processing attempts (decode or store write)");
    metrics::describe_counter!("conduit_dead_letters_total", "Entries routed to the dead-letter log");
    metrics::describe_counter!("conduit_dead_letter_write_failures_total", "Dead-letter appends that failed");
    metrics::describe_counter!("conduit_fanout_write_failures_total", "Failed or timed out writes to observer sessions");
    metrics::describe_gauge!("conduit_live_sessions", "Open observer sessions");
    metrics::describe_histogram!("conduit_log_replay_duration_seconds", "Time taken to replay a log file on open");

    metrics::gauge!("conduit_node_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    match PROM_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# metrics not initialized".to_string(),
    }
}
