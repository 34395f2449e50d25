// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;

use crate::api::*;
use crate::errors::PipelineError;
use crate::fanout::Broadcaster;
use crate::faults::{FaultInjector, FaultSettings};
use crate::gateway::IngestGateway;
use crate::health::{HealthReporter, HealthStats};

#[derive(Clone)]
pub struct AppState {
    pub gateway: IngestGateway,
    pub broadcaster: Arc<Broadcaster>,
    pub health: Arc<HealthReporter>,
    pub faults: Arc<FaultInjector>,
    pub keep_alive: Duration,
}

pub fn build_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/v1/ingest", post(ingest))
        .route("/live", get(live))
        .route("/v1/metrics/live", get(live))
        .route("/health-stats", get(health_stats))
        .route("/v1/metrics/stats", get(health_stats))
        // Control
        .route("/v1/control/faults", get(get_faults).post(set_faults))
        // Observability
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Body is parsed by the gateway so malformed JSON gets the same `{error}`
/// response as a non-object.
async fn ingest(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestAccepted>), PipelineError> {
    state.gateway.ingest(body.to_vec())?;
    Ok((StatusCode::ACCEPTED, Json(IngestAccepted { accepted: true })))
}

async fn live(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (guard, frames) = state.broadcaster.subscribe().into_parts();

    let connected = stream::once(async { Ok::<_, Infallible>(Event::default().comment("connected")) });
    let updates = ReceiverStream::new(frames).map(move |frame| {
        // Keeps the session registered for as long as the response lives.
        let _session = &guard;
        Ok::<_, Infallible>(Event::default().data(frame))
    });

    Sse::new(connected.chain(updates)).keep_alive(KeepAlive::new().interval(state.keep_alive))
}

async fn health_stats(State(state): State<AppState>) -> Json<HealthStats> {
    Json(state.health.stats().await)
}

async fn get_faults(State(state): State<AppState>) -> Json<FaultSettings> {
    Json(state.faults.snapshot())
}

async fn set_faults(State(state): State<AppState>, Json(req): Json<FaultsRequest>) -> Json<FaultSettings> {
    let current = state.faults.snapshot();
    state.faults.apply(FaultSettings {
        fail_store_writes: req.fail_store_writes.unwrap_or(current.fail_store_writes),
        fail_log_appends: req.fail_log_appends.unwrap_or(current.fail_log_appends),
    });
    Json(state.faults.snapshot())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string() })
}

async fn metrics_handler() -> String {
    crate::telemetry::get_metrics()
}
