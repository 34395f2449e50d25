// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use conduit_log::LogError;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Ingest body is not a JSON object.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    /// Append or read against the durable log failed.
    #[error("Log unavailable: {0}")]
    LogUnavailable(String),
    /// Decode or store write failed while consuming an entry.
    #[error("Processing failure: {0}")]
    ProcessingFailure(String),
    #[error("Dead-letter write failed: {0}")]
    DeadLetterWriteFailure(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// Startup configuration problem; fatal.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = match &self {
            PipelineError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            PipelineError::LogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match self {
            PipelineError::InvalidPayload(msg) => msg,
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<LogError> for PipelineError {
    fn from(e: LogError) -> Self {
        PipelineError::LogUnavailable(e.to_string())
    }
}
