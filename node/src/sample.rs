// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Structure the worker imposes on an otherwise opaque payload.

use serde_json::{Map, Value};

use crate::errors::PipelineError;

/// Timestamps below this are taken to be seconds rather than milliseconds.
const SECONDS_CUTOFF: u64 = 1_000_000_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub metric: Option<String>,
    pub value: Option<f64>,
    pub timestamp_ms: Option<u64>,
    /// The full document as received.
    pub document: Value,
}

impl MetricSample {
    pub fn decode(bytes: &[u8]) -> Result<Self, PipelineError> {
        let document: Value = serde_json::from_slice(bytes)
            .map_err(|e| PipelineError::ProcessingFailure(format!("payload is not valid JSON: {}", e)))?;

        let obj = document
            .as_object()
            .ok_or_else(|| PipelineError::ProcessingFailure("payload is not a JSON object".into()))?;

        let metric = obj.get("metric").and_then(Value::as_str).map(str::to_owned);

        let value = match obj.get("value") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() => Some(v),
                _ => {
                    return Err(PipelineError::ProcessingFailure(format!("value {} is not finite", n)));
                }
            },
            Some(other) => {
                return Err(PipelineError::ProcessingFailure(format!(
                    "value must be numeric, got {}",
                    other
                )));
            }
        };

        let timestamp_ms = match obj.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(ts) => Some(
                timestamp_ms(obj)
                    .ok_or_else(|| PipelineError::ProcessingFailure(format!("timestamp {} is not an integer", ts)))?,
            ),
        };

        Ok(Self {
            metric,
            value,
            timestamp_ms,
            document,
        })
    }
}

/// Producer capture time in milliseconds, when the object carries an integer
/// `timestamp` in seconds or milliseconds.
pub fn timestamp_ms(obj: &Map<String, Value>) -> Option<u64> {
    let raw = obj.get("timestamp")?.as_u64()?;
    if raw < SECONDS_CUTOFF {
        raw.checked_mul(1000)
    } else {
        Some(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_cpu_sample() {
        let sample = MetricSample::decode(br#"{"metric":"cpu","value":42.5,"timestamp":1700000000}"#).unwrap();
        assert_eq!(sample.metric.as_deref(), Some("cpu"));
        assert_eq!(sample.value, Some(42.5));
        assert_eq!(sample.timestamp_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_millisecond_timestamp_kept() {
        let sample = MetricSample::decode(br#"{"timestamp":1700000000123}"#).unwrap();
        assert_eq!(sample.timestamp_ms, Some(1_700_000_000_123));
    }

    #[test]
    fn test_non_numeric_value_rejected() {
        let err = MetricSample::decode(br#"{"metric":"cpu","value":"high"}"#).unwrap_err();
        assert!(matches!(err, PipelineError::ProcessingFailure(msg) if msg.contains("numeric")));
    }

    #[test]
    fn test_fractional_timestamp_rejected() {
        assert!(MetricSample::decode(br#"{"timestamp":1.5}"#).is_err());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(MetricSample::decode(b"[1,2,3]").is_err());
        assert!(MetricSample::decode(b"not json").is_err());
    }
}
