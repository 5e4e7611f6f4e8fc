//! Client for the remote anomaly-detection service
//!
//! The detection model itself is an opaque remote service; this module only
//! knows how to send one process's sample batch and get typed per-metric
//! predictions back. The transport is HTTP/JSON with one reused client.
//! [`DetectionClient`] is a trait so the pipeline can be exercised against a
//! mock in tests.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{MetricSample, MetricType};

/// Result type alias for detection calls
pub type DetectionResult<T> = Result<T, DetectionError>;

/// Errors from a detection round trip. Any of these abort the calling
/// process's round; the next round tries again.
#[derive(Debug)]
pub enum DetectionError {
    /// The service was unreachable or the request timed out
    Transport(String),

    /// The service answered with a non-success status code
    Status(u16),

    /// The response body could not be decoded
    Decode(String),
}

impl fmt::Display for DetectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionError::Transport(msg) => {
                write!(f, "detection service unreachable: {}", msg)
            }
            DetectionError::Status(code) => {
                write!(f, "detection service answered with status {}", code)
            }
            DetectionError::Decode(msg) => {
                write!(f, "could not decode detection response: {}", msg)
            }
        }
    }
}

impl std::error::Error for DetectionError {}

impl From<reqwest::Error> for DetectionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DetectionError::Decode(err.to_string())
        } else {
            DetectionError::Transport(err.to_string())
        }
    }
}

/// One data point submitted for detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub metric_type: MetricType,
    pub pid: i32,
    pub value: f64,
}

/// An ordered batch of points for one process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRequest {
    pub metrics: Vec<MetricPoint>,
}

impl DetectionRequest {
    pub fn from_samples(samples: &[MetricSample]) -> Self {
        Self {
            metrics: samples
                .iter()
                .map(|sample| MetricPoint {
                    timestamp: sample.timestamp,
                    metric_type: sample.metric_type,
                    pid: sample.pid,
                    value: sample.value,
                })
                .collect(),
        }
    }
}

/// One prediction entry; the code is opaque to the agent (the reference
/// model emits 1 for normal and -1 for outlier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub pid: i32,
    pub metric_type: MetricType,
    pub prediction: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub predictions: Vec<Prediction>,
}

impl DetectionResponse {
    /// Fold the response into a per-metric-type map. Predictions are keyed
    /// by type, not by sample instance; when the service repeats a type, the
    /// last entry wins.
    pub fn prediction_map(&self) -> HashMap<MetricType, i32> {
        let mut map = HashMap::new();
        for entry in &self.predictions {
            map.insert(entry.metric_type, entry.prediction);
        }
        map
    }
}

/// Sends one batch of samples and returns typed predictions, or an error.
#[async_trait]
pub trait DetectionClient: Send + Sync {
    async fn detect(&self, request: DetectionRequest) -> DetectionResult<DetectionResponse>;
}

/// HTTP implementation of [`DetectionClient`]
pub struct HttpDetectionClient {
    /// HTTP client (reused across requests for efficiency)
    client: reqwest::Client,
    url: String,
}

impl HttpDetectionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            url: format!("{}/detect", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl DetectionClient for HttpDetectionClient {
    async fn detect(&self, request: DetectionRequest) -> DetectionResult<DetectionResponse> {
        trace!("submitting {} points to {}", request.metrics.len(), self.url);

        let response = self.client.post(&self.url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(DetectionError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let decoded: DetectionResponse =
            serde_json::from_str(&body).map_err(|e| DetectionError::Decode(e.to_string()))?;

        trace!("received {} predictions", decoded.predictions.len());

        Ok(decoded)
    }
}
