//! Remote-polling topology.
//!
//! A detection service running elsewhere owns the camera and keeps its latest
//! classification available over HTTP. This module polls that service once per
//! sampling tick and asks it to free the camera when the session ends.

use crate::capture::FrameState;
use crate::core::aggregator::DistributionSnapshot;
use crate::core::emotion::{ExpressionVector, Label};
use crate::detection::{DetectionError, DetectorConfig, FaceDetection, ObservationSource, Region};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Error code the service uses when camera permission is refused.
pub const CODE_PERMISSION_DENIED: &str = "PERMISSION_DENIED";

/// Error code the service uses when its model or camera cannot start.
pub const CODE_CAPABILITY_UNAVAILABLE: &str = "CAPABILITY_UNAVAILABLE";

/// Current classification as served by `GET /current_emotion`.
///
/// `face_detected` and `expressions` are optional so that services which only
/// report the reduced label are still understood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentEmotionResponse {
    pub emotion: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_detected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expressions: Option<BTreeMap<String, f64>>,
    #[serde(default, rename = "box", skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
}

impl CurrentEmotionResponse {
    /// Convert to the detection result the sampling loop consumes.
    pub fn into_faces(self) -> Vec<FaceDetection> {
        if self.face_detected == Some(false) {
            return Vec::new();
        }
        let label = match self.emotion.parse::<Label>() {
            Ok(label) if label.is_known() => label,
            _ => return Vec::new(),
        };

        let mut expressions = ExpressionVector::new();
        if let Some(raw) = &self.expressions {
            for (name, score) in raw {
                if let Ok(parsed) = name.parse::<Label>() {
                    expressions.insert(parsed, *score);
                }
            }
        }
        if expressions.is_empty() {
            expressions.insert(label, self.score);
        }

        vec![FaceDetection {
            region: self.region.unwrap_or(Region::new(0, 0, 0, 0)),
            expressions,
            confidence: 1.0,
        }]
    }
}

/// Error body returned by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceError {
    pub error: String,
    pub code: String,
}

/// Text analysis request body for `POST /analyze_text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

/// HTTP client for a remote detection service.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteClient {
    /// Create a client. Fails only if the TLS backend cannot be initialised.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectionError::ModelUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }

    pub fn start_url(&self) -> String {
        format!("{}/start_camera", self.base_url)
    }

    pub fn stop_url(&self) -> String {
        format!("{}/stop_camera", self.base_url)
    }

    pub fn current_url(&self) -> String {
        format!("{}/current_emotion", self.base_url)
    }

    pub fn analytics_url(&self) -> String {
        format!("{}/analytics", self.base_url)
    }

    pub fn analyze_text_url(&self) -> String {
        format!("{}/analyze_text", self.base_url)
    }

    /// Check that the service answers its health endpoint.
    pub async fn test_connection(&self) -> Result<bool, DetectionError> {
        let response = self
            .client
            .get(self.health_url())
            .send()
            .await
            .map_err(|e| DetectionError::Connectivity(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Ask the service to acquire its camera.
    pub async fn start_camera(&self) -> Result<(), DetectionError> {
        let response = self
            .client
            .post(self.start_url())
            .send()
            .await
            .map_err(|e| DetectionError::ModelUnavailable(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body: Option<ServiceError> = response.json().await.ok();
        let message = body
            .as_ref()
            .map(|b| b.error.clone())
            .unwrap_or_else(|| format!("status {status}"));

        match body.as_ref().map(|b| b.code.as_str()) {
            Some(CODE_PERMISSION_DENIED) => Err(DetectionError::PermissionDenied(message)),
            _ => Err(DetectionError::ModelUnavailable(message)),
        }
    }

    /// Tell the service to release its camera hardware.
    pub async fn stop_camera(&self) -> Result<(), DetectionError> {
        let response = self
            .client
            .post(self.stop_url())
            .send()
            .await
            .map_err(|e| DetectionError::Connectivity(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DetectionError::Protocol(format!(
                "stop_camera returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Fetch the service's current classification.
    pub async fn current_emotion(
        &self,
        config: DetectorConfig,
    ) -> Result<CurrentEmotionResponse, DetectionError> {
        let response = self
            .client
            .get(self.current_url())
            .query(&[
                ("min_confidence", config.min_confidence.to_string()),
                ("input_size", config.input_size.to_string()),
            ])
            .send()
            .await
            .map_err(poll_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectionError::Protocol(format!(
                "current_emotion returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DetectionError::Protocol(e.to_string()))
    }

    /// Fetch the service's own rolling analytics.
    pub async fn analytics(&self) -> Result<DistributionSnapshot, DetectionError> {
        let response = self
            .client
            .get(self.analytics_url())
            .send()
            .await
            .map_err(poll_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectionError::Protocol(format!("analytics returned {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| DetectionError::Protocol(e.to_string()))
    }

    /// POST text to the service's analysis endpoint and return the raw JSON.
    pub async fn analyze_text(&self, text: &str) -> Result<serde_json::Value, DetectionError> {
        let response = self
            .client
            .post(self.analyze_text_url())
            .json(&TextRequest {
                text: text.to_string(),
            })
            .send()
            .await
            .map_err(|e| DetectionError::Connectivity(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DetectionError::Protocol(format!("{status}: {message}")));
        }

        response
            .json()
            .await
            .map_err(|e| DetectionError::Protocol(e.to_string()))
    }
}

/// Map a failed poll. A slow answer costs one tick; anything else means the
/// service is unreachable.
fn poll_error(err: reqwest::Error) -> DetectionError {
    if err.is_timeout() {
        DetectionError::Inference(format!("detection service timed out: {err}"))
    } else {
        DetectionError::Connectivity(err.to_string())
    }
}

/// Observation source backed by a remote detection service.
pub struct RemotePolling {
    client: RemoteClient,
    active: AtomicBool,
}

impl RemotePolling {
    pub fn new(client: RemoteClient) -> Self {
        Self {
            client,
            active: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }
}

#[async_trait]
impl ObservationSource for RemotePolling {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn activate(&self) -> Result<(), DetectionError> {
        match self.client.test_connection().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(DetectionError::ModelUnavailable(
                    "detection service health check failed".to_string(),
                ))
            }
            Err(e) => return Err(DetectionError::ModelUnavailable(e.to_string())),
        }

        self.client.start_camera().await?;
        self.active.store(true, Ordering::SeqCst);
        tracing::info!(url = self.client.base_url(), "remote detection service attached");
        Ok(())
    }

    fn readiness(&self) -> FrameState {
        if self.active.load(Ordering::SeqCst) {
            FrameState::Ready
        } else {
            FrameState::Ended
        }
    }

    async fn sample(&self, config: DetectorConfig) -> Result<Vec<FaceDetection>, DetectionError> {
        let current = self.client.current_emotion(config).await?;
        Ok(current.into_faces())
    }

    async fn release(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.client.stop_camera().await {
            Ok(()) => tracing::info!("remote camera released"),
            Err(e) => tracing::warn!("could not release remote camera: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reducer::reduce_faces;

    #[test]
    fn test_client_urls() {
        let client = RemoteClient::new("http://127.0.0.1:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.health_url(), "http://127.0.0.1:8000/health");
        assert_eq!(client.current_url(), "http://127.0.0.1:8000/current_emotion");
        assert_eq!(client.stop_url(), "http://127.0.0.1:8000/stop_camera");
        assert_eq!(client.start_url(), "http://127.0.0.1:8000/start_camera");
        assert_eq!(client.analytics_url(), "http://127.0.0.1:8000/analytics");
    }

    #[test]
    fn test_reduced_only_response_becomes_one_face() {
        let response: CurrentEmotionResponse =
            serde_json::from_str(r#"{ "emotion": "Happy", "score": 0.91 }"#).unwrap();
        let faces = response.into_faces();
        assert_eq!(faces.len(), 1);
        assert_eq!(reduce_faces(&faces), Some((Label::Happy, 0.91)));
    }

    #[test]
    fn test_full_response_keeps_expression_vector() {
        let response: CurrentEmotionResponse = serde_json::from_str(
            r#"{
                "emotion": "sad",
                "score": 0.6,
                "face_detected": true,
                "expressions": { "sad": 0.6, "neutral": 0.3, "contempt": 0.9 },
                "box": { "x": 10, "y": 20, "width": 30, "height": 40 }
            }"#,
        )
        .unwrap();
        let faces = response.into_faces();
        assert_eq!(faces[0].region, Region::new(10, 20, 30, 40));
        assert_eq!(faces[0].expressions.len(), 2);
        assert_eq!(reduce_faces(&faces), Some((Label::Sad, 0.6)));
    }

    #[test]
    fn test_no_face_response_is_empty() {
        let response: CurrentEmotionResponse = serde_json::from_str(
            r#"{ "emotion": "Neutral", "score": 0.0, "face_detected": false }"#,
        )
        .unwrap();
        assert!(response.into_faces().is_empty());

        let unknown: CurrentEmotionResponse =
            serde_json::from_str(r#"{ "emotion": "Unknown", "score": 0.0 }"#).unwrap();
        assert!(unknown.into_faces().is_empty());
    }

    #[tokio::test]
    async fn test_poll_timeout_is_a_per_tick_failure() {
        // Accepts connections and never answers them.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let client =
            RemoteClient::new(&format!("http://{addr}"), Duration::from_millis(200)).unwrap();
        let err = client
            .current_emotion(DetectorConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DetectionError::Inference(_)), "{err:?}");
        assert!(!err.ends_session());
    }

    #[tokio::test]
    async fn test_refused_poll_ends_session() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            RemoteClient::new(&format!("http://{addr}"), Duration::from_millis(200)).unwrap();
        let err = client
            .current_emotion(DetectorConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, DetectionError::Connectivity(_)), "{err:?}");
        assert!(err.ends_session());
    }

    #[tokio::test]
    async fn test_unreachable_service_cannot_activate() {
        // Port 9 (discard) on localhost is not expected to run an HTTP server.
        let client = RemoteClient::new("http://127.0.0.1:9", Duration::from_millis(300)).unwrap();
        let source = RemotePolling::new(client);

        assert!(matches!(
            source.activate().await,
            Err(DetectionError::ModelUnavailable(_))
        ));
        assert_eq!(source.readiness(), FrameState::Ended);
    }
}
