//! The detection capability and its two deployment topologies.
//!
//! The sampling loop only ever talks to an [`ObservationSource`]. Whether the
//! faces come from an in-process model reading a local camera
//! ([`LocalInference`]) or from a remote service that owns the camera
//! ([`RemotePolling`]) is a configuration choice made in [`build_source`].

pub mod local;
pub mod remote;

use crate::capture::{CaptureError, FrameState, SyntheticCamera};
use crate::config::{Config, DetectionConfig, DetectionMode};
use crate::core::emotion::ExpressionVector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use local::{ExpressionModel, LocalInference, SimulatedExpressionModel};
pub use remote::{RemoteClient, RemotePolling};

/// Axis-aligned face bounding box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// One face found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub region: Region,
    pub expressions: ExpressionVector,
    /// Detector confidence that this is a face
    pub confidence: f64,
}

/// Per-call parameters for the detection capability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Faces below this confidence are dropped
    pub min_confidence: f64,
    /// Inference resolution
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            input_size: 224,
        }
    }
}

impl From<&DetectionConfig> for DetectorConfig {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
            input_size: config.input_size,
        }
    }
}

/// Errors raised by the detection capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectionError {
    /// The model or service could not be initialised
    #[error("detection capability unavailable: {0}")]
    ModelUnavailable(String),
    /// The video source could not be opened
    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),
    /// Camera permission was refused
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    /// A single inference call failed
    #[error("inference failed: {0}")]
    Inference(String),
    /// The remote service stopped answering
    #[error("lost connection to detection service: {0}")]
    Connectivity(String),
    /// The remote service answered with something unexpected
    #[error("unexpected response from detection service: {0}")]
    Protocol(String),
}

impl DetectionError {
    /// Whether this failure ends the session instead of skipping one tick.
    pub fn ends_session(&self) -> bool {
        matches!(self, DetectionError::Connectivity(_))
    }
}

impl From<CaptureError> for DetectionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied => DetectionError::PermissionDenied(err.to_string()),
            other => DetectionError::SourceUnavailable(other.to_string()),
        }
    }
}

/// Where the sampling loop gets faces from.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Prepare the capability and acquire the video source.
    async fn activate(&self) -> Result<(), DetectionError>;

    /// Whether a frame is available to sample right now.
    fn readiness(&self) -> FrameState;

    /// Run one detection cycle. Zero faces is a normal result.
    async fn sample(&self, config: DetectorConfig) -> Result<Vec<FaceDetection>, DetectionError>;

    /// Free the video source. Safe to call repeatedly.
    async fn release(&self);
}

/// Build the observation source selected by `config.detection.mode`.
///
/// Local mode has no real camera or model behind it: it pairs a
/// [`SyntheticCamera`] with the [`SimulatedExpressionModel`], so
/// `emotion-sensor start` in local mode reports simulated labels. Real
/// classifications come from remote mode against a service that owns a camera
/// and a model.
pub fn build_source(config: &Config) -> Result<Arc<dyn ObservationSource>, DetectionError> {
    match config.detection.mode {
        DetectionMode::Local => {
            let camera = Arc::new(SyntheticCamera::new(config.camera.clone()));
            let model = Arc::new(SimulatedExpressionModel::new());
            Ok(Arc::new(LocalInference::new(camera, model)))
        }
        DetectionMode::Remote => {
            let client = RemoteClient::new(
                &config.detection.remote_url,
                config.detection.request_timeout,
            )?;
            Ok(Arc::new(RemotePolling::new(client)))
        }
    }
}
