//! Local-inference topology: an in-process expression model reading frames
//! from a camera owned by this process.

use crate::capture::{Frame, FrameSource, FrameState};
use crate::core::emotion::{ExpressionVector, Label};
use crate::detection::{DetectionError, DetectorConfig, FaceDetection, ObservationSource, Region};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Frames darker than this are treated as containing no face.
const DARK_FRAME_LUMA: f64 = 20.0;

/// Chance per call that the simulated expression changes.
const EXPRESSION_CHANGE_PROBABILITY: f64 = 0.05;

/// Weighted pool the simulated model draws new expressions from.
const EXPRESSION_POOL: [Label; 5] = [
    Label::Happy,
    Label::Happy,
    Label::Neutral,
    Label::Surprise,
    Label::Angry,
];

/// Side length of the simulated face box at 640x480.
const FACE_BOX: u32 = 200;

/// An expression classifier that runs in-process.
#[async_trait]
pub trait ExpressionModel: Send + Sync {
    /// Load weights. Called once per session before the first detection.
    async fn load(&self) -> Result<(), DetectionError>;

    /// Detect faces and score their expressions.
    async fn detect(
        &self,
        frame: &Frame,
        config: DetectorConfig,
    ) -> Result<Vec<FaceDetection>, DetectionError>;
}

/// Stand-in model for hosts without expression weights.
///
/// Holds a dominant expression that drifts occasionally, reports it with high
/// confidence on a centred face box, and sees no face in a dark frame.
pub struct SimulatedExpressionModel {
    current: Mutex<Label>,
    unavailable: bool,
    loaded: AtomicBool,
    latency: Duration,
}

impl SimulatedExpressionModel {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Label::Happy),
            unavailable: false,
            loaded: AtomicBool::new(false),
            latency: Duration::ZERO,
        }
    }

    /// A model whose weights fail to load.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new()
        }
    }

    /// Add artificial inference latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn infer(&self, frame: &Frame, config: DetectorConfig) -> Vec<FaceDetection> {
        if frame.mean_luma() < DARK_FRAME_LUMA {
            return Vec::new();
        }

        let mut rng = rand::thread_rng();
        let dominant = {
            let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
            if rng.gen_bool(EXPRESSION_CHANGE_PROBABILITY) {
                if let Some(next) = EXPRESSION_POOL.choose(&mut rng) {
                    *current = *next;
                }
            }
            *current
        };

        let mut expressions = ExpressionVector::new();
        for label in Label::ALL {
            expressions.insert(label, rng.gen::<f64>() * 0.05);
        }
        expressions.insert(dominant, 0.88 + rng.gen::<f64>() * 0.1);

        let confidence = 0.9 + rng.gen::<f64>() * 0.09;
        if confidence < config.min_confidence {
            return Vec::new();
        }

        vec![FaceDetection {
            region: centered_box(frame),
            expressions,
            confidence,
        }]
    }
}

impl Default for SimulatedExpressionModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExpressionModel for SimulatedExpressionModel {
    async fn load(&self) -> Result<(), DetectionError> {
        if self.unavailable {
            return Err(DetectionError::ModelUnavailable(
                "expression model weights not found".to_string(),
            ));
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn detect(
        &self,
        frame: &Frame,
        config: DetectorConfig,
    ) -> Result<Vec<FaceDetection>, DetectionError> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(DetectionError::Inference("model not loaded".to_string()));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.infer(frame, config))
    }
}

/// Face box centred in the frame, scaled from a 640x480 reference.
fn centered_box(frame: &Frame) -> Region {
    let scale = frame.width as f64 / 640.0;
    let side = ((FACE_BOX as f64 * scale).round() as u32)
        .clamp(1, frame.width.min(frame.height).max(1));
    let x = (frame.width as i32 - side as i32) / 2;
    let y = (frame.height as i32 - side as i32) / 2;
    Region::new(x, y, side, side)
}

/// Camera plus in-process model.
pub struct LocalInference {
    camera: Arc<dyn FrameSource>,
    model: Arc<dyn ExpressionModel>,
}

impl LocalInference {
    pub fn new(camera: Arc<dyn FrameSource>, model: Arc<dyn ExpressionModel>) -> Self {
        Self { camera, model }
    }

    pub fn camera(&self) -> &Arc<dyn FrameSource> {
        &self.camera
    }
}

#[async_trait]
impl ObservationSource for LocalInference {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn activate(&self) -> Result<(), DetectionError> {
        // Model first: a missing model and a refused camera need different fixes.
        self.model.load().await?;
        self.camera.open()?;
        Ok(())
    }

    fn readiness(&self) -> FrameState {
        self.camera.state()
    }

    async fn sample(&self, config: DetectorConfig) -> Result<Vec<FaceDetection>, DetectionError> {
        let frame = self
            .camera
            .latest_frame()
            .ok_or_else(|| DetectionError::Inference("no frame available".to_string()))?;
        self.model.detect(&frame, config).await
    }

    async fn release(&self) {
        let camera = self.camera.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || camera.release()).await {
            tracing::warn!("camera release task failed: {e}");
        }
    }
}
