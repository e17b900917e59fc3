//! Detection session lifecycle.
//!
//! A [`Session`] owns one observation source, the rolling aggregator, and at
//! most one running sampling loop. Every method takes `&self` so a session can
//! be shared behind an `Arc` between the CLI, the HTTP server, and tests.

use crate::config::Config;
use crate::core::aggregator::{create_shared_aggregator, DistributionSnapshot, SharedAggregator};
use crate::core::emotion::Observation;
use crate::core::sampling::{EpochGuard, FacePresence, LoopExit, SamplingLoop, SharedObservation};
use crate::core::throttle::Throttle;
use crate::detection::{build_source, DetectionError, DetectorConfig, ObservationSource};
use crate::transparency::{create_shared_log, SharedTransparencyLog, TransparencyStats};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Capacity of the direct observation channel.
const OBSERVATION_CHANNEL_CAPACITY: usize = 256;

/// Externally visible session status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Active {
        session_id: String,
        started_at: DateTime<Utc>,
    },
    /// The user refused camera access
    PermissionDenied(String),
    /// The model, camera, or remote service could not be brought up
    CannotStart(String),
    /// The remote service went away mid-session
    Disconnected(String),
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }
}

/// Session control errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("a detection session is already active")]
    AlreadyActive,
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("cannot start detection: {0}")]
    CannotStart(String),
    #[error("sampling loop failed: {0}")]
    LoopFailed(String),
}

impl From<DetectionError> for SessionError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::PermissionDenied(msg) => SessionError::PermissionDenied(msg),
            other => SessionError::CannotStart(other.to_string()),
        }
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One detection session at a time over a fixed observation source.
pub struct Session {
    config: Config,
    source: Arc<dyn ObservationSource>,
    aggregator: SharedAggregator,
    current: SharedObservation,
    face_present: FacePresence,
    log: SharedTransparencyLog,
    epoch: EpochGuard,
    state: Arc<watch::Sender<SessionState>>,
    observation_tx: Sender<Observation>,
    observation_rx: Receiver<Observation>,
    running: Mutex<Option<RunningLoop>>,
}

impl Session {
    pub fn new(config: Config, source: Arc<dyn ObservationSource>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (observation_tx, observation_rx) =
            crossbeam_channel::bounded(OBSERVATION_CHANNEL_CAPACITY);

        Self {
            aggregator: create_shared_aggregator(config.history_capacity, config.recent_len),
            config,
            source,
            current: Arc::new(RwLock::new(None)),
            face_present: Arc::new(AtomicBool::new(false)),
            log: create_shared_log(),
            epoch: EpochGuard::new(),
            state: Arc::new(state),
            observation_tx,
            observation_rx,
            running: Mutex::new(None),
        }
    }

    /// Build a session with the source selected by `config`.
    pub fn from_config(config: Config) -> Result<Self, SessionError> {
        let source = build_source(&config)?;
        Ok(Self::new(config, source))
    }

    /// Activate detection and start the sampling loop.
    ///
    /// The rolling history starts empty. A failed start leaves the previous
    /// session's history readable. Returns the new session id.
    pub async fn start(&self) -> Result<String, SessionError> {
        let mut running = self.running.lock().await;
        if let Some(existing) = running.as_ref() {
            if !existing.handle.is_finished() {
                return Err(SessionError::AlreadyActive);
            }
        }
        // A loop that ended on its own (connectivity loss) is reaped here.
        *running = None;

        self.state.send_replace(SessionState::Starting);

        if let Err(e) = self.source.activate().await {
            self.source.release().await;
            let err = SessionError::from(e);
            let state = match &err {
                SessionError::PermissionDenied(msg) => SessionState::PermissionDenied(msg.clone()),
                other => SessionState::CannotStart(other.to_string()),
            };
            tracing::warn!(source = self.source.name(), "detection session failed to start: {err}");
            self.state.send_replace(state);
            return Err(err);
        }

        self.clear_history().await;
        self.log.reset();

        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let sampling = SamplingLoop {
            source: self.source.clone(),
            detector_config: DetectorConfig::from(&self.config.detection),
            period: self.config.sampling_period,
            throttle: Throttle::new(self.config.throttle_interval),
            aggregator: self.aggregator.clone(),
            current: self.current.clone(),
            face_present: self.face_present.clone(),
            observations: self.observation_tx.clone(),
            log: self.log.clone(),
            epoch: self.epoch.clone(),
        };

        self.state.send_replace(SessionState::Active {
            session_id: session_id.clone(),
            started_at: Utc::now(),
        });

        let state = self.state.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            if let LoopExit::ConnectivityLost(reason) = sampling.run(loop_cancel).await {
                state.send_replace(SessionState::Disconnected(reason));
            }
        });

        *running = Some(RunningLoop { cancel, handle });
        tracing::info!(%session_id, source = self.source.name(), "detection session started");
        Ok(session_id)
    }

    /// Deactivate detection.
    ///
    /// Any detection still in flight is discarded. Returns once the source has
    /// been released. Stopping an idle session is a no-op.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let running = self.running.lock().await.take();

        {
            let _aggregator = self.aggregator.write().await;
            self.epoch.advance();
        }

        let result = match running {
            Some(RunningLoop { cancel, handle }) => {
                cancel.cancel();
                handle
                    .await
                    .map_err(|e| SessionError::LoopFailed(e.to_string()))
            }
            None => Ok(()),
        };

        self.state.send_replace(SessionState::Idle);
        tracing::info!("detection session stopped");
        result
    }

    /// Discard history, the current observation, and the processing counters.
    pub async fn reset(&self) {
        self.clear_history().await;
        self.log.reset();
    }

    async fn clear_history(&self) {
        self.aggregator.write().await.clear();
        *self.current.write().await = None;
        self.face_present.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watch state transitions, including the loop ending on its own.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whether a sampling loop is currently running.
    pub fn is_active(&self) -> bool {
        self.state.borrow().is_active()
    }

    pub fn session_id(&self) -> Option<String> {
        match &*self.state.borrow() {
            SessionState::Active { session_id, .. } => Some(session_id.clone()),
            _ => None,
        }
    }

    /// Receiver for every observation that passed the throttle.
    ///
    /// Receivers share one queue: each observation goes to exactly one of them.
    pub fn observations(&self) -> Receiver<Observation> {
        self.observation_rx.clone()
    }

    pub async fn get_snapshot(&self) -> DistributionSnapshot {
        self.aggregator.read().await.snapshot()
    }

    pub async fn get_current_observation(&self) -> Option<Observation> {
        self.current.read().await.clone()
    }

    /// Whether the latest detection of the running session found a face.
    ///
    /// The current observation outlives the face that produced it; this does
    /// not.
    pub fn face_present(&self) -> bool {
        self.is_active() && self.face_present.load(Ordering::SeqCst)
    }

    /// The aggregator this session ingests into.
    pub fn aggregator(&self) -> SharedAggregator {
        self.aggregator.clone()
    }

    pub fn stats(&self) -> TransparencyStats {
        self.log.stats()
    }

    pub fn transparency_log(&self) -> SharedTransparencyLog {
        self.log.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The loop releases the source itself once cancelled.
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}
