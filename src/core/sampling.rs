//! Frame sampling loop.
//!
//! Drives the detection capability on a fixed period, reduces and throttles
//! its results, and forwards accepted observations to the aggregator and to
//! direct subscribers.
//!
//! Each detection call runs on its own task. While one is unresolved, further
//! ticks are skipped rather than queued, so slow inference never builds a
//! backlog. Results carry the epoch they were started under; once the session
//! moves to a new epoch (stop, restart) they are discarded.

use crate::core::aggregator::SharedAggregator;
use crate::core::emotion::Observation;
use crate::core::reducer::reduce_faces;
use crate::core::throttle::Throttle;
use crate::detection::{DetectionError, DetectorConfig, FaceDetection, ObservationSource};
use crate::transparency::SharedTransparencyLog;
use crossbeam_channel::{Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

type DetectionResult = Result<Vec<FaceDetection>, DetectionError>;

/// Latest accepted observation, shared with readers.
pub type SharedObservation = Arc<RwLock<Option<Observation>>>;

/// Whether the most recent completed detection found a face.
pub type FacePresence = Arc<AtomicBool>;

/// Session generation counter.
///
/// Work started under one epoch may only publish results while that epoch is
/// still current.
#[derive(Debug, Clone, Default)]
pub struct EpochGuard(Arc<AtomicU64>);

impl EpochGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Invalidate all outstanding work. Returns the new epoch.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.current() == epoch
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// The session was deactivated
    Cancelled,
    /// The remote detection service went away
    ConnectivityLost(String),
}

/// Everything one run of the sampling loop needs.
pub struct SamplingLoop {
    pub source: Arc<dyn ObservationSource>,
    pub detector_config: DetectorConfig,
    pub period: Duration,
    pub throttle: Throttle,
    pub aggregator: SharedAggregator,
    pub current: SharedObservation,
    pub face_present: FacePresence,
    pub observations: Sender<Observation>,
    pub log: SharedTransparencyLog,
    pub epoch: EpochGuard,
}

impl SamplingLoop {
    /// Run until `cancel` fires or the source reports a session-ending failure.
    ///
    /// The source is released before this returns, on every exit path.
    pub async fn run(mut self, cancel: CancellationToken) -> LoopExit {
        let epoch = self.epoch.current();
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut pending: Option<JoinHandle<DetectionResult>> = None;

        tracing::info!(
            source = self.source.name(),
            period_ms = self.period.as_millis() as u64,
            epoch,
            "sampling loop started"
        );

        let exit = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break LoopExit::Cancelled,

                joined = wait_pending(&mut pending), if pending.is_some() => {
                    pending = None;
                    if !self.epoch.is_current(epoch) {
                        tracing::debug!(epoch, "discarding detection from a previous epoch");
                        continue;
                    }
                    match joined {
                        Ok(Ok(faces)) => self.handle_faces(&faces, epoch).await,
                        Ok(Err(e)) if e.ends_session() => {
                            tracing::error!(source = self.source.name(), "ending session: {e}");
                            break LoopExit::ConnectivityLost(e.to_string());
                        }
                        Ok(Err(e)) => {
                            self.log.record_detection_failure();
                            tracing::warn!(source = self.source.name(), "detection failed: {e}");
                        }
                        Err(e) => {
                            self.log.record_detection_failure();
                            tracing::warn!(source = self.source.name(), "detection task failed: {e}");
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.log.record_tick();
                    if pending.is_some() {
                        self.log.record_busy();
                        continue;
                    }
                    if !self.source.readiness().is_ready() {
                        self.log.record_not_ready();
                        continue;
                    }
                    let source = self.source.clone();
                    let config = self.detector_config;
                    pending = Some(tokio::spawn(async move { source.sample(config).await }));
                }
            }
        };

        if let Some(handle) = pending.take() {
            handle.abort();
        }
        self.face_present.store(false, Ordering::SeqCst);
        self.source.release().await;
        tracing::info!(source = self.source.name(), ?exit, "sampling loop stopped");
        exit
    }

    async fn handle_faces(&mut self, faces: &[FaceDetection], epoch: u64) {
        let Some((label, score)) = reduce_faces(faces) else {
            self.face_present.store(false, Ordering::SeqCst);
            self.log.record_no_face();
            return;
        };
        // Throttled ticks still count: the face is there, only the update is dropped.
        self.face_present.store(true, Ordering::SeqCst);

        if !self.throttle.try_accept() {
            self.log.record_throttled();
            return;
        }

        let observation = Observation::new(label, score);
        {
            // Deactivation advances the epoch under this same lock, so an
            // ingest either lands before it or not at all.
            let mut aggregator = self.aggregator.write().await;
            if !self.epoch.is_current(epoch) {
                return;
            }
            aggregator.ingest(label);
        }
        *self.current.write().await = Some(observation.clone());
        self.log.record_observation();
        tracing::debug!(emotion = %label, score, "observation accepted");

        if let Err(TrySendError::Full(_)) = self.observations.try_send(observation) {
            tracing::trace!("observation subscriber lagging, dropped update");
        }
    }
}

async fn wait_pending(
    pending: &mut Option<JoinHandle<DetectionResult>>,
) -> Result<DetectionResult, JoinError> {
    match pending {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameState;
    use crate::core::aggregator::create_shared_aggregator;
    use crate::core::emotion::{ExpressionVector, Label};
    use crate::detection::Region;
    use crate::transparency::create_shared_log;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Source that replays scripted results, one per sample call.
    struct ScriptedSource {
        script: Mutex<Vec<DetectionResult>>,
        latency: Duration,
        ready: AtomicBool,
        samples: AtomicU64,
        releases: AtomicU64,
    }

    impl ScriptedSource {
        fn new(script: Vec<DetectionResult>, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().rev().collect()),
                latency,
                ready: AtomicBool::new(true),
                samples: AtomicU64::new(0),
                releases: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl ObservationSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn activate(&self) -> Result<(), DetectionError> {
            Ok(())
        }

        fn readiness(&self) -> FrameState {
            if self.ready.load(Ordering::SeqCst) {
                FrameState::Ready
            } else {
                FrameState::Warming
            }
        }

        async fn sample(&self, _config: DetectorConfig) -> DetectionResult {
            self.samples.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.script.lock().unwrap().pop().unwrap_or(Ok(Vec::new()))
        }

        async fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn face(label: Label, score: f64) -> FaceDetection {
        FaceDetection {
            region: Region::new(0, 0, 10, 10),
            expressions: ExpressionVector::from_pairs([(label, score)]),
            confidence: 0.9,
        }
    }

    struct Harness {
        aggregator: SharedAggregator,
        current: SharedObservation,
        face_present: FacePresence,
        log: SharedTransparencyLog,
        epoch: EpochGuard,
        receiver: crossbeam_channel::Receiver<Observation>,
    }

    fn build(source: Arc<dyn ObservationSource>, throttle_ms: u64) -> (SamplingLoop, Harness) {
        let (sender, receiver) = crossbeam_channel::bounded(64);
        let harness = Harness {
            aggregator: create_shared_aggregator(50, 20),
            current: Arc::new(RwLock::new(None)),
            face_present: Arc::new(AtomicBool::new(false)),
            log: create_shared_log(),
            epoch: EpochGuard::new(),
            receiver,
        };
        let sampling = SamplingLoop {
            source,
            detector_config: DetectorConfig::default(),
            period: Duration::from_millis(100),
            throttle: Throttle::new(Duration::from_millis(throttle_ms)),
            aggregator: harness.aggregator.clone(),
            current: harness.current.clone(),
            face_present: harness.face_present.clone(),
            observations: sender,
            log: harness.log.clone(),
            epoch: harness.epoch.clone(),
        };
        (sampling, harness)
    }

    #[test]
    fn test_epoch_guard() {
        let guard = EpochGuard::new();
        let epoch = guard.current();
        assert!(guard.is_current(epoch));
        assert_eq!(guard.advance(), epoch + 1);
        assert!(!guard.is_current(epoch));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_observations_reach_aggregator_in_order() {
        let script = vec![
            Ok(vec![face(Label::Happy, 0.9)]),
            Ok(vec![face(Label::Sad, 0.8)]),
            Ok(vec![face(Label::Neutral, 0.7)]),
        ];
        let source = ScriptedSource::new(script, Duration::ZERO);
        let (sampling, harness) = build(source.clone(), 0);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampling.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(450)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), LoopExit::Cancelled);

        let history: Vec<Label> = harness.aggregator.read().await.history().collect();
        assert_eq!(history, vec![Label::Happy, Label::Sad, Label::Neutral]);

        let received: Vec<Label> = harness.receiver.try_iter().map(|o| o.emotion).collect();
        assert_eq!(received, history);
        assert_eq!(
            harness.current.read().await.as_ref().map(|o| o.emotion),
            Some(Label::Neutral)
        );
        assert_eq!(source.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_faces_for_ten_ticks() {
        let source = ScriptedSource::new(Vec::new(), Duration::ZERO);
        let (sampling, harness) = build(source.clone(), 500);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampling.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert!(!task.is_finished());
        cancel.cancel();
        task.await.unwrap();

        let stats = harness.log.stats();
        assert!(stats.no_face >= 10, "no_face was {}", stats.no_face);
        assert_eq!(stats.observations_emitted, 0);
        assert_eq!(harness.aggregator.read().await.snapshot().total_frames, 0);
        assert!(harness.current.read().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_detection_skips_ticks_instead_of_queueing() {
        let source = ScriptedSource::new(Vec::new(), Duration::from_millis(350));
        let (sampling, harness) = build(source.clone(), 500);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampling.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        cancel.cancel();
        task.await.unwrap();

        let samples = source.samples.load(Ordering::SeqCst);
        let stats = harness.log.stats();
        assert!(samples <= 3, "overlapping detections: {samples}");
        assert!(stats.ticks_busy >= 5, "busy ticks: {}", stats.ticks_busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_limits_forwarding() {
        let script = (0..20).map(|_| Ok(vec![face(Label::Happy, 0.9)])).collect();
        let source = ScriptedSource::new(script, Duration::ZERO);
        let (sampling, harness) = build(source, 500);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampling.run(cancel.clone()));

        // Ticks at 0..=1000ms; accepted at 0, 500 and 1000.
        tokio::time::sleep(Duration::from_millis(1050)).await;
        cancel.cancel();
        task.await.unwrap();

        let stats = harness.log.stats();
        assert_eq!(stats.observations_emitted, 3);
        assert!(stats.observations_throttled >= 7);
        assert_eq!(harness.aggregator.read().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated_per_tick() {
        let script = vec![
            Err(DetectionError::Inference("bad frame".into())),
            Err(DetectionError::Protocol("502".into())),
            Ok(vec![face(Label::Fear, 0.6)]),
        ];
        let source = ScriptedSource::new(script, Duration::ZERO);
        let (sampling, harness) = build(source, 0);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampling.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(!task.is_finished());
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(harness.log.stats().detection_failures, 2);
        let history: Vec<Label> = harness.aggregator.read().await.history().collect();
        assert_eq!(history, vec![Label::Fear]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_loss_ends_loop_and_releases() {
        let script = vec![
            Ok(vec![face(Label::Happy, 0.9)]),
            Err(DetectionError::Connectivity("connection refused".into())),
        ];
        let source = ScriptedSource::new(script, Duration::ZERO);
        let (sampling, _harness) = build(source.clone(), 0);

        let exit = sampling.run(CancellationToken::new()).await;
        assert!(matches!(exit, LoopExit::ConnectivityLost(_)));
        assert_eq!(source.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_source_waits() {
        let source = ScriptedSource::new(Vec::new(), Duration::ZERO);
        source.ready.store(false, Ordering::SeqCst);
        let (sampling, harness) = build(source.clone(), 0);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampling.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(550)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(source.samples.load(Ordering::SeqCst), 0);
        assert!(harness.log.stats().ticks_not_ready >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_epoch_result_is_discarded() {
        let script = vec![Ok(vec![face(Label::Angry, 0.9)])];
        let source = ScriptedSource::new(script, Duration::from_millis(300));
        let (sampling, harness) = build(source, 0);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampling.run(cancel.clone()));

        // Detection is in flight; move to a new epoch before it resolves.
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.epoch.advance();
        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(harness.aggregator.read().await.len(), 0);
        assert!(harness.current.read().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_face_presence_follows_latest_detection() {
        let script = vec![
            Ok(vec![face(Label::Happy, 0.9)]),
            Ok(vec![face(Label::Happy, 0.9)]),
            Ok(Vec::new()),
        ];
        let source = ScriptedSource::new(script, Duration::ZERO);
        let (sampling, harness) = build(source, 500);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampling.run(cancel.clone()));

        // Second detection is throttled but the face is still present.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(harness.face_present.load(Ordering::SeqCst));
        assert_eq!(harness.log.stats().observations_throttled, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!harness.face_present.load(Ordering::SeqCst));
        // The last accepted observation stays readable.
        assert!(harness.current.read().await.is_some());

        cancel.cancel();
        task.await.unwrap();
        assert!(!harness.face_present.load(Ordering::SeqCst));
    }
}
