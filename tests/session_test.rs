//! Integration tests for the detection session lifecycle

use async_trait::async_trait;
use emotion_sensor_agent::capture::{CameraAccess, FrameSource, FrameState, SyntheticCamera};
use emotion_sensor_agent::config::{CameraConfig, Config, DetectionMode};
use emotion_sensor_agent::core::{ExpressionVector, Label};
use emotion_sensor_agent::detection::{
    DetectionError, DetectorConfig, FaceDetection, LocalInference, ObservationSource, Region,
    SimulatedExpressionModel,
};
use emotion_sensor_agent::session::{Session, SessionError, SessionState};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Source whose behaviour each test scripts.
struct MockSource {
    activation: Mutex<Result<(), DetectionError>>,
    label: Mutex<Label>,
    fail_with: Mutex<Option<DetectionError>>,
    latency: Duration,
    active: AtomicBool,
    activations: AtomicU64,
    releases: AtomicU64,
}

impl MockSource {
    fn new(label: Label) -> Arc<Self> {
        Self::with_latency(label, Duration::ZERO)
    }

    fn with_latency(label: Label, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            activation: Mutex::new(Ok(())),
            label: Mutex::new(label),
            fail_with: Mutex::new(None),
            latency,
            active: AtomicBool::new(false),
            activations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        })
    }

    fn failing_activation(err: DetectionError) -> Arc<Self> {
        let source = Self::new(Label::Happy);
        *source.activation.lock().unwrap() = Err(err);
        source
    }
}

#[async_trait]
impl ObservationSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn activate(&self) -> Result<(), DetectionError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        self.activation.lock().unwrap().clone()?;
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn readiness(&self) -> FrameState {
        if self.active.load(Ordering::SeqCst) {
            FrameState::Ready
        } else {
            FrameState::Ended
        }
    }

    async fn sample(&self, _config: DetectorConfig) -> Result<Vec<FaceDetection>, DetectionError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        let label = *self.label.lock().unwrap();
        Ok(vec![FaceDetection {
            region: Region::new(0, 0, 100, 100),
            expressions: ExpressionVector::from_pairs([(label, 0.9), (Label::Neutral, 0.1)]),
            confidence: 0.95,
        }])
    }

    async fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn fast_config() -> Config {
    Config {
        throttle_interval: Duration::ZERO,
        ..Config::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_lifecycle() {
    let source = MockSource::new(Label::Happy);
    let session = Session::new(fast_config(), source.clone());

    let session_id = session.start().await.unwrap();
    assert!(matches!(session.state(), SessionState::Active { .. }));
    assert_eq!(session.session_id(), Some(session_id));

    tokio::time::sleep(Duration::from_millis(550)).await;

    let snapshot = session.get_snapshot().await;
    assert!(snapshot.total_frames >= 5);
    assert_eq!(snapshot.distribution.get(&Label::Happy), Some(&1.0));
    assert_eq!(
        session.get_current_observation().await.map(|o| o.emotion),
        Some(Label::Happy)
    );

    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(source.releases.load(Ordering::SeqCst), 1);

    // History survives stop until the next start or reset.
    assert!(!session.get_snapshot().await.is_empty());
    session.reset().await;
    assert!(session.get_snapshot().await.is_empty());
    assert!(session.get_current_observation().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected() {
    let source = MockSource::new(Label::Sad);
    let session = Session::new(fast_config(), source.clone());

    session.start().await.unwrap();
    assert_eq!(session.start().await, Err(SessionError::AlreadyActive));
    assert_eq!(source.activations.load(Ordering::SeqCst), 1);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_restart_begins_with_empty_history() {
    let source = MockSource::new(Label::Happy);
    let session = Session::new(fast_config(), source.clone());

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    session.stop().await.unwrap();

    *source.label.lock().unwrap() = Label::Surprise;
    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let snapshot = session.get_snapshot().await;
    assert!(snapshot.total_frames > 0);
    assert_eq!(snapshot.distribution.keys().collect::<Vec<_>>(), vec![&Label::Surprise]);

    session.stop().await.unwrap();
    assert_eq!(source.releases.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_restart_keeps_previous_history() {
    let source = MockSource::new(Label::Happy);
    let session = Session::new(fast_config(), source.clone());

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    session.stop().await.unwrap();
    let before = session.get_snapshot().await;
    assert!(!before.is_empty());

    *source.activation.lock().unwrap() =
        Err(DetectionError::PermissionDenied("revoked".into()));
    assert!(session.start().await.is_err());

    assert_eq!(session.get_snapshot().await.total_frames, before.total_frames);
    assert_eq!(
        session.get_current_observation().await.map(|o| o.emotion),
        Some(Label::Happy)
    );
}

#[tokio::test(start_paused = true)]
async fn test_throttle_caps_observation_rate() {
    let source = MockSource::new(Label::Happy);
    let session = Session::new(Config::default(), source);
    let observations = session.observations();

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1050)).await;
    session.stop().await.unwrap();

    // 100 ms sampling, 500 ms throttle: accepted at 0, 500 and 1000 ms.
    let received: Vec<_> = observations.try_iter().collect();
    assert_eq!(received.len(), 3);
    assert_eq!(session.get_snapshot().await.total_frames, 3);
    assert!(session.stats().observations_throttled >= 7);
}

#[tokio::test(start_paused = true)]
async fn test_stop_discards_pending_detection() {
    let source = MockSource::with_latency(Label::Angry, Duration::from_millis(300));
    let session = Session::new(fast_config(), source.clone());

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop().await.unwrap();

    // Give an orphaned detection every chance to land.
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(session.get_snapshot().await.is_empty());
    assert!(session.get_current_observation().await.is_none());
    assert_eq!(source.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_start() {
    let source =
        MockSource::failing_activation(DetectionError::PermissionDenied("refused".into()));
    let session = Session::new(fast_config(), source.clone());

    assert!(matches!(
        session.start().await,
        Err(SessionError::PermissionDenied(_))
    ));
    assert!(matches!(session.state(), SessionState::PermissionDenied(_)));
    assert!(!session.is_active());
    assert_eq!(source.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_model_cannot_start() {
    let source =
        MockSource::failing_activation(DetectionError::ModelUnavailable("no weights".into()));
    let session = Session::new(fast_config(), source);

    assert!(matches!(
        session.start().await,
        Err(SessionError::CannotStart(_))
    ));
    assert!(matches!(session.state(), SessionState::CannotStart(_)));
}

#[tokio::test(start_paused = true)]
async fn test_connectivity_loss_disconnects_session() {
    let source = MockSource::new(Label::Happy);
    let session = Session::new(fast_config(), source.clone());
    let mut state = session.subscribe_state();

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    *source.fail_with.lock().unwrap() =
        Some(DetectionError::Connectivity("connection reset".into()));

    tokio::time::timeout(
        Duration::from_secs(1),
        state.wait_for(|s| matches!(s, SessionState::Disconnected(_))),
    )
    .await
    .expect("session should disconnect")
    .unwrap();

    assert!(!session.is_active());
    assert_eq!(source.releases.load(Ordering::SeqCst), 1);

    // The session can be started again once the service is back.
    *source.fail_with.lock().unwrap() = None;
    session.start().await.unwrap();
    assert!(session.is_active());
    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_per_tick_failures_do_not_end_session() {
    let source = MockSource::new(Label::Happy);
    *source.fail_with.lock().unwrap() = Some(DetectionError::Inference("bad frame".into()));
    let session = Session::new(fast_config(), source.clone());

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(session.is_active());
    assert!(session.stats().detection_failures >= 3);

    *source.fail_with.lock().unwrap() = None;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!session.get_snapshot().await.is_empty());

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_local_inference_end_to_end() {
    let camera = Arc::new(SyntheticCamera::with_access(
        CameraConfig {
            device_index: 0,
            width: 64,
            height: 48,
            fps: 60,
        },
        CameraAccess::Granted,
    ));
    let source = Arc::new(LocalInference::new(
        camera.clone(),
        Arc::new(SimulatedExpressionModel::new()),
    ));
    let session = Session::new(fast_config(), source);

    session.start().await.unwrap();

    let mut waited = 0;
    while session.get_snapshot().await.is_empty() && waited < 100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }
    assert!(!session.get_snapshot().await.is_empty());

    session.stop().await.unwrap();
    assert_eq!(camera.state(), FrameState::Ended);
}

#[tokio::test]
async fn test_denied_camera_reports_permission_state() {
    let camera = Arc::new(SyntheticCamera::with_access(
        CameraConfig::default(),
        CameraAccess::Denied,
    ));
    let source = Arc::new(LocalInference::new(
        camera,
        Arc::new(SimulatedExpressionModel::new()),
    ));
    let session = Session::new(fast_config(), source);

    assert!(session.start().await.is_err());
    assert!(matches!(session.state(), SessionState::PermissionDenied(_)));
}

/// Detection service that attaches normally but never answers a poll.
async fn stalling_service() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                if buf[..n].starts_with(b"GET /current_emotion") {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    return;
                }
                let body = r#"{"message":"ok"}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_slow_remote_service_does_not_end_session() {
    let addr = stalling_service().await;
    let mut config = fast_config();
    config.detection.mode = DetectionMode::Remote;
    config.detection.remote_url = format!("http://{addr}");
    config.detection.request_timeout = Duration::from_millis(150);
    let session = Session::from_config(config).unwrap();

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;

    assert!(session.is_active());
    assert!(matches!(session.state(), SessionState::Active { .. }));
    assert!(session.stats().detection_failures >= 2);
    assert!(session.get_snapshot().await.is_empty());

    session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
}
