//! HTTP detection service.
//!
//! This module provides the out-of-process side of remote-polling mode: a
//! server that owns the camera, runs a local-inference session, and exposes
//! its latest classification over HTTP.
//!
//! # Architecture
//!
//! ```text
//! client agent ──→ GET /current_emotion ──→ detection service ──→ camera
//!                                                 ↓
//!                                       [Sampling + Aggregation]
//! ```
//!
//! A single session is shared by every client. `POST /stop_camera` ends it for
//! all of them.

use crate::config::{Config, DetectionMode};
use crate::core::aggregator::DistributionSnapshot;
use crate::core::emotion::Label;
use crate::detection::remote::{
    CurrentEmotionResponse, ServiceError, TextRequest, CODE_CAPABILITY_UNAVAILABLE,
    CODE_PERMISSION_DENIED,
};
use crate::session::{Session, SessionError, SessionState};
use crate::text::{LexiconTextAnalyzer, TextAnalysis, TextChannel, TextError};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Agent configuration for the session the server runs
    pub agent: Config,
}

impl ServerConfig {
    /// Create a new server configuration.
    ///
    /// The served session always runs in local-inference mode: the server is
    /// the side that owns the camera.
    pub fn new(port: u16, mut agent: Config) -> Self {
        agent.detection.mode = DetectionMode::Local;
        Self { port, agent }
    }
}

/// Shared server state
pub struct ServerState {
    session: Arc<Session>,
    text: TextChannel,
}

impl ServerState {
    /// Create server state around an existing session.
    pub fn new(session: Arc<Session>) -> Self {
        let mut text = TextChannel::new(Box::new(LexiconTextAnalyzer::new()));
        if session.config().feed_text_into_timeline {
            text = text.with_timeline(session.aggregator());
        }
        Self { session, text }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub session: SessionState,
}

/// Response from the camera control endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

type ApiError = (StatusCode, Json<ServiceError>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ServiceError {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session: state.session.state(),
    })
}

/// POST /start_camera
///
/// Starts the shared session. Starting while a session is running succeeds and
/// returns the running session's id.
async fn start_camera(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ControlResponse>, ApiError> {
    match state.session.start().await {
        Ok(session_id) => Ok(Json(ControlResponse {
            message: "Camera session started".to_string(),
            session_id: Some(session_id),
        })),
        Err(SessionError::AlreadyActive) => Ok(Json(ControlResponse {
            message: "Camera session already running".to_string(),
            session_id: state.session.session_id(),
        })),
        Err(SessionError::PermissionDenied(msg)) => {
            Err(api_error(StatusCode::FORBIDDEN, CODE_PERMISSION_DENIED, msg))
        }
        Err(e) => Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            CODE_CAPABILITY_UNAVAILABLE,
            e.to_string(),
        )),
    }
}

/// POST /stop_camera
async fn stop_camera(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ControlResponse>, ApiError> {
    state.session.stop().await.map_err(|e| {
        tracing::error!("Failed to stop session: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "STOP_FAILED", e.to_string())
    })?;

    Ok(Json(ControlResponse {
        message: "Camera session ended".to_string(),
        session_id: None,
    }))
}

/// GET /current_emotion
async fn current_emotion(State(state): State<Arc<ServerState>>) -> Json<CurrentEmotionResponse> {
    // A face that left the frame must not keep feeding remote timelines.
    let response = match state.session.get_current_observation().await {
        Some(observation) if state.session.face_present() => CurrentEmotionResponse {
            emotion: observation.emotion.to_string(),
            score: observation.score,
            face_detected: Some(true),
            expressions: None,
            region: None,
        },
        _ => CurrentEmotionResponse {
            emotion: Label::Unknown.to_string(),
            score: 0.0,
            face_detected: Some(false),
            expressions: None,
            region: None,
        },
    };
    Json(response)
}

/// GET /analytics
async fn analytics(State(state): State<Arc<ServerState>>) -> Json<DistributionSnapshot> {
    Json(state.session.get_snapshot().await)
}

/// POST /analyze_text
async fn analyze_text(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<TextRequest>,
) -> Result<Json<TextAnalysis>, ApiError> {
    match state.text.analyze(&request.text).await {
        Ok(analysis) => Ok(Json(analysis)),
        Err(TextError::EmptyInput) => Err(api_error(
            StatusCode::BAD_REQUEST,
            "EMPTY_INPUT",
            "Text must not be empty",
        )),
        Err(e) => Err(api_error(
            StatusCode::BAD_GATEWAY,
            "TEXT_ANALYSIS_FAILED",
            e.to_string(),
        )),
    }
}

/// Build the router over the given state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/start_camera", post(start_camera))
        .route("/stop_camera", post(stop_camera))
        .route("/current_emotion", get(current_emotion))
        .route("/analytics", get(analytics))
        .route("/analyze_text", post(analyze_text))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server with a fresh local-inference session.
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let session = Arc::new(Session::from_config(config.agent.clone())?);
    serve(config.port, session).await
}

/// Run the HTTP server around an existing session.
///
/// The session is stopped when the server shuts down.
pub async fn serve(
    port: u16,
    session: Arc<Session>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(session.clone()));
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Detection service listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
        if let Err(e) = session.stop().await {
            tracing::warn!("Failed to stop session on shutdown: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
