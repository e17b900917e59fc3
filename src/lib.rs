//! Emotion Sensor Agent - real-time facial expression sensing with a rolling
//! emotion distribution.
//!
//! This library samples a live video source, classifies the dominant facial
//! expression on each frame, throttles the resulting observations, and keeps a
//! bounded history from which an emotion distribution can be read at any time.
//!
//! # Privacy Guarantees
//!
//! - **No frames stored**: Video frames are read, classified, and dropped
//! - **Labels only**: The history keeps expression labels, never images or face boxes
//! - **Bounded**: At most the last 50 labels (configurable) are kept
//! - **Session-scoped**: Everything is discarded when the session is reset
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Emotion Sensor Agent                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Detection  │──▶│  Sampling   │──▶│  Reducer +  │       │
//! │  │local/remote │   │  (100 ms)   │   │  Throttle   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                                    │              │
//! │         ▼                                    ▼              │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │Transparency │                     │   Rolling   │       │
//! │  │    Log      │                     │ Aggregator  │       │
//! │  └─────────────┘                     └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use emotion_sensor_agent::{Config, Session};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let session = Session::from_config(Config::default())?;
//! session.start().await?;
//!
//! // Observations arrive on session.observations(); the distribution is
//! // available at any time.
//! let snapshot = session.get_snapshot().await;
//! println!("{} frames", snapshot.total_frames);
//!
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod core;
pub mod detection;
pub mod session;
pub mod text;
pub mod transparency;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use capture::{probe_camera, CaptureError, Frame, FrameSource, FrameState, SyntheticCamera};
pub use config::{Config, DetectionMode};
pub use core::{
    DistributionSnapshot, ExpressionVector, Label, Observation, RollingAggregator, Throttle,
};
pub use detection::{build_source, DetectionError, FaceDetection, ObservationSource};
pub use session::{Session, SessionError, SessionState};
pub use text::{LexiconTextAnalyzer, RemoteTextAnalyzer, TextAnalysis, TextChannel, TextError};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║           EMOTION SENSOR AGENT - PRIVACY DECLARATION             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent estimates facial expressions from your camera.       ║
║                                                                  ║
║  ✓ WHAT WE KEEP:                                                 ║
║    • The dominant expression label per observation               ║
║    • At most the last 50 labels of the current session           ║
║    • Counts of how often the camera was sampled                  ║
║                                                                  ║
║  ✗ WHAT WE NEVER KEEP:                                           ║
║    • Video frames or images of your face                         ║
║    • Face positions or bounding boxes                            ║
║    • Anything after the session is reset                         ║
║                                                                  ║
║  The camera is released as soon as detection is stopped.         ║
║  Nothing is written to disk except your configuration.           ║
║                                                                  ║
║  You can see what was processed at the end of every session:     ║
║    emotion-sensor start                                          ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
