//! Transparency module for the Emotion Sensor Agent.
//!
//! This module tracks what the sampling loop processed during a session,
//! so users can see how often the camera was sampled and what was kept.

pub mod log;

// Re-export commonly used types
pub use log::{create_shared_log, SharedTransparencyLog, TransparencyLog, TransparencyStats};
