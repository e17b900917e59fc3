//! Per-session processing log.
//!
//! Counts what the sampling loop did with each tick without keeping any
//! frame or face data. Nothing here is persisted: the log lives and dies with
//! the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Transparency statistics for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Sampling ticks fired
    ticks: AtomicU64,
    /// Ticks skipped because the video source had no frame
    ticks_not_ready: AtomicU64,
    /// Ticks skipped because a detection call was still pending
    ticks_busy: AtomicU64,
    /// Detection cycles that found no face
    no_face: AtomicU64,
    /// Detection cycles that failed
    detection_failures: AtomicU64,
    /// Observations forwarded to consumers
    observations_emitted: AtomicU64,
    /// Observations dropped by the throttle
    observations_throttled: AtomicU64,
    /// Session start time
    session_start: RwLock<DateTime<Utc>>,
}

impl TransparencyLog {
    /// Create a new transparency log.
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            ticks_not_ready: AtomicU64::new(0),
            ticks_busy: AtomicU64::new(0),
            no_face: AtomicU64::new(0),
            detection_failures: AtomicU64::new(0),
            observations_emitted: AtomicU64::new(0),
            observations_throttled: AtomicU64::new(0),
            session_start: RwLock::new(Utc::now()),
        }
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_ready(&self) {
        self.ticks_not_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy(&self) {
        self.ticks_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_face(&self) {
        self.no_face.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection_failure(&self) {
        self.detection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_observation(&self) {
        self.observations_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.observations_throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        let session_start = *self
            .session_start
            .read()
            .unwrap_or_else(|p| p.into_inner());
        TransparencyStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_not_ready: self.ticks_not_ready.load(Ordering::Relaxed),
            ticks_busy: self.ticks_busy.load(Ordering::Relaxed),
            no_face: self.no_face.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            observations_emitted: self.observations_emitted.load(Ordering::Relaxed),
            observations_throttled: self.observations_throttled.load(Ordering::Relaxed),
            session_start,
            session_duration_secs: (Utc::now() - session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Sampling ticks: {}\n\
             - Skipped (no frame): {}\n\
             - Skipped (detection pending): {}\n\
             - No face detected: {}\n\
             - Detection failures: {}\n\
             - Observations emitted: {}\n\
             - Observations throttled: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - No video frames stored\n\
             - Only expression labels kept, in a bounded window\n\
             - History discarded when the session ends",
            stats.ticks,
            stats.ticks_not_ready,
            stats.ticks_busy,
            stats.no_face,
            stats.detection_failures,
            stats.observations_emitted,
            stats.observations_throttled,
            stats.session_duration_secs
        )
    }

    /// Reset all counters and restart the session clock.
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.ticks_not_ready.store(0, Ordering::Relaxed);
        self.ticks_busy.store(0, Ordering::Relaxed);
        self.no_face.store(0, Ordering::Relaxed);
        self.detection_failures.store(0, Ordering::Relaxed);
        self.observations_emitted.store(0, Ordering::Relaxed);
        self.observations_throttled.store(0, Ordering::Relaxed);
        *self
            .session_start
            .write()
            .unwrap_or_else(|p| p.into_inner()) = Utc::now();
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub ticks: u64,
    pub ticks_not_ready: u64,
    pub ticks_busy: u64,
    pub no_face: u64,
    pub detection_failures: u64,
    pub observations_emitted: u64,
    pub observations_throttled: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}
