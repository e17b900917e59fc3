//! Frame types for the video capture layer.
//!
//! Frames live only as long as one detection cycle needs them; nothing here is
//! ever written to disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single grayscale video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame counter, starting at 1 for each opened source
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// When the frame was captured
    pub captured_at: DateTime<Utc>,
    /// Row-major 8-bit luma, `width * height` bytes
    pub pixels: Vec<u8>,
}

impl Frame {
    pub fn new(sequence: u64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            sequence,
            width,
            height,
            captured_at: Utc::now(),
            pixels,
        }
    }

    /// A frame filled with a single luma value.
    pub fn uniform(sequence: u64, width: u32, height: u32, luma: u8) -> Self {
        let len = width as usize * height as usize;
        Self::new(sequence, width, height, vec![luma; len])
    }

    /// Average brightness in `[0, 255]`. Empty frames report zero.
    pub fn mean_luma(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|p| *p as u64).sum();
        sum as f64 / self.pixels.len() as f64
    }
}

/// Whether a source currently has a frame worth sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameState {
    /// Opened but no frame produced yet
    Warming,
    /// Producing frames
    Ready,
    /// Temporarily not producing frames
    Paused,
    /// Closed or released
    Ended,
}

impl FrameState {
    pub fn is_ready(self) -> bool {
        self == FrameState::Ready
    }
}
