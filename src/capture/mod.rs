//! Video capture for the Emotion Sensor Agent.
//!
//! A [`FrameSource`] is the live video feed the sampling loop reads from. The
//! loop owns its source for the whole session and releases it on every exit
//! path.

pub mod synthetic;
pub mod types;

use std::time::{Duration, Instant};

// Re-export commonly used types
pub use synthetic::{CameraAccess, SyntheticCamera};
pub use types::{Frame, FrameState};

/// Errors that can occur while opening or reading a video source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera found at index {0}")]
    DeviceMissing(u32),
    #[error("camera is already open")]
    AlreadyOpen,
    #[error("no frame received within {0:?}")]
    NoFrame(Duration),
}

/// A live source of video frames.
///
/// Methods take `&self`; implementations keep their own interior state so a
/// source can be shared with the task that samples it.
pub trait FrameSource: Send + Sync {
    /// Acquire the hardware and start producing frames.
    fn open(&self) -> Result<(), CaptureError>;

    fn state(&self) -> FrameState;

    /// A copy of the most recent frame, if any.
    fn latest_frame(&self) -> Option<Frame>;

    fn pause(&self);

    fn resume(&self);

    /// Stop producing frames and free the hardware. Safe to call repeatedly.
    fn release(&self);
}

/// Open a source, wait for one frame, and release it again.
///
/// Blocking; run it off the async runtime.
pub fn probe_camera(source: &dyn FrameSource, timeout: Duration) -> Result<Frame, CaptureError> {
    source.open()?;

    let deadline = Instant::now() + timeout;
    let result = loop {
        if let Some(frame) = source.latest_frame() {
            break Ok(frame);
        }
        if Instant::now() >= deadline {
            break Err(CaptureError::NoFrame(timeout));
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    source.release();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraConfig;

    #[test]
    fn test_probe_camera_reads_a_frame() {
        let camera = SyntheticCamera::new(CameraConfig {
            device_index: 0,
            width: 8,
            height: 8,
            fps: 100,
        });

        let frame = probe_camera(&camera, Duration::from_secs(2)).unwrap();
        assert_eq!(frame.pixels.len(), 64);
        assert_eq!(camera.state(), FrameState::Ended);
    }

    #[test]
    fn test_probe_camera_denied() {
        let camera = SyntheticCamera::with_access(CameraConfig::default(), CameraAccess::Denied);
        assert_eq!(
            probe_camera(&camera, Duration::from_millis(50)).unwrap_err(),
            CaptureError::PermissionDenied
        );
    }
}
