//! In-process synthetic camera.
//!
//! A background thread produces frames at the configured rate and keeps only
//! the latest one, the same way a hardware capture thread avoids buffer lag.
//! Used for local-inference sessions on hosts without a physical camera and for
//! exercising the permission and missing-device start failures.

use crate::capture::types::{Frame, FrameState};
use crate::capture::{CaptureError, FrameSource};
use crate::config::CameraConfig;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Luma written to every pixel while the lens is covered.
const COVERED_LUMA: u8 = 2;

/// Outcome the synthetic camera reports when opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraAccess {
    #[default]
    Granted,
    /// The user refused camera permission
    Denied,
    /// No device at the configured index
    Missing,
}

/// A camera that renders a moving test pattern.
pub struct SyntheticCamera {
    config: CameraConfig,
    access: CameraAccess,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    covered: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    latest: Arc<Mutex<Option<Frame>>>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self::with_access(config, CameraAccess::Granted)
    }

    pub fn with_access(config: CameraConfig, access: CameraAccess) -> Self {
        Self {
            config,
            access,
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            covered: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
            latest: Arc::new(Mutex::new(None)),
            thread_handle: Mutex::new(None),
        }
    }

    /// Simulate covering the lens: subsequent frames are nearly black.
    pub fn set_covered(&self, covered: bool) {
        self.covered.store(covered, Ordering::SeqCst);
    }

    /// Number of frames produced since the last open.
    pub fn frames_produced(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl FrameSource for SyntheticCamera {
    fn open(&self) -> Result<(), CaptureError> {
        match self.access {
            CameraAccess::Denied => return Err(CaptureError::PermissionDenied),
            CameraAccess::Missing => {
                return Err(CaptureError::DeviceMissing(self.config.device_index))
            }
            CameraAccess::Granted => {}
        }

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyOpen);
        }

        self.paused.store(false, Ordering::SeqCst);
        self.sequence.store(0, Ordering::SeqCst);
        *lock(&self.latest) = None;

        let running = self.running.clone();
        let paused = self.paused.clone();
        let covered = self.covered.clone();
        let sequence = self.sequence.clone();
        let latest = self.latest.clone();
        let (width, height) = (self.config.width, self.config.height);
        let period = Duration::from_secs_f64(1.0 / self.config.fps.max(1) as f64);

        let handle = thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                if !paused.load(Ordering::SeqCst) {
                    let seq = sequence.fetch_add(1, Ordering::SeqCst) + 1;
                    let frame = if covered.load(Ordering::SeqCst) {
                        Frame::uniform(seq, width, height, COVERED_LUMA)
                    } else {
                        render_pattern(seq, width, height)
                    };
                    *lock(&latest) = Some(frame);
                }
                thread::sleep(period);
            }
        });

        *lock(&self.thread_handle) = Some(handle);
        tracing::info!(
            device = self.config.device_index,
            width,
            height,
            fps = self.config.fps,
            "synthetic camera opened"
        );
        Ok(())
    }

    fn state(&self) -> FrameState {
        if !self.running.load(Ordering::SeqCst) {
            FrameState::Ended
        } else if self.paused.load(Ordering::SeqCst) {
            FrameState::Paused
        } else if lock(&self.latest).is_none() {
            FrameState::Warming
        } else {
            FrameState::Ready
        }
    }

    fn latest_frame(&self) -> Option<Frame> {
        lock(&self.latest).clone()
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn release(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.thread_handle).take() {
            // The thread exits on its next iteration.
            let _ = handle.join();
        }
        *lock(&self.latest) = None;
        if was_running {
            tracing::info!(device = self.config.device_index, "synthetic camera released");
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Diagonal gradient that drifts with the frame counter.
fn render_pattern(sequence: u64, width: u32, height: u32) -> Frame {
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height as u64 {
        for x in 0..width as u64 {
            pixels.push(((x + y + sequence) % 64 + 96) as u8);
        }
    }
    Frame::new(sequence, width, height, pixels)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
