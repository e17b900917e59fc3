//! Core functionality for the Emotion Sensor Agent.
//!
//! This module contains:
//! - The emotion vocabulary and observation types
//! - Reduction of per-face expression scores to a single label
//! - The observation throttle
//! - The rolling aggregator behind the distribution snapshot
//! - The frame sampling loop that ties them together

pub mod aggregator;
pub mod emotion;
pub mod reducer;
pub mod sampling;
pub mod throttle;

// Re-export commonly used types
pub use aggregator::{
    create_shared_aggregator, DistributionSnapshot, RollingAggregator, SharedAggregator,
};
pub use emotion::{ExpressionVector, Label, Observation};
pub use reducer::{reduce, reduce_faces};
pub use sampling::{EpochGuard, FacePresence, LoopExit, SamplingLoop, SharedObservation};
pub use throttle::Throttle;
