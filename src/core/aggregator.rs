//! Rolling window analytics over accepted observations.
//!
//! Observations are kept in a fixed-capacity FIFO of labels. The distribution
//! is recomputed from that buffer on every snapshot, so there are no running
//! counters to drift.

use crate::core::emotion::Label;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default number of labels retained.
pub const DEFAULT_CAPACITY: usize = 50;

/// Default length of the `recent` slice in a snapshot.
pub const DEFAULT_RECENT_LEN: usize = 20;

/// Derived, read-only summary of the history at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionSnapshot {
    /// Fraction of the history occupied by each observed label
    pub distribution: BTreeMap<Label, f64>,
    /// Most recent labels, oldest first
    pub recent: Vec<Label>,
    /// Number of labels currently in the history
    pub total_frames: usize,
}

impl DistributionSnapshot {
    /// True when no observations have been ingested this session.
    pub fn is_empty(&self) -> bool {
        self.total_frames == 0
    }

    /// The most frequent label, earliest in canonical order on ties.
    pub fn dominant(&self) -> Option<(Label, f64)> {
        let mut best: Option<(Label, f64)> = None;
        for (label, fraction) in &self.distribution {
            match best {
                Some((_, f)) if *fraction <= f => {}
                _ => best = Some((*label, *fraction)),
            }
        }
        best
    }
}

/// Fixed-capacity label history with on-demand distribution.
#[derive(Debug, Clone)]
pub struct RollingAggregator {
    history: VecDeque<Label>,
    capacity: usize,
    recent_len: usize,
}

impl RollingAggregator {
    /// Create an aggregator. A zero capacity or recent length is raised to one.
    pub fn new(capacity: usize, recent_len: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            recent_len: recent_len.max(1),
        }
    }

    /// Append a label, evicting the oldest once the buffer is full.
    ///
    /// Returns `false` (and records nothing) for [`Label::Unknown`].
    pub fn ingest(&mut self, label: Label) -> bool {
        if !label.is_known() {
            return false;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(label);
        true
    }

    /// Compute the distribution, recent slice and total from the buffer.
    pub fn snapshot(&self) -> DistributionSnapshot {
        let total = self.history.len();
        if total == 0 {
            return DistributionSnapshot::default();
        }

        let mut counts: BTreeMap<Label, usize> = BTreeMap::new();
        for label in &self.history {
            *counts.entry(*label).or_insert(0) += 1;
        }

        let distribution = counts
            .into_iter()
            .map(|(label, count)| (label, count as f64 / total as f64))
            .collect();

        let skip = total.saturating_sub(self.recent_len);
        let recent = self.history.iter().skip(skip).copied().collect();

        DistributionSnapshot {
            distribution,
            recent,
            total_frames: total,
        }
    }

    /// Drop all history (session reset).
    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The retained labels, oldest first.
    pub fn history(&self) -> impl Iterator<Item = Label> + '_ {
        self.history.iter().copied()
    }
}

impl Default for RollingAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_RECENT_LEN)
    }
}

/// Owned handle to an aggregator, passed explicitly to whoever needs it.
pub type SharedAggregator = Arc<RwLock<RollingAggregator>>;

/// Create a new shared aggregator.
pub fn create_shared_aggregator(capacity: usize, recent_len: usize) -> SharedAggregator {
    Arc::new(RwLock::new(RollingAggregator::new(capacity, recent_len)))
}
