//! Emotion labels, expression score vectors, and observations.
//!
//! These are the values that flow from the detection capability through the
//! reducer and throttle into the rolling aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A facial expression class.
///
/// Declaration order is the canonical order: it drives map iteration and the
/// tie-break when two expressions share the maximum score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    Angry,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
    Surprise,
    /// No face, or no detection this cycle. Never aggregated.
    Unknown,
}

impl Label {
    /// Every label a model can actually report.
    pub const ALL: [Label; 7] = [
        Label::Angry,
        Label::Disgust,
        Label::Fear,
        Label::Happy,
        Label::Neutral,
        Label::Sad,
        Label::Surprise,
    ];

    /// False only for the `Unknown` sentinel.
    pub fn is_known(self) -> bool {
        self != Label::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Angry => "Angry",
            Label::Disgust => "Disgust",
            Label::Fear => "Fear",
            Label::Happy => "Happy",
            Label::Neutral => "Neutral",
            Label::Sad => "Sad",
            Label::Surprise => "Surprise",
            Label::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a recognised expression label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised emotion label: {0}")]
pub struct ParseLabelError(pub String);

impl FromStr for Label {
    type Err = ParseLabelError;

    /// Case-insensitive; accepts the spellings used by common expression
    /// models (`surprised`, `fearful`, `disgusted`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = match s.trim().to_lowercase().as_str() {
            "angry" | "anger" => Label::Angry,
            "disgust" | "disgusted" => Label::Disgust,
            "fear" | "fearful" | "scared" => Label::Fear,
            "happy" | "happiness" | "joy" => Label::Happy,
            "neutral" => Label::Neutral,
            "sad" | "sadness" => Label::Sad,
            "surprise" | "surprised" => Label::Surprise,
            "unknown" => Label::Unknown,
            _ => return Err(ParseLabelError(s.to_string())),
        };
        Ok(label)
    }
}

/// Per-expression scores for one detected face.
///
/// Scores are clamped to `[0, 1]` and need not sum to one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpressionVector(BTreeMap<Label, f64>);

impl ExpressionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vector from `(label, score)` pairs. Later pairs overwrite earlier ones.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Label, f64)>,
    {
        let mut vector = Self::new();
        for (label, score) in pairs {
            vector.insert(label, score);
        }
        vector
    }

    /// Set the score for a label. Non-finite scores are ignored.
    pub fn insert(&mut self, label: Label, score: f64) {
        if score.is_finite() {
            self.0.insert(label, score.clamp(0.0, 1.0));
        }
    }

    pub fn get(&self, label: Label) -> Option<f64> {
        self.0.get(&label).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate in canonical label order.
    pub fn iter(&self) -> impl Iterator<Item = (Label, f64)> + '_ {
        self.0.iter().map(|(label, score)| (*label, *score))
    }
}

/// One accepted `(label, score)` pair, after throttling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub emotion: Label,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    /// Create an observation stamped with the current wall-clock time.
    pub fn new(emotion: Label, score: f64) -> Self {
        Self {
            emotion,
            score,
            timestamp: Utc::now(),
        }
    }
}
