//! Text channel: emotion analysis of free text.
//!
//! Each call is independent of the camera session. Results only reach the
//! rolling history when the channel is built with
//! [`TextChannel::with_timeline`].

use crate::core::aggregator::SharedAggregator;
use crate::core::emotion::{ExpressionVector, Label};
use crate::core::reducer::reduce;
use crate::detection::{DetectionError, RemoteClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of analysing one piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTextAnalysis")]
pub struct TextAnalysis {
    pub emotion: Label,
    pub score: f64,
    pub breakdown: BTreeMap<Label, f64>,
    /// Set when the analyzer answered with a fallback instead of a real result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Wire form: labels as free strings, plus the `error` field some services
/// attach to fallback answers.
#[derive(Deserialize)]
struct RawTextAnalysis {
    emotion: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    breakdown: BTreeMap<String, f64>,
    #[serde(default, alias = "error")]
    note: Option<String>,
}

impl From<RawTextAnalysis> for TextAnalysis {
    fn from(raw: RawTextAnalysis) -> Self {
        // Labels outside the closed set ("Excitement", ...) are dropped.
        let breakdown = raw
            .breakdown
            .into_iter()
            .filter_map(|(name, score)| {
                let label = name.parse::<Label>().ok().filter(|l| l.is_known())?;
                Some((label, score.clamp(0.0, 1.0)))
            })
            .collect();

        Self {
            emotion: raw.emotion.parse().unwrap_or(Label::Unknown),
            score: raw.score.clamp(0.0, 1.0),
            breakdown,
            note: raw.note,
        }
    }
}

/// Text channel errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    #[error("text is empty")]
    EmptyInput,
    #[error("text analysis service failed: {0}")]
    Service(String),
    #[error("invalid analysis response: {0}")]
    InvalidResponse(String),
}

impl From<DetectionError> for TextError {
    fn from(err: DetectionError) -> Self {
        TextError::Service(err.to_string())
    }
}

/// Something that can score the emotion of a piece of text.
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<TextAnalysis, TextError>;
}

/// Keywords per label for [`LexiconTextAnalyzer`].
const LEXICON: &[(Label, &[&str])] = &[
    (
        Label::Angry,
        &["angry", "furious", "mad", "hate", "annoyed", "rage", "irritated", "outraged"],
    ),
    (Label::Disgust, &["disgusting", "gross", "revolting", "nasty", "sickening"]),
    (
        Label::Fear,
        &["afraid", "scared", "terrified", "anxious", "worried", "nervous", "panic"],
    ),
    (
        Label::Happy,
        &["happy", "glad", "great", "love", "wonderful", "joy", "excited", "awesome", "good"],
    ),
    (Label::Neutral, &["okay", "fine", "normal", "usual"]),
    (
        Label::Sad,
        &["sad", "unhappy", "depressed", "miserable", "lonely", "cry", "crying", "lost"],
    ),
    (
        Label::Surprise,
        &["surprised", "wow", "unexpected", "shocked", "amazed", "suddenly"],
    ),
];

/// In-process keyword analyzer.
///
/// Scores each label by its share of matched keywords. Text with no matching
/// keyword gets the neutral fallback.
#[derive(Debug, Default, Clone)]
pub struct LexiconTextAnalyzer;

impl LexiconTextAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn fallback() -> TextAnalysis {
        TextAnalysis {
            emotion: Label::Neutral,
            score: 0.5,
            breakdown: BTreeMap::from([(Label::Neutral, 0.5), (Label::Happy, 0.3)]),
            note: Some("no emotional keywords found".to_string()),
        }
    }

    fn score(text: &str) -> TextAnalysis {
        let mut counts: BTreeMap<Label, usize> = BTreeMap::new();
        let words = text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase);

        for word in words {
            for (label, keywords) in LEXICON {
                if keywords.contains(&word.as_str()) {
                    *counts.entry(*label).or_insert(0) += 1;
                }
            }
        }

        let total: usize = counts.values().sum();
        if total == 0 {
            return Self::fallback();
        }

        let vector = ExpressionVector::from_pairs(
            counts
                .iter()
                .map(|(label, count)| (*label, *count as f64 / total as f64)),
        );
        let Some((emotion, score)) = reduce(&vector) else {
            return Self::fallback();
        };

        TextAnalysis {
            emotion,
            score,
            breakdown: vector.iter().collect(),
            note: None,
        }
    }
}

#[async_trait]
impl TextAnalyzer for LexiconTextAnalyzer {
    async fn analyze(&self, text: &str) -> Result<TextAnalysis, TextError> {
        Ok(Self::score(text))
    }
}

/// Analyzer that defers to a remote service's `POST /analyze_text`.
pub struct RemoteTextAnalyzer {
    client: RemoteClient,
}

impl RemoteTextAnalyzer {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextAnalyzer for RemoteTextAnalyzer {
    async fn analyze(&self, text: &str) -> Result<TextAnalysis, TextError> {
        let value = self.client.analyze_text(text).await?;
        serde_json::from_value(value).map_err(|e| TextError::InvalidResponse(e.to_string()))
    }
}

/// Entry point for text analysis, optionally feeding the rolling history.
pub struct TextChannel {
    analyzer: Box<dyn TextAnalyzer>,
    timeline: Option<SharedAggregator>,
}

impl TextChannel {
    pub fn new(analyzer: Box<dyn TextAnalyzer>) -> Self {
        Self {
            analyzer,
            timeline: None,
        }
    }

    /// Also ingest every known result label into `aggregator`.
    pub fn with_timeline(mut self, aggregator: SharedAggregator) -> Self {
        self.timeline = Some(aggregator);
        self
    }

    pub fn feeds_timeline(&self) -> bool {
        self.timeline.is_some()
    }

    pub async fn analyze(&self, text: &str) -> Result<TextAnalysis, TextError> {
        if text.trim().is_empty() {
            return Err(TextError::EmptyInput);
        }

        let analysis = self.analyzer.analyze(text).await?;
        tracing::debug!(emotion = %analysis.emotion, score = analysis.score, "text analysed");

        if let Some(aggregator) = &self.timeline {
            if analysis.emotion.is_known() && analysis.note.is_none() {
                aggregator.write().await.ingest(analysis.emotion);
            }
        }
        Ok(analysis)
    }
}
