//! Pluggable anomaly scoring.
//!
//! The scorer is a capability behind a trait object: any backend satisfying
//! the score contract can be swapped in without touching the decision
//! synthesizer. When no scorer is installed, or a scorer fails, the pipeline
//! degrades to rules-only operation via `ScoreOutput::degraded()`.

use serde::{Deserialize, Serialize};

use crate::detection::errors::Result;
use crate::detection::features::EventFeatures;

/// Scorer output: continuous anomaly score plus an explainability breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutput {
    /// Anomaly score in [0, 1]; higher is more suspicious.
    pub score: f64,
    /// Per-feature contributions, ordered by descending absolute weight.
    pub contributions: Vec<(String, f64)>,
}

impl ScoreOutput {
    /// Rules-only fallback used when the scorer is unavailable.
    pub fn degraded() -> Self {
        Self {
            score: 0.0,
            contributions: Vec::new(),
        }
    }
}

/// Anomaly scorer contract. Implementations must be pure with respect to the
/// feature vector and must keep scores inside [0, 1].
pub trait AnomalyScorer: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, features: &EventFeatures) -> Result<ScoreOutput>;
}

/// Per-feature weights for the built-in statistical scorer. Positive weights
/// push toward anomalous, negative toward benign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureWeights {
    pub is_clipboard_copy: f64,
    pub is_screenshot: f64,
    pub is_file_transfer: f64,
    pub clipboard_mb: f64,
    pub file_transfer_mb: f64,
    pub time_of_day: f64,
    pub clipboard_count_window: f64,
    pub screenshot_count_window: f64,
    pub file_transfer_count_window: f64,
    pub clipboard_volume_mb_window: f64,
    pub file_transfer_volume_mb_window: f64,
    pub mean_interarrival: f64,
    /// Intercept; strongly negative so quiet sessions score near zero.
    pub bias: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            is_clipboard_copy: 0.2,
            is_screenshot: 0.1,
            is_file_transfer: 0.3,
            clipboard_mb: 2.0,
            file_transfer_mb: 0.04,
            time_of_day: 0.0,
            clipboard_count_window: 1.0,
            screenshot_count_window: 2.0,
            file_transfer_count_window: 2.5,
            clipboard_volume_mb_window: 0.8,
            file_transfer_volume_mb_window: 0.02,
            mean_interarrival: -1.5,
            bias: -3.0,
        }
    }
}

/// Lightweight weighted-sum scorer: logistic of `w · x + bias`.
///
/// The same shape the production classifier reduces to at inference time,
/// which keeps the feature contract testable without a model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedScorer {
    weights: FeatureWeights,
}

impl WeightedScorer {
    pub fn new(weights: FeatureWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &FeatureWeights {
        &self.weights
    }

    fn contributions(&self, features: &EventFeatures) -> Vec<(String, f64)> {
        let values = features.to_vector();
        let weights = [
            self.weights.is_clipboard_copy,
            self.weights.is_screenshot,
            self.weights.is_file_transfer,
            self.weights.clipboard_mb,
            self.weights.file_transfer_mb,
            self.weights.time_of_day,
            self.weights.clipboard_count_window,
            self.weights.screenshot_count_window,
            self.weights.file_transfer_count_window,
            self.weights.clipboard_volume_mb_window,
            self.weights.file_transfer_volume_mb_window,
            self.weights.mean_interarrival,
        ];
        let mut contributions: Vec<(String, f64)> = EventFeatures::FEATURE_NAMES
            .iter()
            .zip(values.iter().zip(weights.iter()))
            .map(|(name, (value, weight))| ((*name).to_string(), value * weight))
            .collect();
        contributions.sort_by(|a, b| {
            b.1.abs()
                .partial_cmp(&a.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        contributions
    }
}

impl Default for WeightedScorer {
    fn default() -> Self {
        Self::new(FeatureWeights::default())
    }
}

impl AnomalyScorer for WeightedScorer {
    fn name(&self) -> &str {
        "weighted-logistic"
    }

    fn score(&self, features: &EventFeatures) -> Result<ScoreOutput> {
        let contributions = self.contributions(features);
        let raw: f64 = contributions.iter().map(|(_, c)| c).sum::<f64>() + self.weights.bias;
        let score = sigmoid(raw).clamp(0.0, 1.0);
        Ok(ScoreOutput {
            score,
            contributions,
        })
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
