//! Detection configuration.
//!
//! Every tunable of the pipeline lives here: window bounds, rule thresholds
//! and the severity policy table. Defaults match the thresholds the rules were
//! tuned with in production.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::detection::errors::{DetectionError, Result};

/// Top-level detection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub history: HistoryConfig,
    pub rules: RulesConfig,
    pub features: FeatureConfig,
    pub severity: SeverityPolicy,
}

/// Session window bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Hard per-session cap on stored events; oldest dropped first.
    pub max_events_per_session: usize,
    /// Time bound: events older than this relative to the session's newest
    /// event are evicted. Must cover the largest rule/feature lookback.
    pub lookback_secs: u64,
    /// Sessions with no activity for this long are dropped entirely.
    pub idle_ttl_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_events_per_session: 256,
            lookback_secs: 60,
            idle_ttl_secs: 900,
        }
    }
}

/// Per-rule toggles and thresholds. Size thresholds are exclusive lower
/// bounds (`size > threshold`); count thresholds are inclusive (`>= count`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    pub clipboard_size: ClipboardSizeRuleConfig,
    pub screenshot_burst: ScreenshotBurstRuleConfig,
    pub file_transfer: FileTransferRuleConfig,
}

/// R1: single oversized clipboard operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardSizeRuleConfig {
    pub enabled: bool,
    pub size_threshold_bytes: u64,
}

impl Default for ClipboardSizeRuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_threshold_bytes: 200_000, // 200 KB
        }
    }
}

/// R2: burst of screenshots within a short span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotBurstRuleConfig {
    pub enabled: bool,
    pub burst_count: usize,
    pub window_secs: u64,
}

impl Default for ScreenshotBurstRuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            burst_count: 5,
            window_secs: 10,
        }
    }
}

/// R3: one very large transfer, or repeated sizable transfers in a span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTransferRuleConfig {
    pub enabled: bool,
    pub single_size_threshold_bytes: u64,
    pub rapid_count: usize,
    pub rapid_size_threshold_bytes: u64,
    pub rapid_window_secs: u64,
}

impl Default for FileTransferRuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            single_size_threshold_bytes: 50_000_000, // 50 MB
            rapid_count: 2,
            rapid_size_threshold_bytes: 5_000_000, // 5 MB
            rapid_window_secs: 30,
        }
    }
}

/// Feature extraction window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Trailing span the windowed aggregates are computed over.
    pub window_secs: u64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { window_secs: 60 }
    }
}

/// Severity boundary table for the decision synthesizer.
///
/// The ladder itself (two rules always critical, first match wins) is fixed;
/// the score boundaries are policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityPolicy {
    /// With exactly one rule triggered, scores at or above this upgrade the
    /// alert from medium to high.
    pub single_rule_high_score: f64,
    /// With no rule triggered, scores at or above this raise a high alert.
    pub score_only_high: f64,
    /// With no rule triggered, scores at or above this (but below
    /// `score_only_high`) raise a medium alert. Below it: no alert.
    pub score_only_medium: f64,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            single_rule_high_score: 0.5,
            score_only_high: 0.8,
            score_only_medium: 0.5,
        }
    }
}

impl DetectionConfig {
    /// Largest lookback any rule or feature needs, in seconds. The history
    /// store's time bound must be at least this.
    pub fn max_lookback_secs(&self) -> u64 {
        self.rules
            .screenshot_burst
            .window_secs
            .max(self.rules.file_transfer.rapid_window_secs)
            .max(self.features.window_secs)
    }

    pub fn from_file(path: &Path) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("single_rule_high_score", self.severity.single_rule_high_score),
            ("score_only_high", self.severity.score_only_high),
            ("score_only_medium", self.severity.score_only_medium),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectionError::Configuration(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.severity.score_only_medium > self.severity.score_only_high {
            return Err(DetectionError::Configuration(
                "score_only_medium must not exceed score_only_high".to_string(),
            ));
        }
        if self.history.max_events_per_session == 0 {
            return Err(DetectionError::Configuration(
                "max_events_per_session must be greater than 0".to_string(),
            ));
        }
        if self.history.lookback_secs < self.max_lookback_secs() {
            return Err(DetectionError::Configuration(format!(
                "history lookback {}s is shorter than the largest rule/feature window {}s",
                self.history.lookback_secs,
                self.max_lookback_secs()
            )));
        }
        if self.rules.screenshot_burst.burst_count == 0 || self.rules.file_transfer.rapid_count == 0
        {
            return Err(DetectionError::Configuration(
                "rule count thresholds must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DetectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_lookback_secs(), 60);
    }

    #[test]
    fn test_validation_rejects_bad_severity_bounds() {
        let mut config = DetectionConfig::default();
        config.severity.score_only_high = 1.5;
        assert!(config.validate().is_err());

        let mut config = DetectionConfig::default();
        config.severity.score_only_medium = 0.9;
        config.severity.score_only_high = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_short_lookback() {
        let mut config = DetectionConfig::default();
        config.history.lookback_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = DetectionConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: DetectionConfig = serde_json::from_str(&json).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(
            parsed.rules.clipboard_size.size_threshold_bytes,
            config.rules.clipboard_size.size_threshold_bytes
        );
    }
}
