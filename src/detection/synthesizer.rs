//! Decision synthesis: rule verdicts + anomaly score -> alert or no-alert.
//!
//! Every alert is traceable to a specific rule condition and/or specific
//! feature weights; an alert that cannot explain itself is a contract
//! violation, so `reasons` is built here alongside the severity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::detection::config::SeverityPolicy;
use crate::detection::events::Event;
use crate::detection::rules::{RuleHit, RuleId};
use crate::detection::scorer::ScoreOutput;

/// Alert severity, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A detection verdict. Immutable after creation except for `contained`,
/// which only the external containment collaborator flips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub session_id: String,
    pub severity: Severity,
    pub triggered_rules: BTreeSet<RuleId>,
    pub anomaly_score: f64,
    pub reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub contained: bool,
    /// The triggering event, retained as evidentiary context for the
    /// forensic record regardless of window eviction.
    pub event: Event,
}

/// Combines rule verdicts and the anomaly score into a single verdict under
/// a configurable severity policy.
pub struct DecisionSynthesizer {
    policy: SeverityPolicy,
}

impl DecisionSynthesizer {
    pub fn new(policy: SeverityPolicy) -> Self {
        Self { policy }
    }

    /// Severity table, ordered highest-to-lowest, first match wins. `None`
    /// means no alert; an `Alert` below the floor is never constructed.
    pub fn classify(&self, rule_count: usize, score: f64) -> Option<Severity> {
        match rule_count {
            n if n >= 2 => Some(Severity::Critical),
            1 if score >= self.policy.single_rule_high_score => Some(Severity::High),
            1 => Some(Severity::Medium),
            0 if score >= self.policy.score_only_high => Some(Severity::High),
            0 if score >= self.policy.score_only_medium => Some(Severity::Medium),
            _ => None,
        }
    }

    /// Produce an alert for the event, or `None` when nothing crossed the
    /// policy floor.
    pub fn synthesize(
        &self,
        event: &Event,
        hits: &[RuleHit],
        score_output: &ScoreOutput,
    ) -> Option<Alert> {
        let severity = self.classify(distinct_rules(hits).len(), score_output.score)?;

        let mut reasons: Vec<String> = hits
            .iter()
            .map(|hit| format!("rule {}: {}", hit.rule.as_str(), hit.detail))
            .collect();
        if let Some(sentence) = score_sentence(score_output) {
            reasons.push(sentence);
        }

        Some(Alert {
            alert_id: uuid::Uuid::new_v4().to_string(),
            session_id: event.session_id.clone(),
            severity,
            triggered_rules: distinct_rules(hits),
            anomaly_score: score_output.score,
            reasons,
            timestamp: event.timestamp,
            contained: false,
            event: event.clone(),
        })
    }
}

fn distinct_rules(hits: &[RuleHit]) -> BTreeSet<RuleId> {
    hits.iter().map(|hit| hit.rule).collect()
}

/// One explainability sentence for the scorer, naming the top-weighted
/// contributing features. Suppressed when the scorer was degraded.
fn score_sentence(output: &ScoreOutput) -> Option<String> {
    if output.contributions.is_empty() || output.score <= 0.0 {
        return None;
    }
    let top: Vec<String> = output
        .contributions
        .iter()
        .take(3)
        .filter(|(_, weight)| weight.abs() > 0.05)
        .map(|(name, weight)| format!("{} ({:+.2})", name, weight))
        .collect();
    if top.is_empty() {
        return Some(format!("anomaly score {:.2}", output.score));
    }
    Some(format!(
        "anomaly score {:.2}; top contributing features: {}",
        output.score,
        top.join(", ")
    ))
}
