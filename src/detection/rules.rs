//! Deterministic exfiltration-pattern rules.
//!
//! Stateless predicates over a single event plus its session window. Every
//! matching rule is reported; evaluation has no side effects.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::detection::config::RulesConfig;
use crate::detection::events::{Event, EventType};

/// Stable rule identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuleId {
    /// R1: oversized clipboard operation.
    ClipboardSize,
    /// R2: screenshot burst.
    ScreenshotBurst,
    /// R3: file-transfer anomaly (single large, or rapid repeats).
    FileTransferAnomaly,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::ClipboardSize => "R1",
            RuleId::ScreenshotBurst => "R2",
            RuleId::FileTransferAnomaly => "R3",
        }
    }
}

/// One rule match with its explanation, naming the threshold crossed and the
/// observed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleHit {
    pub rule: RuleId,
    pub detail: String,
}

/// Evaluates the configured rule set. Stateless: all temporal context comes
/// from the caller-supplied window, which includes the event under evaluation.
pub struct RuleEngine {
    config: RulesConfig,
}

impl RuleEngine {
    pub fn new(config: RulesConfig) -> Self {
        Self { config }
    }

    /// Evaluate all enabled rules; returns every hit, never just the first.
    pub fn evaluate(&self, event: &Event, window: &[Event]) -> Vec<RuleHit> {
        let mut hits = Vec::new();
        if let Some(hit) = self.clipboard_size(event) {
            hits.push(hit);
        }
        if let Some(hit) = self.screenshot_burst(event, window) {
            hits.push(hit);
        }
        if let Some(hit) = self.file_transfer_anomaly(event, window) {
            hits.push(hit);
        }
        hits
    }

    fn clipboard_size(&self, event: &Event) -> Option<RuleHit> {
        let rule = &self.config.clipboard_size;
        if !rule.enabled || event.event_type != EventType::ClipboardCopy {
            return None;
        }
        // Exclusive bound: exactly-at-threshold never fires.
        if event.size_bytes > rule.size_threshold_bytes {
            return Some(RuleHit {
                rule: RuleId::ClipboardSize,
                detail: format!(
                    "clipboard copy of {} bytes exceeds the {} byte threshold",
                    event.size_bytes, rule.size_threshold_bytes
                ),
            });
        }
        None
    }

    fn screenshot_burst(&self, event: &Event, window: &[Event]) -> Option<RuleHit> {
        let rule = &self.config.screenshot_burst;
        if !rule.enabled || event.event_type != EventType::Screenshot {
            return None;
        }
        let count = count_in_span(
            window,
            event,
            EventType::Screenshot,
            rule.window_secs,
            None,
        );
        if count >= rule.burst_count {
            return Some(RuleHit {
                rule: RuleId::ScreenshotBurst,
                detail: format!(
                    "{} screenshots within {} seconds meets the burst threshold of {}",
                    count, rule.window_secs, rule.burst_count
                ),
            });
        }
        None
    }

    fn file_transfer_anomaly(&self, event: &Event, window: &[Event]) -> Option<RuleHit> {
        let rule = &self.config.file_transfer;
        if !rule.enabled || event.event_type != EventType::FileTransfer {
            return None;
        }
        if event.size_bytes > rule.single_size_threshold_bytes {
            return Some(RuleHit {
                rule: RuleId::FileTransferAnomaly,
                detail: format!(
                    "file transfer of {} bytes exceeds the {} byte threshold",
                    event.size_bytes, rule.single_size_threshold_bytes
                ),
            });
        }
        let count = count_in_span(
            window,
            event,
            EventType::FileTransfer,
            rule.rapid_window_secs,
            Some(rule.rapid_size_threshold_bytes),
        );
        if count >= rule.rapid_count {
            return Some(RuleHit {
                rule: RuleId::FileTransferAnomaly,
                detail: format!(
                    "{} file transfers above {} bytes within {} seconds meets the rapid-transfer threshold of {}",
                    count, rule.rapid_size_threshold_bytes, rule.rapid_window_secs, rule.rapid_count
                ),
            });
        }
        None
    }
}

/// Count events of `event_type` whose timestamp falls within `span_secs`
/// before the current event (inclusive of the current event itself), above an
/// optional exclusive size floor.
fn count_in_span(
    window: &[Event],
    current: &Event,
    event_type: EventType,
    span_secs: u64,
    min_size_exclusive: Option<u64>,
) -> usize {
    let span = Duration::seconds(span_secs as i64);
    window
        .iter()
        .filter(|e| e.event_type == event_type)
        .filter(|e| {
            let delta = current.timestamp - e.timestamp;
            delta >= Duration::zero() && delta <= span
        })
        .filter(|e| match min_size_exclusive {
            Some(floor) => e.size_bytes > floor,
            None => true,
        })
        .count()
}
