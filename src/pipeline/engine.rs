//! End-to-end detection engine.
//!
//! One `submit` call carries an event through validation, session history,
//! rule evaluation, feature extraction, anomaly scoring and decision
//! synthesis. Alerts are registered, packaged as forensic records and handed
//! to the anchor service; the hot path never waits on tree building or
//! signing.

use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error};

use crate::detection::config::DetectionConfig;
use crate::detection::errors::{DetectionError, Result};
use crate::detection::events::Event;
use crate::detection::features::FeatureExtractor;
use crate::detection::history::SessionHistoryStore;
use crate::detection::rules::RuleEngine;
use crate::detection::scorer::{AnomalyScorer, ScoreOutput, WeightedScorer};
use crate::detection::synthesizer::{Alert, DecisionSynthesizer};
use crate::forensic::anchor::AnchorService;
use crate::forensic::record::ForensicRecord;
use crate::pipeline::events::{EventBus, PipelineEvent, PipelineSubscriber};

// Idle-session sweep cadence, in submissions.
const EVICTION_STRIDE: u64 = 1024;

pub struct DetectionEngine {
    config: DetectionConfig,
    history: SessionHistoryStore,
    rules: RuleEngine,
    extractor: FeatureExtractor,
    scorer: Option<Box<dyn AnomalyScorer>>,
    synthesizer: DecisionSynthesizer,
    alerts: RwLock<HashMap<String, Alert>>,
    anchors: Arc<AnchorService>,
    bus: Arc<EventBus>,
    submissions: AtomicU64,
    /// Newest event timestamp seen, as epoch milliseconds. Idle sweeps run
    /// on stream time, not wall time, so replayed historic streams age the
    /// same way live ones do.
    stream_clock_millis: AtomicI64,
}

impl DetectionEngine {
    /// Build an engine with the default statistical scorer installed.
    pub fn new(
        config: DetectionConfig,
        anchors: Arc<AnchorService>,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            history: SessionHistoryStore::new(config.history.clone()),
            rules: RuleEngine::new(config.rules.clone()),
            extractor: FeatureExtractor::new(config.features.clone()),
            scorer: Some(Box::new(WeightedScorer::default())),
            synthesizer: DecisionSynthesizer::new(config.severity.clone()),
            alerts: RwLock::new(HashMap::new()),
            anchors,
            bus,
            submissions: AtomicU64::new(0),
            stream_clock_millis: AtomicI64::new(i64::MIN),
            config,
        })
    }

    /// Swap in a different scorer backend.
    pub fn with_scorer(mut self, scorer: Box<dyn AnomalyScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Run rules-only, every verdict synthesized from a degraded score.
    pub fn without_scorer(mut self) -> Self {
        self.scorer = None;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn anchors(&self) -> &Arc<AnchorService> {
        &self.anchors
    }

    pub fn subscribe(&self, subscriber: Box<dyn PipelineSubscriber>) -> Result<()> {
        self.bus.subscribe(subscriber)
    }

    /// Process one monitoring event. Returns the alert raised for it, if
    /// any. Scorer failure degrades to rules-only; only invalid events and
    /// internal faults surface as errors.
    pub fn submit(&self, event: Event) -> Result<Option<Alert>> {
        if let Err(err) = event.validate() {
            self.bus.publish(PipelineEvent::EventRejected {
                reason: err.to_string(),
            });
            return Err(err);
        }

        self.stream_clock_millis
            .fetch_max(event.timestamp.timestamp_millis(), Ordering::Relaxed);

        let outcome = self.history.append(event.clone())?;
        if outcome.out_of_order {
            self.bus.publish(PipelineEvent::OrderingAnomaly {
                session_id: event.session_id.clone(),
                event_id: event.event_id.clone(),
            });
        }

        let window = self.history.window(
            &event.session_id,
            Duration::seconds(self.config.history.lookback_secs as i64),
        )?;
        let hits = self.rules.evaluate(&event, &window);
        let features = self.extractor.extract(&event, &window);
        let score = self.score(&features);

        let Some(alert) = self.synthesizer.synthesize(&event, &hits, &score) else {
            self.maybe_sweep();
            return Ok(None);
        };

        debug!(
            alert_id = %alert.alert_id,
            session_id = %alert.session_id,
            severity = alert.severity.as_str(),
            rules = alert.triggered_rules.len(),
            "verdict synthesized"
        );

        let record = ForensicRecord::build(&alert)?;
        self.anchors.enqueue(record)?;
        self.alerts
            .write()
            .map_err(|_| DetectionError::LockPoisoned)?
            .insert(alert.alert_id.clone(), alert.clone());
        self.bus.publish(PipelineEvent::AlertRaised {
            alert: alert.clone(),
        });

        self.maybe_sweep();
        Ok(Some(alert))
    }

    fn score(&self, features: &crate::detection::features::EventFeatures) -> ScoreOutput {
        let Some(scorer) = &self.scorer else {
            return ScoreOutput::degraded();
        };
        match scorer.score(features) {
            Ok(output) => output,
            Err(err) => {
                error!(scorer = scorer.name(), error = %err, "scorer failed");
                self.bus.publish(PipelineEvent::ScorerDegraded {
                    scorer: scorer.name().to_string(),
                    error: err.to_string(),
                });
                ScoreOutput::degraded()
            }
        }
    }

    fn maybe_sweep(&self) {
        let n = self.submissions.fetch_add(1, Ordering::Relaxed) + 1;
        if n % EVICTION_STRIDE != 0 {
            return;
        }
        let millis = self.stream_clock_millis.load(Ordering::Relaxed);
        let Some(now) = Utc.timestamp_millis_opt(millis).single() else {
            return;
        };
        if let Err(err) = self.history.evict_idle_sessions(now) {
            error!(error = %err, "idle-session sweep failed");
        }
    }

    /// Mark an alert contained. Idempotent: a second call returns the alert
    /// unchanged without re-publishing.
    pub fn contain(&self, alert_id: &str) -> Result<Alert> {
        let mut alerts = self
            .alerts
            .write()
            .map_err(|_| DetectionError::LockPoisoned)?;
        let alert = alerts
            .get_mut(alert_id)
            .ok_or_else(|| DetectionError::AlertNotFound(alert_id.to_string()))?;
        if !alert.contained {
            alert.contained = true;
            self.bus.publish(PipelineEvent::AlertContained {
                alert_id: alert_id.to_string(),
            });
        }
        Ok(alert.clone())
    }

    pub fn alert(&self, alert_id: &str) -> Result<Option<Alert>> {
        Ok(self
            .alerts
            .read()
            .map_err(|_| DetectionError::LockPoisoned)?
            .get(alert_id)
            .cloned())
    }

    /// All alerts raised so far, oldest first.
    pub fn alerts(&self) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .read()
            .map_err(|_| DetectionError::LockPoisoned)?
            .values()
            .cloned()
            .collect();
        alerts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(alerts)
    }

    pub fn session_count(&self) -> Result<usize> {
        self.history.session_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::events::EventType;
    use crate::detection::features::EventFeatures;
    use crate::detection::rules::RuleId;
    use crate::detection::synthesizer::Severity;
    use crate::forensic::anchor::AnchorConfig;
    use crate::forensic::signing::AnchorKeyring;
    use crate::forensic::storage::{ForensicStore, MemoryForensicStore};
    use chrono::{DateTime, TimeZone, Utc};

    struct FixedScorer(f64);

    impl AnomalyScorer for FixedScorer {
        fn name(&self) -> &str {
            "fixed"
        }

        fn score(&self, _features: &EventFeatures) -> Result<ScoreOutput> {
            Ok(ScoreOutput {
                score: self.0,
                contributions: vec![("file_transfer_mb".to_string(), self.0)],
            })
        }
    }

    struct FailingScorer;

    impl AnomalyScorer for FailingScorer {
        fn name(&self) -> &str {
            "failing"
        }

        fn score(&self, _features: &EventFeatures) -> Result<ScoreOutput> {
            Err(DetectionError::Scorer("backend offline".to_string()))
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn engine_with_store() -> (DetectionEngine, Arc<MemoryForensicStore>) {
        let store = Arc::new(MemoryForensicStore::new());
        let bus = Arc::new(EventBus::default());
        let anchors = Arc::new(
            AnchorService::new(
                AnchorConfig::default(),
                AnchorKeyring::from_seed([7u8; 32]),
                store.clone(),
                bus.clone(),
            )
            .unwrap(),
        );
        let engine = DetectionEngine::new(DetectionConfig::default(), anchors, bus).unwrap();
        (engine, store)
    }

    #[test]
    fn test_large_clipboard_raises_medium_alert() {
        let (engine, store) = engine_with_store();
        let event = Event::new("s-1", EventType::ClipboardCopy, at(0), 500_000);
        let alert = engine.submit(event).unwrap().expect("alert");

        assert_eq!(alert.severity, Severity::Medium);
        assert!(alert.triggered_rules.contains(&RuleId::ClipboardSize));
        assert_eq!(engine.alerts().unwrap().len(), 1);
        // Record persisted before any anchoring pass.
        assert_eq!(store.load_records().unwrap().len(), 1);
        assert!(store.load_anchors().unwrap().is_empty());
    }

    #[test]
    fn test_high_score_upgrades_single_rule_alert() {
        let (engine, _) = engine_with_store();
        let engine = engine.with_scorer(Box::new(FixedScorer(0.6)));
        let event = Event::new("s-1", EventType::ClipboardCopy, at(0), 500_000);
        let alert = engine.submit(event).unwrap().expect("alert");
        assert_eq!(alert.severity, Severity::High);
        assert!(alert.anomaly_score > 0.5);
    }

    #[test]
    fn test_score_only_alert_without_rule() {
        let (engine, _) = engine_with_store();
        let engine = engine.with_scorer(Box::new(FixedScorer(0.85)));
        let event = Event::new("s-1", EventType::Screenshot, at(0), 40_000);
        let alert = engine.submit(event).unwrap().expect("alert");
        assert_eq!(alert.severity, Severity::High);
        assert!(alert.triggered_rules.is_empty());
    }

    #[test]
    fn test_benign_event_raises_nothing() {
        let (engine, store) = engine_with_store();
        let event = Event::new("s-1", EventType::ClipboardCopy, at(0), 1_000);
        assert!(engine.submit(event).unwrap().is_none());
        assert!(store.load_records().unwrap().is_empty());
    }

    #[test]
    fn test_screenshot_burst_alerts_from_fifth_event() {
        let (engine, _) = engine_with_store();
        let engine = engine.without_scorer();
        let mut alerts = 0;
        for i in 0..8i64 {
            let ts = Utc
                .timestamp_millis_opt(1_700_000_000_000 + i * 500)
                .unwrap();
            let event = Event::new("s-1", EventType::Screenshot, ts, 40_000);
            if engine.submit(event).unwrap().is_some() {
                alerts += 1;
            }
        }
        // Events 5 through 8 each complete a burst.
        assert_eq!(alerts, 4);
    }

    #[test]
    fn test_both_transfer_conditions_yield_one_rule_id() {
        let (engine, _) = engine_with_store();
        let engine = engine.without_scorer();
        // An oversized transfer that also completes a rapid-transfer pair
        // still counts as a single distinct rule.
        engine
            .submit(Event::new("s-1", EventType::FileTransfer, at(0), 8_000_000))
            .unwrap();
        let alert = engine
            .submit(Event::new("s-1", EventType::FileTransfer, at(5), 60_000_000))
            .unwrap()
            .expect("alert");
        assert_eq!(alert.severity, Severity::Medium);
        assert_eq!(alert.triggered_rules.len(), 1);
        assert!(alert.triggered_rules.contains(&RuleId::FileTransferAnomaly));
    }

    #[test]
    fn test_invalid_event_rejected_and_published() {
        let (engine, _) = engine_with_store();
        let mut event = Event::new("s-1", EventType::Screenshot, at(0), 1_000);
        event.session_id = String::new();
        assert!(engine.submit(event).is_err());

        let recent = engine.bus().recent_events().unwrap();
        assert!(matches!(
            recent.first(),
            Some(PipelineEvent::EventRejected { .. })
        ));
    }

    #[test]
    fn test_scorer_failure_degrades_to_rules_only() {
        let (engine, _) = engine_with_store();
        let engine = engine.with_scorer(Box::new(FailingScorer));
        let event = Event::new("s-1", EventType::ClipboardCopy, at(0), 500_000);
        let alert = engine.submit(event).unwrap().expect("alert");

        // Rule still fires; score contributes nothing.
        assert_eq!(alert.severity, Severity::Medium);
        assert_eq!(alert.anomaly_score, 0.0);
        let recent = engine.bus().recent_events().unwrap();
        assert!(recent
            .iter()
            .any(|e| matches!(e, PipelineEvent::ScorerDegraded { .. })));
    }

    #[test]
    fn test_out_of_order_event_flagged_never_alerts_alone() {
        let (engine, _) = engine_with_store();
        let engine = engine.without_scorer();
        engine
            .submit(Event::new("s-1", EventType::Screenshot, at(10), 1_000))
            .unwrap();
        let late = Event::new("s-1", EventType::Screenshot, at(5), 1_000);
        assert!(engine.submit(late).unwrap().is_none());

        let recent = engine.bus().recent_events().unwrap();
        assert!(recent
            .iter()
            .any(|e| matches!(e, PipelineEvent::OrderingAnomaly { .. })));
    }

    #[test]
    fn test_contain_is_idempotent() {
        let (engine, _) = engine_with_store();
        let event = Event::new("s-1", EventType::ClipboardCopy, at(0), 500_000);
        let alert = engine.submit(event).unwrap().expect("alert");

        let contained = engine.contain(&alert.alert_id).unwrap();
        assert!(contained.contained);
        engine.contain(&alert.alert_id).unwrap();

        let contain_events = engine
            .bus()
            .recent_events()
            .unwrap()
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::AlertContained { .. }))
            .count();
        assert_eq!(contain_events, 1);
    }

    #[test]
    fn test_contain_unknown_alert_fails() {
        let (engine, _) = engine_with_store();
        assert!(matches!(
            engine.contain("no-such-alert"),
            Err(DetectionError::AlertNotFound(_))
        ));
    }

    #[test]
    fn test_containment_does_not_change_anchored_record() {
        let (engine, store) = engine_with_store();
        let event = Event::new("s-1", EventType::ClipboardCopy, at(0), 500_000);
        let alert = engine.submit(event).unwrap().expect("alert");
        let before = store.load_records().unwrap();

        engine.contain(&alert.alert_id).unwrap();
        // The forensic record captured the pre-containment state.
        assert_eq!(store.load_records().unwrap(), before);
        assert!(before[0].payload.contains("\"contained\":false"));
    }

    #[test]
    fn test_sweep_runs_on_stream_time_during_replay() {
        let (engine, _) = engine_with_store();
        let engine = engine.without_scorer();

        // Spaced screenshots push the submission count to just below the
        // sweep stride without ever forming a burst.
        for i in 0..1021i64 {
            assert!(engine
                .submit(Event::new("s-1", EventType::Screenshot, at(i * 100), 40_000))
                .unwrap()
                .is_none());
        }

        // A tight burst straddling the stride boundary. The sweep at the
        // 1024th submission must not wipe the session, even though these
        // timestamps are far in the wall-clock past.
        let base_millis = 1_700_000_000_000 + 1_021 * 100 * 1_000;
        let mut alerts = 0;
        for i in 0..5i64 {
            let ts = Utc.timestamp_millis_opt(base_millis + i * 500).unwrap();
            if engine
                .submit(Event::new("s-1", EventType::Screenshot, ts, 40_000))
                .unwrap()
                .is_some()
            {
                alerts += 1;
            }
        }
        assert_eq!(alerts, 1, "burst across the sweep stride must still fire");
        assert_eq!(engine.session_count().unwrap(), 1);
    }

    #[test]
    fn test_sessions_do_not_cross_contaminate() {
        let (engine, _) = engine_with_store();
        let engine = engine.without_scorer();
        // Four screenshots in s-1, one in s-2: neither session bursts.
        for i in 0..4i64 {
            engine
                .submit(Event::new("s-1", EventType::Screenshot, at(i), 40_000))
                .unwrap();
        }
        let other = Event::new("s-2", EventType::Screenshot, at(4), 40_000);
        assert!(engine.submit(other).unwrap().is_none());
    }
}
