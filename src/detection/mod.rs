//! Hybrid rule + statistical detection pipeline.
//!
//! Flow per event: session history append -> rule evaluation + feature
//! extraction -> anomaly scoring -> decision synthesis. Everything here is
//! hot-path and bounded; forensic anchoring happens downstream.

pub mod config;
pub mod errors;
pub mod events;
pub mod features;
pub mod history;
pub mod rules;
pub mod scorer;
pub mod synthesizer;

pub use config::{DetectionConfig, HistoryConfig, RulesConfig, SeverityPolicy};
pub use errors::{DetectionError, Result};
pub use events::{Event, EventType};
pub use features::{EventFeatures, FeatureExtractor};
pub use history::{AppendOutcome, SessionHistoryStore};
pub use rules::{RuleEngine, RuleHit, RuleId};
pub use scorer::{AnomalyScorer, FeatureWeights, ScoreOutput, WeightedScorer};
pub use synthesizer::{Alert, DecisionSynthesizer, Severity};
