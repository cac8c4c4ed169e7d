//! Hybrid detection and forensic integrity engine for remote-session
//! monitoring.
//!
//! The detection layer turns session activity events into severity-ranked
//! alerts; the forensic layer seals every alert into a tamper-evident,
//! Merkle-anchored evidence chain. `pipeline::DetectionEngine` is the entry
//! point that wires both together.

pub mod detection;
pub mod forensic;
pub mod pipeline;

pub use detection::{Alert, DetectionConfig, Event, EventType, Severity};
pub use forensic::{AnchorConfig, AnchorService, ForensicRecord, MerkleAnchor};
pub use pipeline::{DetectionEngine, EventBus, PipelineEvent};
