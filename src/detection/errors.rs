//! Detection-path error types.

use thiserror::Error;

/// Errors raised while ingesting or evaluating session events.
#[derive(Debug, Error)]
pub enum DetectionError {
    /// Event rejected at the ingestion boundary.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A shared lock was poisoned by a panicking thread.
    #[error("lock poisoned")]
    LockPoisoned,

    /// The anomaly scorer failed; the pipeline degrades to rules-only.
    #[error("scorer failure: {0}")]
    Scorer(String),

    /// Alert lookup failed (e.g. containment of an unknown alert).
    #[error("alert not found: {0}")]
    AlertNotFound(String),

    /// Forensic record creation or enqueueing failed.
    #[error("forensic error: {0}")]
    Forensic(#[from] crate::forensic::errors::ForensicError),

    /// Configuration rejected by validation.
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, DetectionError>;

impl DetectionError {
    /// Ingestion-scoped errors abort one event, never the pipeline.
    pub fn is_per_event(&self) -> bool {
        matches!(
            self,
            Self::InvalidEvent(_) | Self::Scorer(_) | Self::AlertNotFound(_)
        )
    }
}
