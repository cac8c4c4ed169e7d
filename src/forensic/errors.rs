//! Forensic subsystem error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForensicError {
    /// Persisting or loading records/anchors failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Canonical encoding or strict parsing failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Root signing failed (e.g. signing key unavailable).
    #[error("signing error: {0}")]
    Signing(String),

    /// An anchor references a key epoch the keyring does not hold.
    #[error("unknown key epoch: {0}")]
    UnknownKeyEpoch(u32),

    /// A shared lock was poisoned by a panicking thread.
    #[error("lock poisoned")]
    LockPoisoned,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ForensicError>;
