//! Forensic records: canonical, hashable packaging of one alert.
//!
//! The canonical payload is the serde_json encoding of `CanonicalAlert`,
//! whose field declaration order *is* the canonical field order. The record
//! stores the exact payload string that was hashed, so re-verification never
//! depends on re-serialization quirks.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::detection::events::Event;
use crate::detection::rules::RuleId;
use crate::detection::synthesizer::{Alert, Severity};
use crate::forensic::errors::{ForensicError, Result};

/// Fixed-order view of an alert used for canonical serialization. Field
/// order must never change; it defines the hashing contract.
#[derive(Debug, Clone, Serialize)]
struct CanonicalAlert<'a> {
    alert_id: &'a str,
    session_id: &'a str,
    severity: Severity,
    triggered_rules: &'a BTreeSet<RuleId>,
    anomaly_score: f64,
    reasons: &'a [String],
    timestamp: String,
    contained: bool,
    event: &'a Event,
}

/// Durable evidentiary packaging of one alert. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForensicRecord {
    pub record_id: String,
    pub alert_id: String,
    /// Canonical payload, stored verbatim as hashed.
    pub payload: String,
    /// Lowercase hex SHA-256 of `payload`, 64 characters.
    pub content_hash: String,
}

impl ForensicRecord {
    /// Build the record for an alert: canonicalize, then hash.
    pub fn build(alert: &Alert) -> Result<Self> {
        let payload = canonical_payload(alert)?;
        let content_hash = hash_payload(payload.as_bytes());
        Ok(Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert.alert_id.clone(),
            payload,
            content_hash,
        })
    }

    /// Recompute the hash from the stored payload and compare. False means
    /// the payload was altered after the record was built.
    pub fn hash_is_consistent(&self) -> bool {
        hash_payload(self.payload.as_bytes()) == self.content_hash
    }

    /// The content hash as a raw digest, for tree construction.
    pub fn leaf_digest(&self) -> Result<[u8; 32]> {
        decode_hash(&self.content_hash)
    }
}

/// Canonical byte encoding of the alert's fields in fixed order.
fn canonical_payload(alert: &Alert) -> Result<String> {
    let canonical = CanonicalAlert {
        alert_id: &alert.alert_id,
        session_id: &alert.session_id,
        severity: alert.severity,
        triggered_rules: &alert.triggered_rules,
        anomaly_score: alert.anomaly_score,
        reasons: &alert.reasons,
        timestamp: rfc3339(alert.timestamp),
        contained: alert.contained,
        event: &alert.event,
    };
    serde_json::to_string(&canonical).map_err(|e| ForensicError::Serialization(e.to_string()))
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SHA-256, lowercase hex.
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Parse a 64-char hex digest into raw bytes.
pub fn decode_hash(hash: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hash).map_err(|e| ForensicError::Serialization(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| ForensicError::Serialization(format!("digest must be 32 bytes: {}", hash)))
}
