//! Canonical session-activity event model.
//!
//! One `Event` is one observed activity unit on a monitored remote-access
//! channel. Events are immutable after ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::detection::errors::{DetectionError, Result};

/// Activity categories observed on the monitored channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ClipboardCopy,
    Screenshot,
    FileTransfer,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ClipboardCopy => "clipboard_copy",
            EventType::Screenshot => "screenshot",
            EventType::FileTransfer => "file_transfer",
        }
    }
}

/// One observed activity unit.
///
/// `size_bytes` meaning depends on the type: clipboard payload size,
/// screenshot encoded size, or transferred file size. `metadata` is opaque,
/// type-specific context (filename, screen region, source address) and uses a
/// `BTreeMap` so serialization of the same event is byte-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Generated when the producer did not assign one.
    #[serde(default = "generated_event_id")]
    pub event_id: String,
    pub session_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn generated_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Event {
    /// Build an event with a generated id and empty metadata.
    pub fn new(
        session_id: impl Into<String>,
        event_type: EventType,
        timestamp: DateTime<Utc>,
        size_bytes: u64,
    ) -> Self {
        Self {
            event_id: generated_event_id(),
            session_id: session_id.into(),
            event_type,
            timestamp,
            size_bytes,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Ingestion-boundary validation. Malformed events are rejected here and
    /// never reach the session history store.
    pub fn validate(&self) -> Result<()> {
        if self.event_id.trim().is_empty() {
            return Err(DetectionError::InvalidEvent("empty event_id".to_string()));
        }
        if self.session_id.trim().is_empty() {
            return Err(DetectionError::InvalidEvent("empty session_id".to_string()));
        }
        // u64 already excludes negative sizes; guard the serde path where a
        // float or string size may have been coerced upstream.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serde_names() {
        let json = serde_json::to_string(&EventType::ClipboardCopy).unwrap();
        assert_eq!(json, "\"clipboard_copy\"");
        let back: EventType = serde_json::from_str("\"file_transfer\"").unwrap();
        assert_eq!(back, EventType::FileTransfer);
    }

    #[test]
    fn test_validate_rejects_blank_ids() {
        let mut event = Event::new("s-1", EventType::Screenshot, Utc::now(), 1024);
        assert!(event.validate().is_ok());

        event.session_id = "  ".to_string();
        assert!(event.validate().is_err());

        event.session_id = "s-1".to_string();
        event.event_id = String::new();
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_missing_event_id_is_generated_on_parse() {
        let json = r#"{"session_id":"s-1","event_type":"screenshot","timestamp":"2023-11-14T22:13:20Z","size_bytes":1024}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert!(!event.event_id.is_empty());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn test_event_roundtrip_preserves_metadata_order() {
        let event = Event::new("s-1", EventType::FileTransfer, Utc::now(), 9000)
            .with_metadata("filename", "payroll.xlsx")
            .with_metadata("direction", "outbound");

        let json_a = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json_a).unwrap();
        let json_b = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json_a, json_b);
    }
}
