//! Durable storage for forensic records and anchors.
//!
//! `ForensicStore` is the persistence seam: the in-memory backend serves
//! tests and embedded use, the JSONL backend writes an append-only
//! `records.jsonl` plus one JSON file per anchor under `anchors/`.

use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

use crate::forensic::errors::{ForensicError, Result};
use crate::forensic::merkle::MerkleAnchor;
use crate::forensic::record::ForensicRecord;

/// Persistence backend for records and anchors.
pub trait ForensicStore: Send + Sync {
    fn append_record(&self, record: &ForensicRecord) -> Result<()>;
    fn save_anchor(&self, anchor: &MerkleAnchor) -> Result<()>;
    fn load_records(&self) -> Result<Vec<ForensicRecord>>;
    fn load_anchors(&self) -> Result<Vec<MerkleAnchor>>;
}

/// In-memory backend.
#[derive(Default)]
pub struct MemoryForensicStore {
    records: Mutex<Vec<ForensicRecord>>,
    anchors: Mutex<Vec<MerkleAnchor>>,
}

impl MemoryForensicStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForensicStore for MemoryForensicStore {
    fn append_record(&self, record: &ForensicRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| ForensicError::LockPoisoned)?
            .push(record.clone());
        Ok(())
    }

    fn save_anchor(&self, anchor: &MerkleAnchor) -> Result<()> {
        self.anchors
            .lock()
            .map_err(|_| ForensicError::LockPoisoned)?
            .push(anchor.clone());
        Ok(())
    }

    fn load_records(&self) -> Result<Vec<ForensicRecord>> {
        Ok(self
            .records
            .lock()
            .map_err(|_| ForensicError::LockPoisoned)?
            .clone())
    }

    fn load_anchors(&self) -> Result<Vec<MerkleAnchor>> {
        Ok(self
            .anchors
            .lock()
            .map_err(|_| ForensicError::LockPoisoned)?
            .clone())
    }
}

/// Filesystem backend: `<root>/records.jsonl` and `<root>/anchors/<id>.json`.
pub struct JsonlForensicStore {
    root: PathBuf,
    // Serializes appends so concurrent writers cannot interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlForensicStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("anchors"))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn records_path(&self) -> PathBuf {
        self.root.join("records.jsonl")
    }

    fn anchors_dir(&self) -> PathBuf {
        self.root.join("anchors")
    }
}

impl ForensicStore for JsonlForensicStore {
    fn append_record(&self, record: &ForensicRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| ForensicError::Serialization(e.to_string()))?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ForensicError::LockPoisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.records_path())?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn save_anchor(&self, anchor: &MerkleAnchor) -> Result<()> {
        let path = self.anchors_dir().join(format!("{}.json", anchor.anchor_id));
        let json = serde_json::to_string_pretty(anchor)
            .map_err(|e| ForensicError::Serialization(e.to_string()))?;
        let mut file = File::create(&path)?;
        file.write_all(json.as_bytes())?;
        debug!(anchor_id = %anchor.anchor_id, path = %path.display(), "anchor persisted");
        Ok(())
    }

    fn load_records(&self) -> Result<Vec<ForensicRecord>> {
        let path = self.records_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut records = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_strict::<ForensicRecord>(&line).map_err(|e| {
                ForensicError::Serialization(format!("records.jsonl line {}: {}", index + 1, e))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn load_anchors(&self) -> Result<Vec<MerkleAnchor>> {
        let mut anchors = Vec::new();
        for entry in fs::read_dir(self.anchors_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let anchor = parse_strict::<MerkleAnchor>(&text).map_err(|e| {
                ForensicError::Serialization(format!("{}: {}", path.display(), e))
            })?;
            anchors.push(anchor);
        }
        anchors.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(anchors)
    }
}

/// A record that does not parse exactly is treated as corrupt, not coerced.
fn parse_strict<T: for<'de> Deserialize<'de>>(text: &str) -> std::result::Result<T, String> {
    serde_json::from_str(text).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::events::{Event, EventType};
    use crate::detection::synthesizer::{Alert, Severity};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn record(tag: &str) -> ForensicRecord {
        let event = Event::new("s-1", EventType::ClipboardCopy, Utc::now(), 500_000);
        let alert = Alert {
            alert_id: format!("alert-{}", tag),
            session_id: "s-1".to_string(),
            severity: Severity::Medium,
            triggered_rules: BTreeSet::new(),
            anomaly_score: 0.55,
            reasons: vec!["anomaly score 0.55".to_string()],
            timestamp: event.timestamp,
            contained: false,
            event,
        };
        ForensicRecord::build(&alert).unwrap()
    }

    fn anchor(id: &str, leaves: Vec<String>) -> MerkleAnchor {
        MerkleAnchor {
            anchor_id: id.to_string(),
            leaves,
            root_hash: "00".repeat(32),
            signature: "11".repeat(64),
            key_epoch: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryForensicStore::new();
        let rec = record("a");
        store.append_record(&rec).unwrap();
        store.save_anchor(&anchor("x", vec![rec.content_hash.clone()])).unwrap();
        assert_eq!(store.load_records().unwrap(), vec![rec]);
        assert_eq!(store.load_anchors().unwrap().len(), 1);
    }

    #[test]
    fn test_jsonl_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlForensicStore::open(dir.path()).unwrap();

        let first = record("a");
        let second = record("b");
        store.append_record(&first).unwrap();
        store.append_record(&second).unwrap();
        store
            .save_anchor(&anchor("x", vec![first.content_hash.clone()]))
            .unwrap();

        // Reopen to prove durability across handles.
        let reopened = JsonlForensicStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load_records().unwrap(), vec![first, second]);
        let anchors = reopened.load_anchors().unwrap();
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].anchor_id, "x");
    }

    #[test]
    fn test_empty_store_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlForensicStore::open(dir.path()).unwrap();
        assert!(store.load_records().unwrap().is_empty());
        assert!(store.load_anchors().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_record_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlForensicStore::open(dir.path()).unwrap();
        store.append_record(&record("a")).unwrap();
        fs::write(
            dir.path().join("records.jsonl"),
            "{\"record_id\": \"truncated\"\n",
        )
        .unwrap();
        assert!(store.load_records().is_err());
    }
}
