//! Anchoring service: batches forensic records off the hot path and seals
//! each batch under a signed Merkle root.
//!
//! `enqueue` persists the record and returns; the actual tree build, signing
//! and anchor persistence happen in `anchor_pending`, driven either by the
//! background task in `run` or explicitly by the caller. A record belongs to
//! exactly one batch.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::forensic::errors::{ForensicError, Result};
use crate::forensic::merkle::{build_root, verify_anchor_records, MerkleAnchor};
use crate::forensic::record::ForensicRecord;
use crate::forensic::signing::AnchorKeyring;
use crate::forensic::storage::ForensicStore;
use crate::pipeline::events::{EventBus, PipelineEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// Most records sealed under a single anchor.
    pub max_batch_size: usize,
    /// Timer-driven anchoring period for partially filled batches.
    pub interval_secs: u64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 64,
            interval_secs: 30,
        }
    }
}

impl AnchorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(ForensicError::Storage(
                "max_batch_size must be positive".to_string(),
            ));
        }
        if self.interval_secs == 0 {
            return Err(ForensicError::Storage(
                "interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct AnchorService {
    config: AnchorConfig,
    pending: Mutex<VecDeque<ForensicRecord>>,
    keyring: RwLock<AnchorKeyring>,
    store: Arc<dyn ForensicStore>,
    bus: Arc<EventBus>,
    batch_ready: Notify,
}

impl AnchorService {
    pub fn new(
        config: AnchorConfig,
        keyring: AnchorKeyring,
        store: Arc<dyn ForensicStore>,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pending: Mutex::new(VecDeque::new()),
            keyring: RwLock::new(keyring),
            store,
            bus,
            batch_ready: Notify::new(),
        })
    }

    /// Persist the record and queue it for the next anchor. Non-blocking
    /// with respect to tree building and signing.
    pub fn enqueue(&self, record: ForensicRecord) -> Result<()> {
        self.store.append_record(&record)?;
        let pending_len = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| ForensicError::LockPoisoned)?;
            pending.push_back(record);
            pending.len()
        };
        if pending_len >= self.config.max_batch_size {
            self.batch_ready.notify_one();
        }
        Ok(())
    }

    pub fn pending_len(&self) -> Result<usize> {
        Ok(self
            .pending
            .lock()
            .map_err(|_| ForensicError::LockPoisoned)?
            .len())
    }

    /// Rotate in a new signing key; past anchors stay verifiable.
    pub fn rotate_key(&self, key: ed25519_dalek::SigningKey) -> Result<u32> {
        Ok(self
            .keyring
            .write()
            .map_err(|_| ForensicError::LockPoisoned)?
            .rotate(key))
    }

    /// Apply `f` to the keyring, for verification against live key state.
    pub fn with_keyring<T>(&self, f: impl FnOnce(&AnchorKeyring) -> T) -> Result<T> {
        let keyring = self
            .keyring
            .read()
            .map_err(|_| ForensicError::LockPoisoned)?;
        Ok(f(&keyring))
    }

    /// Seal one batch of pending records. `Ok(None)` when nothing is
    /// pending. On signing or storage failure the batch is returned to the
    /// front of the queue for retry.
    pub fn anchor_pending(&self) -> Result<Option<MerkleAnchor>> {
        let batch: Vec<ForensicRecord> = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| ForensicError::LockPoisoned)?;
            let take = pending.len().min(self.config.max_batch_size);
            pending.drain(..take).collect()
        };
        if batch.is_empty() {
            return Ok(None);
        }

        match self.seal(&batch) {
            Ok(anchor) => {
                self.bus.publish(PipelineEvent::AnchorCreated {
                    anchor_id: anchor.anchor_id.clone(),
                    root_hash: anchor.root_hash.clone(),
                    leaf_count: anchor.leaf_count(),
                });
                Ok(Some(anchor))
            }
            Err(err) => {
                let mut pending = self
                    .pending
                    .lock()
                    .map_err(|_| ForensicError::LockPoisoned)?;
                for record in batch.into_iter().rev() {
                    pending.push_front(record);
                }
                Err(err)
            }
        }
    }

    /// Seal batches until the pending queue is empty.
    pub fn flush(&self) -> Result<Vec<MerkleAnchor>> {
        let mut anchors = Vec::new();
        while let Some(anchor) = self.anchor_pending()? {
            anchors.push(anchor);
        }
        Ok(anchors)
    }

    fn seal(&self, batch: &[ForensicRecord]) -> Result<MerkleAnchor> {
        let mut leaves = Vec::with_capacity(batch.len());
        for record in batch {
            leaves.push(record.leaf_digest()?);
        }
        let root = build_root(&leaves)
            .ok_or_else(|| ForensicError::Storage("cannot anchor empty batch".to_string()))?;
        let (key_epoch, signature) = self
            .keyring
            .read()
            .map_err(|_| ForensicError::LockPoisoned)?
            .sign_root(&root);

        let anchor = MerkleAnchor {
            anchor_id: uuid::Uuid::new_v4().to_string(),
            leaves: batch.iter().map(|r| r.content_hash.clone()).collect(),
            root_hash: hex::encode(root),
            signature,
            key_epoch,
            created_at: Utc::now(),
        };
        self.store.save_anchor(&anchor)?;
        debug!(anchor_id = %anchor.anchor_id, leaf_count = anchor.leaf_count(), "batch sealed");
        Ok(anchor)
    }

    /// Background driver: anchors on a timer, when a batch fills, and once
    /// more on cancellation so no pending record is lost at shutdown.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.drive("interval"),
                _ = self.batch_ready.notified() => self.drive("batch full"),
                _ = cancel.cancelled() => {
                    self.drive("shutdown flush");
                    info!("anchor service stopped");
                    return;
                }
            }
        }
    }

    fn drive(&self, cause: &str) {
        match self.flush() {
            Ok(anchors) if !anchors.is_empty() => {
                debug!(cause, count = anchors.len(), "anchoring pass complete")
            }
            Ok(_) => {}
            // Batch was re-queued; the next tick retries.
            Err(err) => error!(cause, error = %err, "anchoring pass failed"),
        }
    }
}

/// Outcome of verifying a store's full evidence chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    pub anchors_total: usize,
    pub anchors_valid: usize,
    pub records_total: usize,
    pub records_anchored: usize,
    pub failures: Vec<String>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Re-derive every anchor from stored record payloads and check signatures.
/// Tampering with a payload, a hash, a leaf list or a root surfaces as a
/// named failure rather than an error.
pub fn verify_store(store: &dyn ForensicStore, keyring: &AnchorKeyring) -> Result<VerificationReport> {
    let records = store.load_records()?;
    let anchors = store.load_anchors()?;

    let by_hash: HashMap<&str, &ForensicRecord> = records
        .iter()
        .map(|r| (r.content_hash.as_str(), r))
        .collect();

    let mut report = VerificationReport {
        anchors_total: anchors.len(),
        anchors_valid: 0,
        records_total: records.len(),
        records_anchored: 0,
        failures: Vec::new(),
    };

    for anchor in &anchors {
        let mut batch = Vec::with_capacity(anchor.leaves.len());
        let mut missing = false;
        for leaf in &anchor.leaves {
            match by_hash.get(leaf.as_str()) {
                Some(record) => batch.push((*record).clone()),
                None => {
                    report
                        .failures
                        .push(format!("anchor {}: no record for leaf {}", anchor.anchor_id, leaf));
                    missing = true;
                }
            }
        }
        if missing {
            continue;
        }
        if verify_anchor_records(anchor, &batch, keyring) {
            report.anchors_valid += 1;
            report.records_anchored += batch.len();
        } else {
            report
                .failures
                .push(format!("anchor {}: verification failed", anchor.anchor_id));
        }
    }

    Ok(report)
}
