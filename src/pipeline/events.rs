//! Pipeline event fan-out.
//!
//! Every externally observable state change flows through the bus as a
//! `PipelineEvent`. Subscribers are synchronous and must be fast; the bus
//! also keeps a bounded ring of recent events for diagnostics.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::detection::errors::{DetectionError, Result};
use crate::detection::synthesizer::Alert;

/// Observable pipeline state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    AlertRaised {
        alert: Alert,
    },
    AlertContained {
        alert_id: String,
    },
    AnchorCreated {
        anchor_id: String,
        root_hash: String,
        leaf_count: usize,
    },
    EventRejected {
        reason: String,
    },
    OrderingAnomaly {
        session_id: String,
        event_id: String,
    },
    ScorerDegraded {
        scorer: String,
        error: String,
    },
}

/// Receives every published event. Implementations must not block.
pub trait PipelineSubscriber: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

/// Synchronous fan-out bus with a bounded recent-event buffer.
pub struct EventBus {
    subscribers: RwLock<Vec<Box<dyn PipelineSubscriber>>>,
    recent: Mutex<VecDeque<PipelineEvent>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn subscribe(&self, subscriber: Box<dyn PipelineSubscriber>) -> Result<()> {
        self.subscribers
            .write()
            .map_err(|_| DetectionError::LockPoisoned)?
            .push(subscriber);
        Ok(())
    }

    /// Deliver to all subscribers and record in the recent buffer. Delivery
    /// order matches subscription order.
    pub fn publish(&self, event: PipelineEvent) {
        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        match self.subscribers.read() {
            Ok(subscribers) => {
                for subscriber in subscribers.iter() {
                    subscriber.on_event(&event);
                }
            }
            Err(_) => warn!("subscriber list poisoned, event dropped from fan-out"),
        }
    }

    /// Snapshot of the recent-event buffer, oldest first.
    pub fn recent_events(&self) -> Result<Vec<PipelineEvent>> {
        Ok(self
            .recent
            .lock()
            .map_err(|_| DetectionError::LockPoisoned)?
            .iter()
            .cloned()
            .collect())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Writes every event to the tracing log at a level matching its weight.
pub struct LoggingSubscriber;

impl PipelineSubscriber for LoggingSubscriber {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::AlertRaised { alert } => warn!(
                alert_id = %alert.alert_id,
                session_id = %alert.session_id,
                severity = alert.severity.as_str(),
                score = alert.anomaly_score,
                "alert raised"
            ),
            PipelineEvent::AlertContained { alert_id } => {
                info!(alert_id = %alert_id, "alert contained")
            }
            PipelineEvent::AnchorCreated {
                anchor_id,
                root_hash,
                leaf_count,
            } => info!(
                anchor_id = %anchor_id,
                root_hash = %root_hash,
                leaf_count,
                "anchor created"
            ),
            PipelineEvent::EventRejected { reason } => warn!(%reason, "event rejected"),
            PipelineEvent::OrderingAnomaly {
                session_id,
                event_id,
            } => warn!(%session_id, %event_id, "out-of-order event accepted"),
            PipelineEvent::ScorerDegraded { scorer, error } => {
                warn!(%scorer, %error, "scorer degraded, rules-only verdict")
            }
        }
    }
}
