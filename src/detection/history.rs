//! Per-session sliding windows of recent events.
//!
//! The store owns every `SessionWindow` exclusively. Appends to different
//! sessions run in parallel (outer `RwLock` is held only to resolve the
//! session entry); appends and reads for the same session serialize on that
//! session's `Mutex`, so a window is never observed half-updated. `window()`
//! hands back an owned snapshot, safe to evaluate without further locking.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

use crate::detection::config::HistoryConfig;
use crate::detection::errors::{DetectionError, Result};
use crate::detection::events::Event;

/// Outcome of one append, reported back to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// The event's timestamp regressed relative to the session's newest event.
    /// Flagged as its own anomaly signal, not an ingestion error.
    pub out_of_order: bool,
    /// Events dropped by the time bound or the count cap during this append.
    pub evicted: usize,
}

/// Bounded ordered sequence of recent events for one session.
#[derive(Debug)]
struct SessionWindow {
    events: VecDeque<Event>,
    /// Newest timestamp observed so far, kept even across eviction so late
    /// arrivals are still detected.
    newest_timestamp: Option<DateTime<Utc>>,
    ordering_anomalies: u64,
}

impl SessionWindow {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            newest_timestamp: None,
            ordering_anomalies: 0,
        }
    }

    fn append(&mut self, event: Event, config: &HistoryConfig) -> AppendOutcome {
        let out_of_order = match self.newest_timestamp {
            Some(newest) => event.timestamp < newest,
            None => false,
        };
        if out_of_order {
            self.ordering_anomalies += 1;
        } else {
            self.newest_timestamp = Some(event.timestamp);
        }

        // Time bound first, then the hard count cap, oldest dropped first.
        let mut evicted = 0;
        if let Some(newest) = self.newest_timestamp {
            let horizon = newest - Duration::seconds(config.lookback_secs as i64);
            while matches!(self.events.front(), Some(front) if front.timestamp < horizon) {
                self.events.pop_front();
                evicted += 1;
            }
        }
        self.events.push_back(event);
        while self.events.len() > config.max_events_per_session {
            self.events.pop_front();
            evicted += 1;
        }

        AppendOutcome {
            out_of_order,
            evicted,
        }
    }

    fn snapshot(&self, lookback: Duration) -> Vec<Event> {
        let Some(newest) = self.newest_timestamp else {
            return Vec::new();
        };
        let horizon = newest - lookback;
        self.events
            .iter()
            .filter(|e| e.timestamp >= horizon)
            .cloned()
            .collect()
    }
}

/// Thread-safe store of per-session windows.
pub struct SessionHistoryStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionWindow>>>>,
    config: HistoryConfig,
}

impl SessionHistoryStore {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Insert an event into its session's window, evicting expired entries.
    ///
    /// Out-of-order timestamps are accepted but flagged in the outcome and
    /// counted against the session.
    pub fn append(&self, event: Event) -> Result<AppendOutcome> {
        let session_id = event.session_id.clone();
        let window = self.session_entry(&session_id)?;
        let mut guard = window.lock().map_err(|_| DetectionError::LockPoisoned)?;
        let outcome = guard.append(event, &self.config);
        if outcome.out_of_order {
            warn!(
                session_id = %session_id,
                anomalies = guard.ordering_anomalies,
                "non-monotonic timestamp within session window"
            );
        }
        Ok(outcome)
    }

    /// Snapshot of the session's events within `lookback` of its newest
    /// event, in arrival order. Unknown sessions yield an empty window.
    pub fn window(&self, session_id: &str, lookback: Duration) -> Result<Vec<Event>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| DetectionError::LockPoisoned)?;
        let Some(window) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let guard = window.lock().map_err(|_| DetectionError::LockPoisoned)?;
        Ok(guard.snapshot(lookback))
    }

    /// Out-of-order appends observed for a session so far.
    pub fn ordering_anomalies(&self, session_id: &str) -> Result<u64> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| DetectionError::LockPoisoned)?;
        match sessions.get(session_id) {
            Some(window) => {
                let guard = window.lock().map_err(|_| DetectionError::LockPoisoned)?;
                Ok(guard.ordering_anomalies)
            }
            None => Ok(0),
        }
    }

    /// Drop sessions whose newest event is older than the idle TTL.
    pub fn evict_idle_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let ttl = Duration::seconds(self.config.idle_ttl_secs as i64);
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| DetectionError::LockPoisoned)?;
        let before = sessions.len();
        sessions.retain(|_, window| match window.lock() {
            Ok(guard) => match guard.newest_timestamp {
                Some(newest) => now - newest < ttl,
                None => true,
            },
            // A poisoned session is unusable; drop it rather than wedging.
            Err(_) => false,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "evicted idle sessions");
        }
        Ok(removed)
    }

    pub fn session_count(&self) -> Result<usize> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| DetectionError::LockPoisoned)?;
        Ok(sessions.len())
    }

    fn session_entry(&self, session_id: &str) -> Result<Arc<Mutex<SessionWindow>>> {
        {
            let sessions = self
                .sessions
                .read()
                .map_err(|_| DetectionError::LockPoisoned)?;
            if let Some(window) = sessions.get(session_id) {
                return Ok(window.clone());
            }
        }
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| DetectionError::LockPoisoned)?;
        Ok(sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionWindow::new())))
            .clone())
    }
}
