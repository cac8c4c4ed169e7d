//! Feature extraction for the anomaly scorer.
//!
//! The vector layout here is the binding contract between training-time and
//! inference-time feature computation: any change to the field order or the
//! normalization is a breaking change for every trained scorer.

use chrono::{Duration, Timelike};
use serde::{Deserialize, Serialize};

use crate::detection::config::FeatureConfig;
use crate::detection::events::{Event, EventType};

/// Fixed-order numeric feature vector for one event in its session context.
///
/// Field order matches `FEATURE_NAMES` and `to_vector()` exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFeatures {
    // Event-type one-hot.
    pub is_clipboard_copy: f64,
    pub is_screenshot: f64,
    pub is_file_transfer: f64,
    // Size of the current event, in megabytes, split by type.
    pub clipboard_mb: f64,
    pub file_transfer_mb: f64,
    // Fraction of the day elapsed at the event timestamp.
    pub time_of_day: f64,
    // Windowed aggregates over the trailing feature window.
    pub clipboard_count_window: f64,
    pub screenshot_count_window: f64,
    pub file_transfer_count_window: f64,
    pub clipboard_volume_mb_window: f64,
    pub file_transfer_volume_mb_window: f64,
    /// Mean inter-arrival gap across the window, normalized by a 60s ceiling.
    /// 1.0 when the window holds fewer than two events.
    pub mean_interarrival: f64,
}

impl EventFeatures {
    pub const FEATURE_NAMES: [&'static str; 12] = [
        "is_clipboard_copy",
        "is_screenshot",
        "is_file_transfer",
        "clipboard_mb",
        "file_transfer_mb",
        "time_of_day",
        "clipboard_count_window",
        "screenshot_count_window",
        "file_transfer_count_window",
        "clipboard_volume_mb_window",
        "file_transfer_volume_mb_window",
        "mean_interarrival",
    ];

    pub fn dimension() -> usize {
        Self::FEATURE_NAMES.len()
    }

    pub fn to_vector(&self) -> Vec<f64> {
        vec![
            self.is_clipboard_copy,
            self.is_screenshot,
            self.is_file_transfer,
            self.clipboard_mb,
            self.file_transfer_mb,
            self.time_of_day,
            self.clipboard_count_window,
            self.screenshot_count_window,
            self.file_transfer_count_window,
            self.clipboard_volume_mb_window,
            self.file_transfer_volume_mb_window,
            self.mean_interarrival,
        ]
    }
}

/// Pure extractor: same `(event, window)` always yields the same vector.
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, event: &Event, window: &[Event]) -> EventFeatures {
        let span = Duration::seconds(self.config.window_secs as i64);
        let in_span: Vec<&Event> = window
            .iter()
            .filter(|e| {
                let delta = event.timestamp - e.timestamp;
                delta >= Duration::zero() && delta <= span
            })
            .collect();

        let count_of = |ty: EventType| in_span.iter().filter(|e| e.event_type == ty).count();
        let volume_mb_of = |ty: EventType| {
            in_span
                .iter()
                .filter(|e| e.event_type == ty)
                .map(|e| e.size_bytes as f64 / 1e6)
                .sum::<f64>()
        };

        let size_mb = event.size_bytes as f64 / 1e6;
        let seconds_of_day = f64::from(event.timestamp.num_seconds_from_midnight());

        EventFeatures {
            is_clipboard_copy: one_hot(event.event_type == EventType::ClipboardCopy),
            is_screenshot: one_hot(event.event_type == EventType::Screenshot),
            is_file_transfer: one_hot(event.event_type == EventType::FileTransfer),
            clipboard_mb: if event.event_type == EventType::ClipboardCopy {
                size_mb
            } else {
                0.0
            },
            file_transfer_mb: if event.event_type == EventType::FileTransfer {
                size_mb
            } else {
                0.0
            },
            time_of_day: seconds_of_day / 86_400.0,
            clipboard_count_window: count_of(EventType::ClipboardCopy) as f64 / 10.0,
            screenshot_count_window: count_of(EventType::Screenshot) as f64 / 10.0,
            file_transfer_count_window: count_of(EventType::FileTransfer) as f64 / 10.0,
            clipboard_volume_mb_window: volume_mb_of(EventType::ClipboardCopy),
            file_transfer_volume_mb_window: volume_mb_of(EventType::FileTransfer),
            mean_interarrival: mean_interarrival(&in_span),
        }
    }
}

fn one_hot(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}

/// Mean gap between consecutive events in arrival order, normalized by a 60s
/// ceiling so tight bursts score near 0.0 and sparse activity near 1.0.
fn mean_interarrival(events: &[&Event]) -> f64 {
    if events.len() < 2 {
        return 1.0;
    }
    let total: i64 = events
        .windows(2)
        .map(|pair| {
            (pair[1].timestamp - pair[0].timestamp)
                .num_milliseconds()
                .abs()
        })
        .sum();
    let mean_secs = total as f64 / 1000.0 / (events.len() - 1) as f64;
    (mean_secs / 60.0).min(1.0)
}
