//! Interaction event types recorded by the events worker.
//!
//! Events carry free-form metadata (`app`, `url`, window titles, text
//! previews). Metadata is filtered by the privacy policy and redacted before
//! it is written anywhere.

use crate::privacy::PrivacySubject;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Interaction category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Keyboard,
    Mouse,
    Window,
    Clipboard,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Keyboard => "keyboard",
            EventCategory::Mouse => "mouse",
            EventCategory::Window => "window",
            EventCategory::Clipboard => "clipboard",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single interaction sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    /// Timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    /// What happened, e.g. `type`, `click`, `focus`
    pub action: String,
    /// UI element or window the action applied to
    pub target: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl InteractionEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        category: EventCategory,
        action: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            category,
            action: action.into(),
            target: target.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

impl PrivacySubject for InteractionEvent {
    fn app(&self) -> Option<&str> {
        self.metadata.app()
    }

    fn url(&self) -> Option<&str> {
        self.metadata.url()
    }
}

/// Events aggregated over one coarse interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoarseBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: usize,
    pub categories: BTreeMap<EventCategory, usize>,
}

impl CoarseBucket {
    fn new(start: DateTime<Utc>, interval: Duration) -> Self {
        let end = start + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
        Self {
            start,
            end,
            count: 0,
            categories: BTreeMap::new(),
        }
    }
}

/// Accumulates events into coarse buckets aligned to the interval.
#[derive(Debug)]
pub struct BucketAggregator {
    interval: Duration,
    buckets: BTreeMap<DateTime<Utc>, CoarseBucket>,
}

impl BucketAggregator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            buckets: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, event: &InteractionEvent) {
        let start = bucket_start(event.timestamp, self.interval);
        let interval = self.interval;
        let bucket = self
            .buckets
            .entry(start)
            .or_insert_with(|| CoarseBucket::new(start, interval));
        bucket.count += 1;
        *bucket.categories.entry(event.category).or_insert(0) += 1;
    }

    /// Buckets ordered by start time.
    pub fn finish(self) -> Vec<CoarseBucket> {
        self.buckets.into_values().collect()
    }
}

/// Truncate `ts` down to a multiple of `interval` since the Unix epoch.
fn bucket_start(ts: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_secs().max(1) as i64;
    let secs = ts.timestamp().div_euclid(step) * step;
    Utc.timestamp_opt(secs, 0).single().unwrap_or(ts)
}
