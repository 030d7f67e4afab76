use chrono::{DateTime, Utc};
use serde::Serialize;

/// Aggregates over a time range of the activity log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub event_count: i64,
    /// (event type, count), most frequent first.
    pub counts_by_type: Vec<(String, i64)>,
    /// (app name, event count), most frequent first, capped at ten.
    pub top_apps: Vec<(String, i64)>,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineRange {
    /// Hourly buckets since UTC midnight.
    Today,
    /// Daily buckets.
    Last7Days,
    /// Daily buckets.
    Last30Days,
}

/// One timeline bucket for the overview charts: when, how much, and what
/// dominated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineBucket {
    /// "2026-08-27" for daily buckets, "2026-08-27T14" for hourly ones.
    pub bucket: String,
    pub event_count: i64,
    pub top_app: Option<String>,
}
