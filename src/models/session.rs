use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous span of attention on one app/window.
///
/// Starts live (no `ended_at`); the tracker closes it when focus moves.
/// Whether it ends up on the meaningful list or the switch list depends on
/// its duration against the configured floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSession {
    pub app_name: String,
    pub window_title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl FocusSession {
    pub fn begin(app_name: impl Into<String>, window_title: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            app_name: app_name.into(),
            window_title,
            started_at: at,
            ended_at: None,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// Derived, never directly observed: a stretch of rapid app hopping with
/// nothing settling into a real session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistractedPeriod {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub switch_count: usize,
}
