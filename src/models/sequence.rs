use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SequenceStatus {
    Active,
    Completed,
    Aborted,
}

impl SequenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceStatus::Active => "active",
            SequenceStatus::Completed => "completed",
            SequenceStatus::Aborted => "aborted",
        }
    }
}

/// A deliberate bracket around a burst of related events, e.g. a guided
/// biofeedback capture. Events arriving while one is active get stamped
/// with its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    pub id: String,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SequenceStatus,
    pub metadata: serde_json::Value,
}

impl Sequence {
    pub fn start(kind: impl Into<String>, metadata: serde_json::Value, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            started_at: at,
            ended_at: None,
            status: SequenceStatus::Active,
            metadata,
        }
    }

    pub fn finish(&mut self, status: SequenceStatus, at: DateTime<Utc>) {
        self.status = status;
        self.ended_at = Some(at);
    }
}
