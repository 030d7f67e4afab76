use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ContextType {
    DeepWork,
    Exploration,
    Communication,
    Creative,
    Administrative,
    Leisure,
    Unknown,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::DeepWork => "deep_work",
            ContextType::Exploration => "exploration",
            ContextType::Communication => "communication",
            ContextType::Creative => "creative",
            ContextType::Administrative => "administrative",
            ContextType::Leisure => "leisure",
            ContextType::Unknown => "unknown",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        let parsed = match value {
            "deep_work" => ContextType::DeepWork,
            "exploration" => ContextType::Exploration,
            "communication" => ContextType::Communication,
            "creative" => ContextType::Creative,
            "administrative" => ContextType::Administrative,
            "leisure" => ContextType::Leisure,
            "unknown" => ContextType::Unknown,
            _ => return None,
        };
        Some(parsed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EdgeType {
    TransitionedTo,
    InterruptedBy,
    ResumedFrom,
    Spawned,
    Related,
    ParentChild,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::TransitionedTo => "transitioned_to",
            EdgeType::InterruptedBy => "interrupted_by",
            EdgeType::ResumedFrom => "resumed_from",
            EdgeType::Spawned => "spawned",
            EdgeType::Related => "related",
            EdgeType::ParentChild => "parent_child",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        let parsed = match value {
            "transitioned_to" => EdgeType::TransitionedTo,
            "interrupted_by" => EdgeType::InterruptedBy,
            "resumed_from" => EdgeType::ResumedFrom,
            "spawned" => EdgeType::Spawned,
            "related" => EdgeType::Related,
            "parent_child" => EdgeType::ParentChild,
            _ => return None,
        };
        Some(parsed)
    }
}

/// A semantic unit of work inferred from a trailing window of activity.
///
/// Only the context graph engine creates or mutates these; everyone else
/// reads snapshots or requests links by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextNode {
    pub id: String,
    pub label: String,
    pub context_type: ContextType,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub apps: BTreeSet<String>,
    /// Bounded recent list, newest last.
    pub window_titles: Vec<String>,
    pub event_count: u64,
    /// 0..=1, higher means fewer app switches in the trailing window.
    pub focus_score: f64,
    pub parent_context_id: Option<String>,
    pub related_context_ids: Vec<String>,
    pub clipboard_hashes: Vec<String>,
    pub screenshot_files: Vec<String>,
    pub note_ids: Vec<String>,
}

impl ContextNode {
    pub fn open(
        label: impl Into<String>,
        context_type: ContextType,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            context_type,
            started_at,
            ended_at: None,
            is_active: true,
            apps: BTreeSet::new(),
            window_titles: Vec::new(),
            event_count: 0,
            focus_score: 1.0,
            parent_context_id: None,
            related_context_ids: Vec::new(),
            clipboard_hashes: Vec::new(),
            screenshot_files: Vec::new(),
            note_ids: Vec::new(),
        }
    }

    pub fn close(&mut self, at: DateTime<Utc>) {
        self.ended_at = Some(at);
        self.is_active = false;
    }
}

/// Directed, timestamped relationship between two context nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEdge {
    pub id: String,
    pub from_context_id: String,
    pub to_context_id: String,
    pub edge_type: EdgeType,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl ContextEdge {
    pub fn link(
        from: &str,
        to: &str,
        edge_type: EdgeType,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_context_id: from.to_string(),
            to_context_id: to.to_string(),
            edge_type,
            created_at: at,
            metadata: serde_json::Value::Null,
        }
    }
}
