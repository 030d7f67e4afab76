//! Seam for the optional vision-based scene classifier.
//!
//! The core never requires it: absence is a missing capability, not an
//! error, and inference falls back to the static app-category table.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ContextType;

/// One classifier verdict, persisted to the `neural_values` table so the
/// model's behavior can be audited offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeuralSample {
    pub id: String,
    pub context_id: Option<String>,
    pub label: ContextType,
    pub confidence: f64,
    pub sampled_at: DateTime<Utc>,
}

impl NeuralSample {
    pub fn new(label: ContextType, confidence: f64, sampled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            context_id: None,
            label,
            confidence,
            sampled_at,
        }
    }
}

/// Pluggable classifier consulted only when the app table and the majority
/// vote both come up `Unknown`.
pub trait SceneClassifier: Send + Sync {
    /// Best guess for the current scene, with a 0..=1 confidence, or `None`
    /// when the classifier has no opinion.
    fn classify(
        &self,
        apps: &BTreeSet<String>,
        window_titles: &[String],
    ) -> Option<(ContextType, f64)>;
}
