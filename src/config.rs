use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Every tunable in the pipeline, with the shipped defaults.
///
/// All durations are plain integers (milliseconds or seconds) so the struct
/// round-trips through JSON without custom serializers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    /// Reject events claiming to be further in the future than this.
    pub max_future_skew_secs: i64,
    /// Identical (type, app, title) signals inside this window are duplicates.
    pub dedup_window_ms: i64,
    /// Same-app re-activation inside this window is an OS double-fire.
    pub activation_debounce_ms: i64,
    /// Title changes this soon after a same-app activation are still settling.
    pub title_settle_ms: i64,
    /// Identical title repeats for the same app inside this window are dropped.
    pub title_repeat_ms: i64,

    /// Buffered writer flush cadence.
    pub flush_interval_secs: u64,
    /// Flush immediately once the buffer holds this many events.
    pub buffer_capacity: usize,
    /// Durability checkpoint cadence while monitoring is otherwise quiet.
    pub heartbeat_interval_secs: u64,

    /// A session at least this long counts as meaningful.
    pub meaningful_session_secs: i64,
    pub meaningful_sessions_cap: usize,
    pub recent_switches_cap: usize,
    /// Ring of (app, time) switch pairs kept for distraction detection.
    pub switch_ring_cap: usize,
    pub distraction_window_secs: i64,
    pub distraction_min_switches: usize,
    pub distracted_periods_cap: usize,

    /// Context inference cadence.
    pub inference_interval_secs: u64,
    /// Rolling activation buffer feeding inference.
    pub activation_buffer_cap: usize,
    /// Trailing window inference looks at.
    pub context_window_secs: i64,
    /// Switch count at which the focus score bottoms out at zero.
    pub focus_switch_ceiling: u32,
    pub window_titles_cap: usize,

    pub idle_check_interval_secs: u64,
    /// No input for this long means the user went idle.
    pub idle_threshold_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_future_skew_secs: 3600,
            dedup_window_ms: 500,
            activation_debounce_ms: 2000,
            title_settle_ms: 500,
            title_repeat_ms: 2000,

            flush_interval_secs: 12,
            buffer_capacity: 50,
            heartbeat_interval_secs: 300,

            meaningful_session_secs: 60,
            meaningful_sessions_cap: 50,
            recent_switches_cap: 20,
            switch_ring_cap: 20,
            distraction_window_secs: 300,
            distraction_min_switches: 3,
            distracted_periods_cap: 20,

            inference_interval_secs: 30,
            activation_buffer_cap: 50,
            context_window_secs: 300,
            focus_switch_ceiling: 10,
            window_titles_cap: 10,

            idle_check_interval_secs: 60,
            idle_threshold_secs: 300,
        }
    }
}

impl MonitorConfig {
    /// Load from a JSON file, falling back to defaults when the file is
    /// missing. A present-but-corrupt file is an error rather than a silent
    /// reset, so a typo never wipes someone's tuning.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("failed to write config to {}", path.display()))
    }
}
