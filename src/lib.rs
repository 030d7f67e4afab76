//! focustrace — desktop activity log and semantic context graph core.
//!
//! Platform observers publish raw signals onto one channel; the pipeline
//! normalizes and deduplicates them into immutable activity events, batches
//! those into SQLite through a buffered writer, tracks focus sessions and
//! distracted periods, and maintains a graph of inferred work contexts with
//! focus scores. [`ActivityMonitor`] ties it all together.
//!
//! ```no_run
//! use focustrace::{ActivityMonitor, Database, MonitorConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let db = Database::new("focustrace.sqlite3".into())?;
//! let monitor = ActivityMonitor::new(db, MonitorConfig::default());
//! let sender = monitor.start().await?;
//! sender.app_activated("com.example.editor", "Editor", None);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod db;
pub mod models;
pub mod monitor;
pub mod observers;
pub mod pipeline;
pub mod tracker;
pub mod utils;

pub use config::MonitorConfig;
pub use context::{ContextGraphEngine, GraphChange, NeuralSample, SceneClassifier};
pub use db::{ActivityStats, Database, TimelineBucket, TimelineRange};
pub use models::{
    ActivityEvent, ActivityEventType, ContextEdge, ContextNode, ContextType, DistractedPeriod,
    EdgeType, FocusSession, Sequence, SequenceStatus,
};
pub use monitor::{ActivityMonitor, MonitorStatus};
pub use observers::{FeatureTracker, IdleWatcher, RawSignal, SignalKind, SignalSender};
pub use pipeline::{EventSink, Normalizer, SaveErrorFlag};
pub use tracker::SessionTracker;

/// Initialize env_logger once, for binaries and integration tests that want
/// log output. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(false)
        .try_init();
}
