//! The activity monitor: owns the whole pipeline and its task lifecycle.
//!
//! `start` hands out a [`SignalSender`] for platform observers and spawns
//! two workers: the event loop (normalize, fan out, schedule inference and
//! idle checks) and the buffered writer. All pipeline state lives behind
//! one mutex that is never held across an await; graph changes are carried
//! out of the lock and persisted afterward.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration as TokioDuration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::context::{ContextGraphEngine, GraphChange, SceneClassifier};
use crate::db::{ActivityStats, Database, TimelineBucket, TimelineRange};
use crate::models::{
    ActivityEvent, ContextNode, DistractedPeriod, FocusSession, Sequence, SequenceStatus,
};
use crate::observers::{FeatureTracker, IdleWatcher, RawSignal, SignalKind, SignalSender};
use crate::pipeline::{spawn_writer, Normalizer, WriterHandle};
use crate::tracker::SessionTracker;

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

/// Everything the pipeline mutates per event. One lock, taken briefly.
struct CoreState {
    normalizer: Normalizer,
    tracker: SessionTracker,
    engine: ContextGraphEngine,
    idle: IdleWatcher,
    active_sequence: Option<Sequence>,
    finished_sequences: Vec<Sequence>,
    last_event_at: Option<DateTime<Utc>>,
    events_accepted: u64,
}

impl CoreState {
    fn new(config: &MonitorConfig, classifier: Option<Box<dyn SceneClassifier>>) -> Self {
        let mut engine = ContextGraphEngine::new(config);
        if let Some(classifier) = classifier {
            engine = engine.with_classifier(classifier);
        }
        Self {
            normalizer: Normalizer::new(config),
            tracker: SessionTracker::new(config),
            engine,
            idle: IdleWatcher::new(config.idle_threshold_secs),
            active_sequence: None,
            finished_sequences: Vec::new(),
            last_event_at: None,
            events_accepted: 0,
        }
    }

    /// Run one signal through the pipeline. Returns the accepted events
    /// (the normalized one plus any synthesized distraction) and the graph
    /// changes to persist.
    fn apply_signal(
        &mut self,
        signal: RawSignal,
        now: DateTime<Utc>,
    ) -> (Vec<ActivityEvent>, Vec<GraphChange>) {
        let mut events = Vec::new();
        let mut changes = Vec::new();

        // Keyboard and mouse input feeds the idle watcher; input arriving
        // mid-idle synthesizes the IdleEnded transition first.
        if matches!(
            signal.kind,
            SignalKind::KeyPressed { .. }
                | SignalKind::MouseClicked { .. }
                | SignalKind::MouseMoved { .. }
                | SignalKind::MouseScrolled { .. }
        ) {
            if let Some(kind) = self.idle.note_input(signal.timestamp) {
                self.accept(
                    RawSignal::at(signal.timestamp, kind),
                    now,
                    &mut events,
                    &mut changes,
                );
            }
        }

        self.accept(signal, now, &mut events, &mut changes);
        (events, changes)
    }

    fn accept(
        &mut self,
        signal: RawSignal,
        now: DateTime<Utc>,
        events: &mut Vec<ActivityEvent>,
        changes: &mut Vec<GraphChange>,
    ) {
        let Some(event) = self.normalizer.normalize_at(signal, now) else {
            return;
        };

        if let Some(distraction) = self.tracker.handle_event(&event) {
            events.push(distraction);
        }
        changes.extend(self.engine.handle_event(&event));

        self.last_event_at = Some(event.timestamp);
        self.events_accepted += 1;
        events.push(event);
    }
}

/// Handles that exist only while monitoring is running.
struct Running {
    sender: SignalSender,
    writer: WriterHandle,
    cancel: CancellationToken,
    /// The writer's own token: it must outlive the event loop on shutdown
    /// so late appends from the draining loop still land.
    writer_cancel: CancellationToken,
    event_loop: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

/// Start/stop lifecycle. `Starting` claims the slot across the await in
/// [`ActivityMonitor::start`], so two concurrent starts cannot both spawn.
enum RunState {
    Stopped,
    Starting,
    Running(Running),
}

/// Snapshot of the monitor for status displays.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub running: bool,
    pub is_idle: bool,
    pub last_event_at: Option<DateTime<Utc>>,
    pub events_accepted: u64,
    pub save_error: bool,
    pub active_context: Option<String>,
}

pub struct ActivityMonitor {
    db: Database,
    config: MonitorConfig,
    state: Arc<Mutex<CoreState>>,
    running: Mutex<RunState>,
}

impl ActivityMonitor {
    pub fn new(db: Database, config: MonitorConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoreState::new(&config, None))),
            db,
            config,
            running: Mutex::new(RunState::Stopped),
        }
    }

    /// Same as [`new`](Self::new) but with a vision classifier plugged into
    /// the context engine for ambiguous scenes.
    pub fn with_classifier(
        db: Database,
        config: MonitorConfig,
        classifier: Box<dyn SceneClassifier>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoreState::new(&config, Some(classifier)))),
            db,
            config,
            running: Mutex::new(RunState::Stopped),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Start monitoring. Returns the sender observers publish raw signals
    /// to; call [`feature_tracker`](Self::feature_tracker) for the in-app
    /// hook flavor of the same channel.
    pub async fn start(&self) -> Result<SignalSender> {
        {
            let mut state = lock(&self.running);
            if !matches!(*state, RunState::Stopped) {
                bail!("monitor already running");
            }
            *state = RunState::Starting;
        }

        // A previous run may have crashed with nodes still open.
        let recovered = match self.db.close_dangling_nodes(Utc::now()).await {
            Ok(count) => count,
            Err(err) => {
                *lock(&self.running) = RunState::Stopped;
                return Err(err);
            }
        };
        if recovered > 0 {
            log_warn!("closed {recovered} context nodes left open by a previous run");
        }

        let cancel = CancellationToken::new();
        let writer_cancel = CancellationToken::new();
        let (writer, writer_task) =
            spawn_writer(self.db.clone(), &self.config, writer_cancel.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let sender = SignalSender::new(tx);

        let event_loop = tokio::spawn(event_loop(
            self.state.clone(),
            self.db.clone(),
            writer.clone(),
            rx,
            self.config.clone(),
            cancel.clone(),
        ));

        *lock(&self.running) = RunState::Running(Running {
            sender: sender.clone(),
            writer,
            cancel,
            writer_cancel,
            event_loop,
            writer_task,
        });

        log_info!("activity monitor started");
        Ok(sender)
    }

    /// Stop monitoring: drain and flush the pipeline, close the open
    /// session and context node, persist the final graph state.
    pub async fn stop(&self) {
        let running = {
            let mut state = lock(&self.running);
            match std::mem::replace(&mut *state, RunState::Stopped) {
                RunState::Running(running) => running,
                RunState::Starting => {
                    // A start is mid-flight; leave its claim alone.
                    *state = RunState::Starting;
                    return;
                }
                RunState::Stopped => return,
            }
        };

        // Stop the event loop first. The writer stays up on its own token
        // so every event the draining loop already accepted still lands.
        running.cancel.cancel();
        if let Err(err) = running.event_loop.await {
            log_error!("event loop task panicked: {err}");
        }

        let now = Utc::now();
        let changes = {
            let mut state = lock(&self.state);
            state.tracker.stop(now);
            if let Some(mut sequence) = state.active_sequence.take() {
                sequence.finish(SequenceStatus::Aborted, now);
                state.finished_sequences.push(sequence);
                state.normalizer.set_active_sequence(None);
            }
            state.engine.close_active(now)
        };
        self.persist(changes).await;

        // Final best-effort flush, then release the worker.
        running.writer.shutdown().await;
        running.writer_cancel.cancel();
        if let Err(err) = running.writer_task.await {
            log_error!("writer task panicked: {err}");
        }

        log_info!("activity monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.running), RunState::Running(_))
    }

    /// Sender for observers, if running.
    pub fn sender(&self) -> Option<SignalSender> {
        match &*lock(&self.running) {
            RunState::Running(running) => Some(running.sender.clone()),
            _ => None,
        }
    }

    /// In-app feature hooks publishing onto the same channel.
    pub fn feature_tracker(&self) -> Option<FeatureTracker> {
        self.sender().map(FeatureTracker::new)
    }

    pub fn status(&self) -> MonitorStatus {
        let running = lock(&self.running);
        let state = lock(&self.state);
        let active = match &*running {
            RunState::Running(running) => Some(running),
            _ => None,
        };
        MonitorStatus {
            running: active.is_some(),
            is_idle: state.idle.is_idle(),
            last_event_at: state.last_event_at,
            events_accepted: state.events_accepted,
            save_error: active
                .map(|r| r.writer.save_error().is_raised())
                .unwrap_or(false),
            active_context: state.engine.active_node().map(|n| n.label.clone()),
        }
    }

    pub fn dismiss_save_error(&self) {
        if let RunState::Running(running) = &*lock(&self.running) {
            running.writer.save_error().dismiss();
        }
    }

    // ---- sequences -------------------------------------------------------

    /// Open a sequence bracket; an already-active one is completed first.
    pub fn start_sequence(&self, kind: &str, metadata: serde_json::Value) -> Sequence {
        let now = Utc::now();
        let mut state = lock(&self.state);
        if let Some(mut previous) = state.active_sequence.take() {
            previous.finish(SequenceStatus::Completed, now);
            state.finished_sequences.push(previous);
        }
        let sequence = Sequence::start(kind, metadata, now);
        state
            .normalizer
            .set_active_sequence(Some(sequence.id.clone()));
        state.active_sequence = Some(sequence.clone());
        log_info!("sequence started: {} ({})", sequence.kind, sequence.id);
        sequence
    }

    pub fn end_sequence(&self, status: SequenceStatus) -> Option<Sequence> {
        let now = Utc::now();
        let mut state = lock(&self.state);
        let mut sequence = state.active_sequence.take()?;
        sequence.finish(status, now);
        state.normalizer.set_active_sequence(None);
        state.finished_sequences.push(sequence.clone());
        log_info!("sequence ended: {} ({})", sequence.kind, sequence.status.as_str());
        Some(sequence)
    }

    pub fn active_sequence(&self) -> Option<Sequence> {
        lock(&self.state).active_sequence.clone()
    }

    pub fn recent_sequences(&self) -> Vec<Sequence> {
        lock(&self.state).finished_sequences.clone()
    }

    // ---- session snapshots ----------------------------------------------

    pub fn current_session(&self) -> Option<FocusSession> {
        lock(&self.state).tracker.current_session().cloned()
    }

    pub fn meaningful_sessions(&self) -> Vec<FocusSession> {
        lock(&self.state)
            .tracker
            .meaningful_sessions()
            .iter()
            .cloned()
            .collect()
    }

    pub fn recent_switches(&self) -> Vec<FocusSession> {
        lock(&self.state)
            .tracker
            .recent_switches()
            .iter()
            .cloned()
            .collect()
    }

    pub fn distracted_periods(&self) -> Vec<DistractedPeriod> {
        lock(&self.state)
            .tracker
            .distracted_periods()
            .iter()
            .cloned()
            .collect()
    }

    // ---- context graph ---------------------------------------------------

    pub fn active_context_node(&self) -> Option<ContextNode> {
        lock(&self.state).engine.active_node().cloned()
    }

    /// One line for external agents asking "what is the user doing".
    pub fn context_summary(&self) -> String {
        lock(&self.state).engine.summary()
    }

    pub async fn link_clipboard_item(&self, hash: &str) {
        let change = lock(&self.state).engine.link_clipboard_item(hash);
        self.persist(change.into_iter().collect()).await;
    }

    pub async fn link_screenshot(&self, filename: &str) {
        let change = lock(&self.state).engine.link_screenshot(filename);
        self.persist(change.into_iter().collect()).await;
    }

    pub async fn link_note(&self, note_id: &str) {
        let change = lock(&self.state).engine.link_note(note_id);
        self.persist(change.into_iter().collect()).await;
    }

    // ---- queries ---------------------------------------------------------

    pub async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityEvent>> {
        self.db.events_between(start, end).await
    }

    pub async fn events_today(&self) -> Result<i64> {
        let now = Utc::now();
        self.db
            .count_events_between(crate::db::start_of_day(now), now)
            .await
    }

    pub async fn stats_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ActivityStats> {
        self.db.stats_between(start, end).await
    }

    pub async fn timeline(&self, range: TimelineRange) -> Result<Vec<TimelineBucket>> {
        self.db.timeline(range, Utc::now()).await
    }

    async fn persist(&self, changes: Vec<GraphChange>) {
        persist_changes(&self.db, changes).await;
    }
}

/// Mutex guard that survives a poisoned lock; pipeline state stays usable
/// even if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Graph changes are persisted one by one, immediately. A failed write is
/// logged and skipped; the in-memory graph remains the source of truth and
/// the next update retries the same row.
async fn persist_changes(db: &Database, changes: Vec<GraphChange>) {
    for change in changes {
        let result = match &change {
            GraphChange::NodeCreated(node)
            | GraphChange::NodeUpdated(node)
            | GraphChange::NodeClosed(node) => db.upsert_context_node(node).await,
            GraphChange::EdgeAdded(edge) => db.insert_context_edge(edge).await,
            GraphChange::SampleRecorded(sample) => db.insert_neural_sample(sample).await,
        };
        if let Err(err) = result {
            log_error!("failed to persist graph change: {err:#}");
        }
    }
}

async fn event_loop(
    state: Arc<Mutex<CoreState>>,
    db: Database,
    writer: WriterHandle,
    mut rx: mpsc::UnboundedReceiver<RawSignal>,
    config: MonitorConfig,
    cancel: CancellationToken,
) {
    let mut inference_tick = time::interval(TokioDuration::from_secs(config.inference_interval_secs));
    inference_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut idle_tick = time::interval(TokioDuration::from_secs(config.idle_check_interval_secs));
    idle_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            signal = rx.recv() => {
                let Some(signal) = signal else { break };
                let (events, changes) = lock(&state).apply_signal(signal, Utc::now());
                for event in events {
                    writer.append(event);
                }
                persist_changes(&db, changes).await;
            }
            _ = inference_tick.tick() => {
                let changes = lock(&state).engine.run_inference(Utc::now());
                persist_changes(&db, changes).await;
            }
            _ = idle_tick.tick() => {
                let now = Utc::now();
                let idle_started = lock(&state).idle.check(now);
                if let Some(kind) = idle_started {
                    let (events, changes) = lock(&state).apply_signal(RawSignal::at(now, kind), now);
                    for event in events {
                        writer.append(event);
                    }
                    persist_changes(&db, changes).await;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    log_info!("event loop shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivityEventType;
    use chrono::Duration;

    fn monitor() -> (tempfile::TempDir, ActivityMonitor) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("monitor.sqlite3")).unwrap();
        (dir, ActivityMonitor::new(db, MonitorConfig::default()))
    }

    fn activate(app: &str, at: DateTime<Utc>) -> RawSignal {
        RawSignal::at(
            at,
            SignalKind::AppActivated {
                app_identifier: format!("com.test.{app}"),
                app_name: app.to_string(),
                previous_app: None,
            },
        )
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let (_dir, m) = monitor();
        m.start().await.unwrap();
        assert!(m.start().await.is_err());
        m.stop().await;
        assert!(!m.is_running());

        // And it can start again after a stop.
        m.start().await.unwrap();
        m.stop().await;
    }

    #[tokio::test]
    async fn stop_flushes_pending_events() {
        let (_dir, m) = monitor();
        let sender = m.start().await.unwrap();

        let t0 = Utc::now();
        sender.send(activate("Editor", t0));
        sender.send(RawSignal::at(
            t0 + Duration::seconds(1),
            SignalKind::KeyPressed { descriptor: "a".into(), code: 0 },
        ));

        // Give the event loop a moment to drain the channel.
        time::sleep(TokioDuration::from_millis(50)).await;
        m.stop().await;

        let count = m
            .events_between(t0 - Duration::seconds(1), t0 + Duration::seconds(60))
            .await
            .unwrap()
            .len();
        assert_eq!(count, 2, "buffered events must survive a stop");
    }

    #[tokio::test]
    async fn stop_persists_every_accepted_event() {
        let (_dir, m) = monitor();
        let sender = m.start().await.unwrap();

        // A burst much larger than the buffer, spaced wide enough to pass
        // dedup, with stop() racing the drain. The writer must outlive the
        // event loop, so whatever the loop accepted reaches the store.
        let t0 = Utc::now() - Duration::seconds(400);
        for i in 0..300 {
            sender.send(RawSignal::at(
                t0 + Duration::milliseconds(i * 600),
                SignalKind::KeyPressed { descriptor: "a".into(), code: 0 },
            ));
        }
        m.stop().await;

        let accepted = m.status().events_accepted as usize;
        let stored = m
            .events_between(t0 - Duration::seconds(1), t0 + Duration::seconds(400))
            .await
            .unwrap()
            .len();
        assert_eq!(stored, accepted, "every accepted event reaches the store");
    }

    #[tokio::test]
    async fn concurrent_starts_admit_exactly_one() {
        let (_dir, m) = monitor();
        let (first, second) = tokio::join!(m.start(), m.start());
        assert!(first.is_ok() != second.is_ok(), "exactly one start wins");
        m.stop().await;
        assert!(!m.is_running());
    }

    #[tokio::test]
    async fn status_reflects_accepted_events() {
        let (_dir, m) = monitor();
        let sender = m.start().await.unwrap();

        let before = m.status();
        assert!(before.running);
        assert_eq!(before.events_accepted, 0);
        assert!(before.last_event_at.is_none());

        sender.send(activate("Editor", Utc::now()));
        time::sleep(TokioDuration::from_millis(50)).await;

        let after = m.status();
        assert_eq!(after.events_accepted, 1);
        assert!(after.last_event_at.is_some());
        m.stop().await;
        assert!(!m.status().running);
    }

    #[tokio::test]
    async fn sequence_brackets_stamp_events() {
        let (_dir, m) = monitor();
        let sender = m.start().await.unwrap();

        let seq = m.start_sequence("breathing", serde_json::json!({"pattern": "4-7-8"}));
        let t0 = Utc::now();
        sender.send(activate("Editor", t0));
        time::sleep(TokioDuration::from_millis(50)).await;

        let ended = m.end_sequence(SequenceStatus::Completed).unwrap();
        assert_eq!(ended.id, seq.id);
        assert_eq!(ended.status, SequenceStatus::Completed);
        assert!(m.active_sequence().is_none());

        sender.send(activate("Browser", Utc::now()));
        time::sleep(TokioDuration::from_millis(50)).await;
        m.stop().await;

        let events = m
            .events_between(t0 - Duration::seconds(1), t0 + Duration::seconds(60))
            .await
            .unwrap();
        let stamped: Vec<_> = events
            .iter()
            .filter(|e| e.sequence_id.as_deref() == Some(seq.id.as_str()))
            .collect();
        assert_eq!(stamped.len(), 1, "only the in-bracket event carries the id");
    }

    #[tokio::test]
    async fn starting_a_second_sequence_completes_the_first() {
        let (_dir, m) = monitor();
        m.start().await.unwrap();

        let first = m.start_sequence("breathing", serde_json::Value::Null);
        let second = m.start_sequence("capture", serde_json::Value::Null);
        assert_ne!(first.id, second.id);
        assert_eq!(m.active_sequence().unwrap().id, second.id);
        m.stop().await;
    }

    #[tokio::test]
    async fn distraction_event_reaches_the_log() {
        let (_dir, m) = monitor();
        let sender = m.start().await.unwrap();

        // Hop between apps for long enough to trip detection. Timestamps
        // are in the past so the skew guard is happy.
        let t0 = Utc::now() - Duration::seconds(600);
        for i in 0..8 {
            let app = if i % 2 == 0 { "A" } else { "B" };
            sender.send(activate(app, t0 + Duration::seconds(50 * i)));
        }

        time::sleep(TokioDuration::from_millis(100)).await;
        m.stop().await;

        let events = m
            .events_between(t0, t0 + Duration::seconds(3600))
            .await
            .unwrap();
        let distractions = events
            .iter()
            .filter(|e| e.event_type == ActivityEventType::Distraction)
            .count();
        assert_eq!(distractions, 1);
        assert_eq!(m.distracted_periods().len(), 1);
    }

    #[tokio::test]
    async fn stop_closes_session_and_context() {
        let (_dir, m) = monitor();
        let sender = m.start().await.unwrap();

        let t0 = Utc::now() - Duration::seconds(300);
        sender.send(activate("Editor", t0));
        time::sleep(TokioDuration::from_millis(50)).await;
        assert!(m.current_session().is_some());

        m.stop().await;
        assert!(m.current_session().is_none());
        assert_eq!(m.meaningful_sessions().len(), 1);
    }
}
