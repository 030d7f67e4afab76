//! Full-pipeline scenario: a focused editing stretch followed by a switch
//! to the browser, driven with explicit timestamps through the public
//! pieces and persisted to a real SQLite file.

use chrono::{DateTime, Duration, Utc};
use focustrace::pipeline::WriterState;
use focustrace::{
    ActivityEvent, ActivityEventType, ContextGraphEngine, ContextType, Database, EdgeType,
    GraphChange, MonitorConfig, Normalizer, RawSignal, SessionTracker, SignalKind,
};

struct Harness {
    _dir: tempfile::TempDir,
    db: Database,
    normalizer: Normalizer,
    tracker: SessionTracker,
    engine: ContextGraphEngine,
    writer: WriterState<Database>,
}

impl Harness {
    fn new() -> Self {
        let config = MonitorConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("e2e.sqlite3")).unwrap();
        let writer = WriterState::new(db.clone(), config.buffer_capacity, Default::default());
        Self {
            _dir: dir,
            db,
            normalizer: Normalizer::new(&config),
            tracker: SessionTracker::new(&config),
            engine: ContextGraphEngine::new(&config),
            writer,
        }
    }

    /// Feed one raw signal claiming to have happened at `at` through
    /// normalize → buffer → tracker → engine, flushing any
    /// capacity-triggered batch. Returns whether it was accepted.
    async fn feed(&mut self, kind: SignalKind, at: DateTime<Utc>) -> bool {
        let Some(event) = self
            .normalizer
            .normalize_at(RawSignal::at(at, kind), Utc::now())
        else {
            return false;
        };
        if let Some(distraction) = self.tracker.handle_event(&event) {
            self.append(distraction).await;
        }
        let changes = self.engine.handle_event(&event);
        self.persist(changes).await;
        self.append(event).await;
        true
    }

    async fn append(&mut self, event: ActivityEvent) {
        if self.writer.append(event) {
            self.writer.flush().await.unwrap();
        }
    }

    async fn infer(&mut self, at: DateTime<Utc>) -> Vec<GraphChange> {
        let changes = self.engine.run_inference(at);
        self.persist(changes.clone()).await;
        changes
    }

    async fn persist(&self, changes: Vec<GraphChange>) {
        for change in changes {
            match change {
                GraphChange::NodeCreated(node)
                | GraphChange::NodeUpdated(node)
                | GraphChange::NodeClosed(node) => {
                    self.db.upsert_context_node(&node).await.unwrap()
                }
                GraphChange::EdgeAdded(edge) => self.db.insert_context_edge(&edge).await.unwrap(),
                GraphChange::SampleRecorded(sample) => {
                    self.db.insert_neural_sample(&sample).await.unwrap()
                }
            }
        }
    }
}

fn activate(app: &str) -> SignalKind {
    SignalKind::AppActivated {
        app_identifier: format!("com.test.{}", app.to_lowercase()),
        app_name: app.to_string(),
        previous_app: None,
    }
}

#[tokio::test]
async fn focused_editing_then_browser_switch() {
    let mut h = Harness::new();
    let t0 = Utc::now() - Duration::seconds(600);

    // Editor comes up and gets four minutes of steady typing.
    assert!(
        h.feed(
            SignalKind::AppLaunched {
                app_identifier: "com.test.editor".into(),
                app_name: "Editor".into(),
            },
            t0,
        )
        .await
    );
    assert!(h.feed(activate("Editor"), t0).await);
    assert!(
        h.feed(
            SignalKind::WindowTitleChanged { title: Some("file.ts".into()) },
            t0 + Duration::seconds(1),
        )
        .await
    );

    let mut accepted_keys = 0;
    for i in 0..200 {
        let at = t0 + Duration::milliseconds(2_000 + i * 1_200);
        if h.feed(SignalKind::KeyPressed { descriptor: "a".into(), code: 0 }, at).await {
            accepted_keys += 1;
        }
    }
    assert_eq!(accepted_keys, 200, "spaced key presses all pass dedup");

    // Inference ticks during the stretch keep one Creative node alive.
    let mut editor_node_id = None;
    for i in 1..=8 {
        let changes = h.infer(t0 + Duration::seconds(30 * i)).await;
        for change in &changes {
            if let GraphChange::NodeCreated(node) = change {
                assert!(editor_node_id.is_none(), "only one node during the stretch");
                editor_node_id = Some(node.id.clone());
                assert_eq!(node.context_type, ContextType::Creative);
                assert_eq!(node.label, "Creating in Editor");
            }
        }
    }
    let editor_node_id = editor_node_id.expect("editing opened a context node");

    // The switch.
    assert!(h.feed(activate("Browser"), t0 + Duration::seconds(241)).await);

    // One meaningful session: the full editor stretch.
    let sessions = h.tracker.meaningful_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].app_name, "Editor");
    assert_eq!(sessions[0].duration().unwrap().num_seconds(), 241);
    assert_eq!(sessions[0].window_title.as_deref(), Some("file.ts"));
    assert_eq!(h.tracker.current_session().unwrap().app_name, "Browser");

    // Next inference closes the editing context with a high focus score and
    // opens an exploration context, linked by a transition edge.
    let changes = h.infer(t0 + Duration::seconds(270)).await;
    let mut closed = None;
    let mut created = None;
    let mut edge = None;
    for change in changes {
        match change {
            GraphChange::NodeClosed(node) => closed = Some(node),
            GraphChange::NodeCreated(node) => created = Some(node),
            GraphChange::EdgeAdded(e) => edge = Some(e),
            _ => {}
        }
    }

    let closed = closed.expect("editing context closed");
    assert_eq!(closed.id, editor_node_id);
    assert!(!closed.is_active);
    assert!(closed.focus_score > 0.8, "uninterrupted stretch scores high");
    assert!(closed.ended_at.unwrap() > closed.started_at);

    let created = created.expect("new context opened");
    assert_eq!(created.context_type, ContextType::Exploration);
    assert_eq!(created.label, "Browsing in Browser");

    let edge = edge.expect("transition recorded");
    assert_eq!(edge.from_context_id, editor_node_id);
    assert_eq!(edge.to_context_id, created.id);
    assert_eq!(edge.edge_type, EdgeType::TransitionedTo);

    // Everything is durable: all accepted events, both nodes, the edge.
    h.writer.flush().await.unwrap();
    let count = h
        .db
        .count_events_between(t0 - Duration::seconds(1), t0 + Duration::seconds(300))
        .await
        .unwrap();
    assert_eq!(count, 204, "launch + activate + title + 200 keys + switch");

    let nodes = h
        .db
        .context_nodes_between(t0 - Duration::seconds(1), t0 + Duration::seconds(300))
        .await
        .unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().any(|n| n.id == editor_node_id && !n.is_active));
    assert!(nodes.iter().any(|n| n.id == created.id && n.is_active));

    let edges = h.db.edges_from(&editor_node_id).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].to_context_id, created.id);
}

#[tokio::test]
async fn future_events_never_reach_the_store() {
    let mut h = Harness::new();
    let now = Utc::now();

    assert!(h.feed(activate("Editor"), now).await);
    assert!(
        !h.feed(activate("Browser"), now + Duration::hours(2)).await,
        "two hours of claimed clock skew is rejected"
    );

    h.writer.flush().await.unwrap();
    let events = h
        .db
        .events_between(now - Duration::seconds(1), now + Duration::hours(3))
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, ActivityEventType::AppActivate);
    assert_eq!(events[0].app_name.as_deref(), Some("Editor"));
}
