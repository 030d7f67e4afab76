//! Context graph engine.
//!
//! Consumes the normalized event stream on a slow cadence, infers the
//! dominant app and a semantic context type over a trailing window, scores
//! focus, and maintains the graph of context nodes and transition edges.
//! Nodes live in an id-indexed arena; "active" is a single id into it, and
//! this engine is the only component that creates or mutates nodes and
//! edges. Mutations come back to the caller as [`GraphChange`] values so
//! they can be persisted immediately — graph writes are rare and must not
//! be lost to batching.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::config::MonitorConfig;
use crate::models::{
    ActivityEvent, ActivityEventType, ContextEdge, ContextNode, ContextType, EdgeType,
};

use super::categories::{category_for, label_for};
use super::classifier::{NeuralSample, SceneClassifier};

const ENABLE_LOGS: bool = true;
use crate::log_info;

/// A graph mutation the caller must persist.
#[derive(Debug, Clone)]
pub enum GraphChange {
    NodeCreated(ContextNode),
    NodeUpdated(ContextNode),
    NodeClosed(ContextNode),
    EdgeAdded(ContextEdge),
    SampleRecorded(NeuralSample),
}

#[derive(Debug, Clone)]
struct Activation {
    app_identifier: String,
    app_name: String,
    at: DateTime<Utc>,
}

pub struct ContextGraphEngine {
    window: Duration,
    activation_cap: usize,
    focus_switch_ceiling: f64,
    titles_cap: usize,

    /// Rolling buffer of recent app activations feeding inference.
    activations: VecDeque<Activation>,
    /// Arena of every node seen this run, keyed by id.
    nodes: HashMap<String, ContextNode>,
    active: Option<String>,
    classifier: Option<Box<dyn SceneClassifier>>,
}

impl ContextGraphEngine {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            window: Duration::seconds(config.context_window_secs),
            activation_cap: config.activation_buffer_cap,
            focus_switch_ceiling: config.focus_switch_ceiling as f64,
            titles_cap: config.window_titles_cap,
            activations: VecDeque::new(),
            nodes: HashMap::new(),
            active: None,
            classifier: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn SceneClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn active_node(&self) -> Option<&ContextNode> {
        self.active.as_deref().and_then(|id| self.nodes.get(id))
    }

    pub fn node(&self, id: &str) -> Option<&ContextNode> {
        self.nodes.get(id)
    }

    /// Fast-path update between inference ticks: activations and title
    /// changes keep the active node's app set, title list, and counter
    /// current.
    pub fn handle_event(&mut self, event: &ActivityEvent) -> Vec<GraphChange> {
        match event.event_type {
            ActivityEventType::AppActivate => {
                if let (Some(id), Some(name)) = (&event.app_identifier, &event.app_name) {
                    self.activations.push_back(Activation {
                        app_identifier: id.clone(),
                        app_name: name.clone(),
                        at: event.timestamp,
                    });
                    while self.activations.len() > self.activation_cap {
                        self.activations.pop_front();
                    }
                }

                let Some(active_id) = self.active.clone() else {
                    return Vec::new();
                };
                let Some(node) = self.nodes.get_mut(&active_id) else {
                    return Vec::new();
                };
                if let Some(id) = &event.app_identifier {
                    node.apps.insert(id.clone());
                }
                node.event_count += 1;
                vec![GraphChange::NodeUpdated(node.clone())]
            }
            ActivityEventType::WindowTitleChanged => {
                let Some(active_id) = self.active.clone() else {
                    return Vec::new();
                };
                let Some(node) = self.nodes.get_mut(&active_id) else {
                    return Vec::new();
                };
                if let Some(title) = &event.window_title {
                    if node.window_titles.last() != Some(title) {
                        node.window_titles.push(title.clone());
                        let overflow = node.window_titles.len().saturating_sub(self.titles_cap);
                        if overflow > 0 {
                            node.window_titles.drain(..overflow);
                        }
                    }
                }
                node.event_count += 1;
                vec![GraphChange::NodeUpdated(node.clone())]
            }
            _ => Vec::new(),
        }
    }

    /// One inference cycle over the trailing window. Skipped entirely when
    /// no activations fall inside it.
    pub fn run_inference(&mut self, now: DateTime<Utc>) -> Vec<GraphChange> {
        let cutoff = now - self.window;
        let windowed: Vec<Activation> = self
            .activations
            .iter()
            .filter(|a| a.at >= cutoff && a.at <= now)
            .cloned()
            .collect();
        if windowed.is_empty() {
            return Vec::new();
        }

        let (dominant_id, dominant_name) = dominant_app(&windowed);
        let current_apps: BTreeSet<String> = windowed
            .iter()
            .map(|a| a.app_identifier.clone())
            .collect();

        let mut changes = Vec::new();
        let mut inferred = self.infer_type(&dominant_id, &dominant_name, &windowed);

        // Ambiguous scene: ask the optional classifier, if one is plugged in.
        if inferred == ContextType::Unknown {
            if let Some(classifier) = &self.classifier {
                let titles = self
                    .active_node()
                    .map(|n| n.window_titles.clone())
                    .unwrap_or_default();
                if let Some((label, confidence)) = classifier.classify(&current_apps, &titles) {
                    let mut sample = NeuralSample::new(label, confidence, now);
                    sample.context_id = self.active.clone();
                    changes.push(GraphChange::SampleRecorded(sample));
                    inferred = label;
                }
            }
        }

        let focus = self.focus_score(&windowed);

        if let Some(active_id) = self.active.clone() {
            if self.continues(&active_id, inferred, &current_apps) {
                let node = self
                    .nodes
                    .get_mut(&active_id)
                    .expect("active id always resolves in the arena");
                node.apps.extend(current_apps);
                node.event_count += 1;
                node.focus_score = (node.focus_score + focus) / 2.0;
                changes.push(GraphChange::NodeUpdated(node.clone()));
                return changes;
            }

            // Context changed: close the old node, open the new one, and
            // record the transition.
            let closed = self.close_node(&active_id, now);
            let new_node = self.open_node(inferred, &dominant_name, current_apps, focus, now);
            let edge = ContextEdge::link(&active_id, &new_node.id, EdgeType::TransitionedTo, now);
            if let Some(closed) = closed {
                changes.push(GraphChange::NodeClosed(closed));
            }
            changes.push(GraphChange::NodeCreated(new_node));
            changes.push(GraphChange::EdgeAdded(edge));
            return changes;
        }

        let node = self.open_node(inferred, &dominant_name, current_apps, focus, now);
        changes.push(GraphChange::NodeCreated(node));
        changes
    }

    /// Close the active node, e.g. when monitoring stops.
    pub fn close_active(&mut self, at: DateTime<Utc>) -> Vec<GraphChange> {
        let Some(active_id) = self.active.clone() else {
            return Vec::new();
        };
        match self.close_node(&active_id, at) {
            Some(node) => vec![GraphChange::NodeClosed(node)],
            None => Vec::new(),
        }
    }

    pub fn link_clipboard_item(&mut self, hash: &str) -> Option<GraphChange> {
        self.link_artifact(|node| &mut node.clipboard_hashes, hash)
    }

    pub fn link_screenshot(&mut self, filename: &str) -> Option<GraphChange> {
        self.link_artifact(|node| &mut node.screenshot_files, filename)
    }

    pub fn link_note(&mut self, note_id: &str) -> Option<GraphChange> {
        self.link_artifact(|node| &mut node.note_ids, note_id)
    }

    /// One line for external agents asking "what is the user doing".
    pub fn summary(&self) -> String {
        match self.active_node() {
            Some(node) => format!(
                "{} ({}, focus {:.2}, {} apps, {} events since {})",
                node.label,
                node.context_type.as_str(),
                node.focus_score,
                node.apps.len(),
                node.event_count,
                node.started_at.format("%H:%M"),
            ),
            None => "No active context".to_string(),
        }
    }

    fn link_artifact<F>(&mut self, list: F, value: &str) -> Option<GraphChange>
    where
        F: FnOnce(&mut ContextNode) -> &mut Vec<String>,
    {
        let active_id = self.active.clone()?;
        let node = self.nodes.get_mut(&active_id)?;
        let links = list(node);
        if !links.iter().any(|existing| existing == value) {
            links.push(value.to_string());
            return Some(GraphChange::NodeUpdated(node.clone()));
        }
        None
    }

    fn infer_type(
        &self,
        dominant_id: &str,
        dominant_name: &str,
        windowed: &[Activation],
    ) -> ContextType {
        if let Some(category) = category_for(Some(dominant_id), Some(dominant_name)) {
            return category;
        }

        // Majority vote over the categories of every app in the window.
        let mut votes: HashMap<ContextType, usize> = HashMap::new();
        let mut seen = BTreeSet::new();
        for activation in windowed {
            if !seen.insert(activation.app_identifier.clone()) {
                continue;
            }
            if let Some(category) = category_for(
                Some(&activation.app_identifier),
                Some(&activation.app_name),
            ) {
                *votes.entry(category).or_insert(0) += 1;
            }
        }
        votes
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(category, _)| category)
            .unwrap_or(ContextType::Unknown)
    }

    /// Fewer app-to-app switches in the window means higher focus.
    fn focus_score(&self, windowed: &[Activation]) -> f64 {
        let switches = windowed
            .windows(2)
            .filter(|pair| pair[0].app_identifier != pair[1].app_identifier)
            .count() as f64;
        (1.0 - switches / self.focus_switch_ceiling).max(0.0)
    }

    /// The active node continues when the type matches and the known apps
    /// cover more than half of the current set. The comparison is strict:
    /// a size-one current set continues only if its app is already in the
    /// node, so a window of apps the node never saw cannot keep it alive.
    fn continues(
        &self,
        active_id: &str,
        inferred: ContextType,
        current_apps: &BTreeSet<String>,
    ) -> bool {
        let Some(node) = self.nodes.get(active_id) else {
            return false;
        };
        if node.context_type != inferred {
            return false;
        }
        let overlap = node.apps.intersection(current_apps).count();
        overlap * 2 > current_apps.len()
    }

    fn open_node(
        &mut self,
        context_type: ContextType,
        dominant_name: &str,
        apps: BTreeSet<String>,
        focus: f64,
        now: DateTime<Utc>,
    ) -> ContextNode {
        let mut node = ContextNode::open(label_for(context_type, dominant_name), context_type, now);
        node.apps = apps;
        node.focus_score = focus;
        node.event_count = 1;
        log_info!("context opened: {}", node.label);
        self.active = Some(node.id.clone());
        self.nodes.insert(node.id.clone(), node.clone());
        node
    }

    fn close_node(&mut self, id: &str, at: DateTime<Utc>) -> Option<ContextNode> {
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        let node = self.nodes.get_mut(id)?;
        node.close(at);
        log_info!("context closed: {}", node.label);
        Some(node.clone())
    }
}

/// Highest activation count wins; ties go to the most recently activated
/// app so a fresh switch is not drowned out by stale history.
fn dominant_app(windowed: &[Activation]) -> (String, String) {
    let mut counts: HashMap<&str, (usize, DateTime<Utc>, &str)> = HashMap::new();
    for activation in windowed {
        let entry = counts
            .entry(activation.app_identifier.as_str())
            .or_insert((0, activation.at, activation.app_name.as_str()));
        entry.0 += 1;
        if activation.at > entry.1 {
            entry.1 = activation.at;
        }
    }
    let (id, (_, _, name)) = counts
        .into_iter()
        .max_by_key(|(_, (count, last, _))| (*count, *last))
        .expect("dominant_app requires a non-empty window");
    (id.to_string(), name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ContextGraphEngine {
        ContextGraphEngine::new(&MonitorConfig::default())
    }

    fn activate(app: &str, at: DateTime<Utc>) -> ActivityEvent {
        let mut event = ActivityEvent::new(ActivityEventType::AppActivate, at);
        event.app_identifier = Some(format!("com.test.{}", app.to_lowercase()));
        event.app_name = Some(app.to_string());
        event
    }

    fn created_node(changes: &[GraphChange]) -> Option<&ContextNode> {
        changes.iter().find_map(|c| match c {
            GraphChange::NodeCreated(node) => Some(node),
            _ => None,
        })
    }

    #[test]
    fn empty_window_skips_cycle() {
        let mut e = engine();
        assert!(e.run_inference(Utc::now()).is_empty());

        // An old activation outside the window also does nothing.
        let t0 = Utc::now();
        e.handle_event(&activate("Editor", t0 - Duration::seconds(600)));
        assert!(e.run_inference(t0).is_empty());
    }

    #[test]
    fn first_inference_opens_a_typed_node() {
        let mut e = engine();
        let t0 = Utc::now();
        e.handle_event(&activate("Editor", t0));

        let changes = e.run_inference(t0 + Duration::seconds(30));
        let node = created_node(&changes).expect("node created");
        assert_eq!(node.context_type, ContextType::Creative);
        assert_eq!(node.label, "Creating in Editor");
        assert!((node.focus_score - 1.0).abs() < f64::EPSILON);
        assert!(e.active_node().is_some());
    }

    #[test]
    fn more_switches_never_raise_focus() {
        let e = engine();
        let t0 = Utc::now();
        let mut last = 1.0_f64;
        for switches in 0..12 {
            let mut window = Vec::new();
            for i in 0..=switches {
                window.push(Activation {
                    app_identifier: format!("app{}", i % 2),
                    app_name: format!("App{}", i % 2),
                    at: t0 + Duration::seconds(i as i64),
                });
            }
            let score = e.focus_score(&window);
            assert!(score <= last, "switches={switches} raised the score");
            assert!((0.0..=1.0).contains(&score));
            last = score;
        }
        assert_eq!(last, 0.0, "score bottoms out at the ceiling");
    }

    #[test]
    fn matching_ticks_mutate_the_same_node() {
        let mut e = engine();
        let t0 = Utc::now();
        e.handle_event(&activate("Editor", t0));

        let changes = e.run_inference(t0 + Duration::seconds(30));
        let node_id = created_node(&changes).unwrap().id.clone();

        let changes = e.run_inference(t0 + Duration::seconds(60));
        assert_eq!(changes.len(), 1);
        match &changes[0] {
            GraphChange::NodeUpdated(node) => assert_eq!(node.id, node_id),
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(e.active_node().unwrap().id, node_id);
    }

    #[test]
    fn type_change_closes_creates_and_links() {
        let mut e = engine();
        let t0 = Utc::now();
        e.handle_event(&activate("Editor", t0));
        e.run_inference(t0 + Duration::seconds(30));
        let old_id = e.active_node().unwrap().id.clone();

        // Communication takes over the window.
        for i in 0..3 {
            e.handle_event(&activate("Slack", t0 + Duration::seconds(40 + i)));
        }
        let changes = e.run_inference(t0 + Duration::seconds(60));

        let mut closed = None;
        let mut created = None;
        let mut edge = None;
        for change in &changes {
            match change {
                GraphChange::NodeClosed(node) => closed = Some(node.clone()),
                GraphChange::NodeCreated(node) => created = Some(node.clone()),
                GraphChange::EdgeAdded(e) => edge = Some(e.clone()),
                _ => {}
            }
        }

        let closed = closed.expect("old node closed");
        let created = created.expect("new node created");
        let edge = edge.expect("exactly one transition edge");
        assert_eq!(closed.id, old_id);
        assert!(!closed.is_active);
        assert!(closed.ended_at.is_some());
        assert_eq!(created.context_type, ContextType::Communication);
        assert_eq!(edge.from_context_id, old_id);
        assert_eq!(edge.to_context_id, created.id);
        assert_eq!(edge.edge_type, EdgeType::TransitionedTo);
    }

    #[test]
    fn single_app_window_does_not_flip_established_context() {
        let mut e = engine();
        let t0 = Utc::now();
        e.handle_event(&activate("Editor", t0));
        e.run_inference(t0 + Duration::seconds(30));
        let node_id = e.active_node().unwrap().id.clone();

        // Only the editor keeps showing up: the size-one current set
        // overlaps fully and the node persists.
        e.handle_event(&activate("Editor", t0 + Duration::seconds(45)));
        e.run_inference(t0 + Duration::seconds(60));
        assert_eq!(e.active_node().unwrap().id, node_id);

        // A lone same-type app is absorbed rather than opening a rival
        // node: the fast path already unioned it into the active set by
        // the time the tick runs.
        let mut xcode = activate("Xcode", t0 + Duration::seconds(400));
        xcode.app_identifier = Some("com.apple.dt.xcode".into());
        e.handle_event(&xcode);
        let changes = e.run_inference(t0 + Duration::seconds(420));
        assert!(created_node(&changes).is_none());
        assert_eq!(e.active_node().unwrap().id, node_id);

        // A lone differently-typed app still transitions.
        e.handle_event(&activate("Slack", t0 + Duration::seconds(800)));
        let changes = e.run_inference(t0 + Duration::seconds(820));
        let created = created_node(&changes).expect("type change opens a new node");
        assert_eq!(created.context_type, ContextType::Communication);
    }

    #[test]
    fn discrete_events_update_node_between_ticks() {
        let mut e = engine();
        let t0 = Utc::now();
        e.handle_event(&activate("Editor", t0));
        e.run_inference(t0 + Duration::seconds(30));
        let before = e.active_node().unwrap().event_count;

        let mut title = ActivityEvent::new(
            ActivityEventType::WindowTitleChanged,
            t0 + Duration::seconds(35),
        );
        title.app_identifier = Some("com.test.editor".into());
        title.app_name = Some("Editor".into());
        title.window_title = Some("file.ts".into());
        let changes = e.handle_event(&title);
        assert_eq!(changes.len(), 1);

        let node = e.active_node().unwrap();
        assert_eq!(node.event_count, before + 1);
        assert_eq!(node.window_titles, vec!["file.ts".to_string()]);
    }

    #[test]
    fn title_list_is_bounded() {
        let mut e = engine();
        let t0 = Utc::now();
        e.handle_event(&activate("Editor", t0));
        e.run_inference(t0 + Duration::seconds(30));

        for i in 0..15 {
            let mut title = ActivityEvent::new(
                ActivityEventType::WindowTitleChanged,
                t0 + Duration::seconds(31 + i),
            );
            title.app_identifier = Some("com.test.editor".into());
            title.window_title = Some(format!("file{i}.ts"));
            e.handle_event(&title);
        }

        let node = e.active_node().unwrap();
        assert_eq!(node.window_titles.len(), 10);
        assert_eq!(node.window_titles.last().unwrap(), "file14.ts");
    }

    #[test]
    fn linking_is_idempotent_and_needs_an_active_node() {
        let mut e = engine();
        assert!(e.link_clipboard_item("hash-1").is_none(), "no active node");

        let t0 = Utc::now();
        e.handle_event(&activate("Editor", t0));
        e.run_inference(t0 + Duration::seconds(30));

        assert!(e.link_clipboard_item("hash-1").is_some());
        assert!(e.link_clipboard_item("hash-1").is_none(), "duplicate link");
        assert!(e.link_screenshot("shot.png").is_some());
        assert!(e.link_note("note-9").is_some());

        let node = e.active_node().unwrap();
        assert_eq!(node.clipboard_hashes, vec!["hash-1".to_string()]);
        assert_eq!(node.screenshot_files, vec!["shot.png".to_string()]);
        assert_eq!(node.note_ids, vec!["note-9".to_string()]);
    }

    #[test]
    fn unknown_scene_consults_classifier() {
        struct AlwaysLeisure;
        impl SceneClassifier for AlwaysLeisure {
            fn classify(
                &self,
                _apps: &BTreeSet<String>,
                _titles: &[String],
            ) -> Option<(ContextType, f64)> {
                Some((ContextType::Leisure, 0.7))
            }
        }

        let mut e = engine().with_classifier(Box::new(AlwaysLeisure));
        let t0 = Utc::now();
        let mut mystery = ActivityEvent::new(ActivityEventType::AppActivate, t0);
        mystery.app_identifier = Some("com.example.opaque".into());
        mystery.app_name = Some("Mystery".into());
        e.handle_event(&mystery);

        let changes = e.run_inference(t0 + Duration::seconds(30));
        assert!(changes
            .iter()
            .any(|c| matches!(c, GraphChange::SampleRecorded(s) if s.label == ContextType::Leisure)));
        assert_eq!(e.active_node().unwrap().context_type, ContextType::Leisure);
    }

    #[test]
    fn summary_reads_like_a_sentence() {
        let mut e = engine();
        assert_eq!(e.summary(), "No active context");

        let t0 = Utc::now();
        e.handle_event(&activate("Editor", t0));
        e.run_inference(t0 + Duration::seconds(30));
        let summary = e.summary();
        assert!(summary.starts_with("Creating in Editor"));
        assert!(summary.contains("focus"));
    }
}
