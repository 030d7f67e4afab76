//! Turns heterogeneous observer signals into `ActivityEvent`s, or drops
//! them. Drop rules run in a fixed order: clock-skew guard, generic dedup,
//! activation debounce, title settling, title repeat. Nothing here touches
//! the store.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::MonitorConfig;
use crate::models::{ActivityEvent, ActivityEventType};
use crate::observers::{FeatureAction, RawSignal, SignalKind};

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_trace};

/// (type, app, title) tuple identifying near-duplicate signals.
type DedupKey = (ActivityEventType, Option<String>, Option<String>);

pub struct Normalizer {
    max_future_skew: Duration,
    dedup_window: Duration,
    activation_debounce: Duration,
    title_settle: Duration,
    title_repeat: Duration,

    last_accepted: Option<(DedupKey, DateTime<Utc>)>,
    last_activation: HashMap<String, DateTime<Utc>>,
    last_title: HashMap<String, (String, DateTime<Utc>)>,
    /// Most recently activated (identifier, name); stamped onto window
    /// signals so downstream consumers know which app a title belongs to.
    current_app: Option<(String, String)>,
    active_sequence: Option<String>,
}

impl Normalizer {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            max_future_skew: Duration::seconds(config.max_future_skew_secs),
            dedup_window: Duration::milliseconds(config.dedup_window_ms),
            activation_debounce: Duration::milliseconds(config.activation_debounce_ms),
            title_settle: Duration::milliseconds(config.title_settle_ms),
            title_repeat: Duration::milliseconds(config.title_repeat_ms),
            last_accepted: None,
            last_activation: HashMap::new(),
            last_title: HashMap::new(),
            current_app: None,
            active_sequence: None,
        }
    }

    pub fn set_active_sequence(&mut self, sequence_id: Option<String>) {
        self.active_sequence = sequence_id;
    }

    pub fn current_app(&self) -> Option<&(String, String)> {
        self.current_app.as_ref()
    }

    pub fn normalize(&mut self, signal: RawSignal) -> Option<ActivityEvent> {
        self.normalize_at(signal, Utc::now())
    }

    /// `now` is the ingestion clock; split out so tests can drive time.
    pub fn normalize_at(&mut self, signal: RawSignal, now: DateTime<Utc>) -> Option<ActivityEvent> {
        // Rule 1: clock-skew guard.
        if signal.timestamp > now + self.max_future_skew {
            log_debug!(
                "rejecting event {}s in the future",
                (signal.timestamp - now).num_seconds()
            );
            return None;
        }

        let at = signal.timestamp;
        let mut event = match self.shape_event(signal.kind, at) {
            Some(event) => event,
            None => return None,
        };

        // Rule 2: generic dedup against the immediately preceding accepted
        // event.
        let key: DedupKey = (
            event.event_type,
            event.app_identifier.clone(),
            event.window_title.clone(),
        );
        if let Some((last_key, last_at)) = &self.last_accepted {
            if *last_key == key && at - *last_at < self.dedup_window {
                log_trace!("dropping duplicate {:?}", event.event_type);
                return None;
            }
        }

        // Rule 3: activation debounce (OS-level double-activations).
        if event.event_type == ActivityEventType::AppActivate {
            if let Some(app_id) = &event.app_identifier {
                if let Some(last) = self.last_activation.get(app_id) {
                    if at - *last < self.activation_debounce {
                        log_trace!("debouncing re-activation of {app_id}");
                        return None;
                    }
                }
            }
        }

        // Rule 4: title settling and title repeats.
        if event.event_type == ActivityEventType::WindowTitleChanged {
            if let Some(app_id) = &event.app_identifier {
                if let Some(activated_at) = self.last_activation.get(app_id) {
                    if at - *activated_at < self.title_settle {
                        log_trace!("suppressing title change while {app_id} settles");
                        return None;
                    }
                }
                if let (Some(title), Some((last_title, last_at))) =
                    (&event.window_title, self.last_title.get(app_id))
                {
                    if last_title == title && at - *last_at < self.title_repeat {
                        log_trace!("suppressing repeated title for {app_id}");
                        return None;
                    }
                }
            }
        }

        // Rule 5: stamp the active sequence.
        if event.sequence_id.is_none() {
            event.sequence_id = self.active_sequence.clone();
        }

        // Accepted: update the last-seen trackers the rules read.
        self.last_accepted = Some((key, at));
        match event.event_type {
            ActivityEventType::AppActivate => {
                if let Some(app_id) = &event.app_identifier {
                    self.last_activation.insert(app_id.clone(), at);
                }
                if let (Some(id), Some(name)) = (&event.app_identifier, &event.app_name) {
                    self.current_app = Some((id.clone(), name.clone()));
                }
            }
            ActivityEventType::WindowTitleChanged => {
                if let (Some(app_id), Some(title)) = (&event.app_identifier, &event.window_title) {
                    self.last_title.insert(app_id.clone(), (title.clone(), at));
                }
            }
            _ => {}
        }

        event.created_at = now;
        Some(event)
    }

    fn shape_event(&self, kind: SignalKind, at: DateTime<Utc>) -> Option<ActivityEvent> {
        let mut event = match kind {
            SignalKind::AppActivated {
                app_identifier,
                app_name,
                previous_app,
            } => {
                let mut event = ActivityEvent::new(ActivityEventType::AppActivate, at);
                event.app_identifier = Some(app_identifier);
                event.app_name = Some(app_name);
                if let Some(previous) = previous_app {
                    event.event_data = Some(serde_json::json!({ "previousApp": previous }));
                }
                event
            }
            SignalKind::AppLaunched {
                app_identifier,
                app_name,
            } => {
                let mut event = ActivityEvent::new(ActivityEventType::AppLaunch, at);
                event.app_identifier = Some(app_identifier);
                event.app_name = Some(app_name);
                event
            }
            SignalKind::AppTerminated {
                app_identifier,
                app_name,
            } => {
                let mut event = ActivityEvent::new(ActivityEventType::AppTerminate, at);
                event.app_identifier = Some(app_identifier);
                event.app_name = Some(app_name);
                event
            }
            SignalKind::WindowTitleChanged { title } => {
                let mut event = ActivityEvent::new(ActivityEventType::WindowTitleChanged, at);
                event.window_title = title;
                event
            }
            SignalKind::WindowClosed { title } => {
                let mut event = ActivityEvent::new(ActivityEventType::WindowClosed, at);
                event.window_title = title;
                event
            }
            SignalKind::ScreenSlept => ActivityEvent::new(ActivityEventType::ScreenSleep, at),
            SignalKind::ScreenWoke => ActivityEvent::new(ActivityEventType::ScreenWake, at),
            SignalKind::IdleStarted => ActivityEvent::new(ActivityEventType::IdleStart, at),
            SignalKind::IdleEnded => ActivityEvent::new(ActivityEventType::IdleEnd, at),
            SignalKind::KeyPressed { descriptor, code } => {
                let mut event = ActivityEvent::new(ActivityEventType::KeyPress, at);
                event.event_data =
                    Some(serde_json::json!({ "descriptor": descriptor, "code": code }));
                event
            }
            SignalKind::MouseClicked { x, y } => {
                let mut event = ActivityEvent::new(ActivityEventType::MouseClick, at);
                event.event_data = Some(serde_json::json!({ "x": x, "y": y }));
                event
            }
            SignalKind::MouseMoved { x, y } => {
                let mut event = ActivityEvent::new(ActivityEventType::MouseMove, at);
                event.event_data = Some(serde_json::json!({ "x": x, "y": y }));
                event
            }
            SignalKind::MouseScrolled { delta_x, delta_y } => {
                let mut event = ActivityEvent::new(ActivityEventType::MouseScroll, at);
                event.event_data =
                    Some(serde_json::json!({ "deltaX": delta_x, "deltaY": delta_y }));
                event
            }
            SignalKind::FeatureUsed { action, detail } => {
                let event_type = match action {
                    FeatureAction::TabSwitch => ActivityEventType::TabSwitch,
                    FeatureAction::SettingsOpened => ActivityEventType::SettingsOpened,
                    FeatureAction::SettingsClosed => ActivityEventType::SettingsClosed,
                    FeatureAction::Note => ActivityEventType::NoteAction,
                    FeatureAction::Clipboard => ActivityEventType::ClipboardAction,
                    FeatureAction::Timer => ActivityEventType::TimerAction,
                    FeatureAction::Screenshot => ActivityEventType::ScreenshotAction,
                    FeatureAction::SettingChanged => ActivityEventType::SettingChanged,
                };
                let mut event = ActivityEvent::new(event_type, at);
                if !detail.is_null() {
                    event.event_data = Some(detail);
                }
                event
            }
        };

        // Window signals arrive without app context; attribute them to the
        // focused app so dedup and session tracking can key on it.
        if matches!(
            event.event_type,
            ActivityEventType::WindowTitleChanged | ActivityEventType::WindowClosed
        ) {
            if let Some((id, name)) = &self.current_app {
                event.app_identifier = Some(id.clone());
                event.app_name = Some(name.clone());
            }
        }

        Some(event)
    }
}
