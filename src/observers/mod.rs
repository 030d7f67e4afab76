//! Raw observer signals and the glue that turns platform callbacks into
//! messages on one channel.
//!
//! Platform observers (NSWorkspace notifications, event taps, power
//! notifications, in-app UI hooks) know nothing about storage or
//! classification; they hold a [`SignalSender`] and fire one method per
//! callback. The normalizer is the channel's only consumer. An observer
//! whose OS permission was denied simply never calls in, and the rest of
//! the pipeline degrades to coarser signal quality.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

const ENABLE_LOGS: bool = false;
use crate::log_trace;

/// One raw signal from a source observer, before normalization.
#[derive(Debug, Clone)]
pub struct RawSignal {
    pub timestamp: DateTime<Utc>,
    pub kind: SignalKind,
}

impl RawSignal {
    pub fn now(kind: SignalKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn at(timestamp: DateTime<Utc>, kind: SignalKind) -> Self {
        Self { timestamp, kind }
    }
}

#[derive(Debug, Clone)]
pub enum SignalKind {
    AppActivated {
        app_identifier: String,
        app_name: String,
        previous_app: Option<String>,
    },
    AppLaunched {
        app_identifier: String,
        app_name: String,
    },
    AppTerminated {
        app_identifier: String,
        app_name: String,
    },
    WindowTitleChanged {
        title: Option<String>,
    },
    WindowClosed {
        title: Option<String>,
    },
    ScreenSlept,
    ScreenWoke,
    IdleStarted,
    IdleEnded,
    KeyPressed {
        descriptor: String,
        code: u32,
    },
    MouseClicked {
        x: f64,
        y: f64,
    },
    MouseMoved {
        x: f64,
        y: f64,
    },
    MouseScrolled {
        delta_x: f64,
        delta_y: f64,
    },
    FeatureUsed {
        action: FeatureAction,
        detail: serde_json::Value,
    },
}

/// The fixed set of in-app UI actions the feature tracker reports.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FeatureAction {
    TabSwitch,
    SettingsOpened,
    SettingsClosed,
    Note,
    Clipboard,
    Timer,
    Screenshot,
    SettingChanged,
}

/// Cloneable handle observers use to publish signals.
///
/// Sends are fire-and-forget: once the monitor stops and drops the
/// receiver, late callbacks land on a closed channel and are discarded.
#[derive(Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<RawSignal>,
}

impl SignalSender {
    pub fn new(tx: mpsc::UnboundedSender<RawSignal>) -> Self {
        Self { tx }
    }

    pub fn send(&self, signal: RawSignal) {
        if self.tx.send(signal).is_err() {
            log_trace!("signal dropped: monitor not running");
        }
    }

    pub fn app_activated(&self, app_identifier: &str, app_name: &str, previous_app: Option<&str>) {
        self.send(RawSignal::now(SignalKind::AppActivated {
            app_identifier: app_identifier.to_string(),
            app_name: app_name.to_string(),
            previous_app: previous_app.map(str::to_string),
        }));
    }

    pub fn app_launched(&self, app_identifier: &str, app_name: &str) {
        self.send(RawSignal::now(SignalKind::AppLaunched {
            app_identifier: app_identifier.to_string(),
            app_name: app_name.to_string(),
        }));
    }

    pub fn app_terminated(&self, app_identifier: &str, app_name: &str) {
        self.send(RawSignal::now(SignalKind::AppTerminated {
            app_identifier: app_identifier.to_string(),
            app_name: app_name.to_string(),
        }));
    }

    pub fn window_title_changed(&self, title: Option<&str>) {
        self.send(RawSignal::now(SignalKind::WindowTitleChanged {
            title: title.map(str::to_string),
        }));
    }

    pub fn window_closed(&self, title: Option<&str>) {
        self.send(RawSignal::now(SignalKind::WindowClosed {
            title: title.map(str::to_string),
        }));
    }

    pub fn screen_slept(&self) {
        self.send(RawSignal::now(SignalKind::ScreenSlept));
    }

    pub fn screen_woke(&self) {
        self.send(RawSignal::now(SignalKind::ScreenWoke));
    }

    /// For platforms whose idle detection lives in the OS rather than the
    /// built-in [`IdleWatcher`].
    pub fn idle_started(&self) {
        self.send(RawSignal::now(SignalKind::IdleStarted));
    }

    pub fn idle_ended(&self) {
        self.send(RawSignal::now(SignalKind::IdleEnded));
    }

    pub fn key_pressed(&self, descriptor: &str, code: u32) {
        self.send(RawSignal::now(SignalKind::KeyPressed {
            descriptor: descriptor.to_string(),
            code,
        }));
    }

    pub fn mouse_clicked(&self, x: f64, y: f64) {
        self.send(RawSignal::now(SignalKind::MouseClicked { x, y }));
    }

    pub fn mouse_moved(&self, x: f64, y: f64) {
        self.send(RawSignal::now(SignalKind::MouseMoved { x, y }));
    }

    pub fn mouse_scrolled(&self, delta_x: f64, delta_y: f64) {
        self.send(RawSignal::now(SignalKind::MouseScrolled { delta_x, delta_y }));
    }
}

/// Typed helpers for the in-app feature hooks the UI layer calls.
#[derive(Clone)]
pub struct FeatureTracker {
    sender: SignalSender,
}

impl FeatureTracker {
    pub fn new(sender: SignalSender) -> Self {
        Self { sender }
    }

    fn feature(&self, action: FeatureAction, detail: serde_json::Value) {
        self.sender
            .send(RawSignal::now(SignalKind::FeatureUsed { action, detail }));
    }

    pub fn tab_switched(&self, tab: &str) {
        self.feature(FeatureAction::TabSwitch, serde_json::json!({ "tab": tab }));
    }

    pub fn settings_opened(&self) {
        self.feature(FeatureAction::SettingsOpened, serde_json::Value::Null);
    }

    pub fn settings_closed(&self) {
        self.feature(FeatureAction::SettingsClosed, serde_json::Value::Null);
    }

    pub fn note_action(&self, action: &str, note_id: Option<&str>) {
        self.feature(
            FeatureAction::Note,
            serde_json::json!({ "action": action, "noteId": note_id }),
        );
    }

    pub fn clipboard_action(&self, action: &str) {
        self.feature(FeatureAction::Clipboard, serde_json::json!({ "action": action }));
    }

    pub fn timer_action(&self, action: &str) {
        self.feature(FeatureAction::Timer, serde_json::json!({ "action": action }));
    }

    pub fn screenshot_action(&self, action: &str) {
        self.feature(FeatureAction::Screenshot, serde_json::json!({ "action": action }));
    }

    pub fn setting_changed(&self, key: &str, value: &serde_json::Value) {
        self.feature(
            FeatureAction::SettingChanged,
            serde_json::json!({ "key": key, "value": value }),
        );
    }
}

/// Tracks last-input time and synthesizes idle transitions on the periodic
/// idle check. Input observers only report activity; this decides when the
/// user actually went away.
#[derive(Debug)]
pub struct IdleWatcher {
    threshold: Duration,
    last_input: Option<DateTime<Utc>>,
    is_idle: bool,
}

impl IdleWatcher {
    pub fn new(threshold_secs: i64) -> Self {
        Self {
            threshold: Duration::seconds(threshold_secs),
            last_input: None,
            is_idle: false,
        }
    }

    /// Call for every keyboard/mouse event. Returns `Some(IdleEnded)` when
    /// input arrives during an idle stretch.
    pub fn note_input(&mut self, at: DateTime<Utc>) -> Option<SignalKind> {
        self.last_input = Some(at);
        if self.is_idle {
            self.is_idle = false;
            return Some(SignalKind::IdleEnded);
        }
        None
    }

    /// Periodic check; returns `Some(IdleStarted)` exactly once per idle
    /// stretch.
    pub fn check(&mut self, now: DateTime<Utc>) -> Option<SignalKind> {
        let last = self.last_input?;
        if !self.is_idle && now - last >= self.threshold {
            self.is_idle = true;
            return Some(SignalKind::IdleStarted);
        }
        None
    }

    pub fn is_idle(&self) -> bool {
        self.is_idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_watcher_fires_once_per_stretch() {
        let mut watcher = IdleWatcher::new(300);
        let t0 = Utc::now();
        assert!(watcher.note_input(t0).is_none());

        // Not yet idle at 4 minutes.
        assert!(watcher.check(t0 + Duration::seconds(240)).is_none());

        // Idle at 5 minutes, reported exactly once.
        assert!(matches!(
            watcher.check(t0 + Duration::seconds(300)),
            Some(SignalKind::IdleStarted)
        ));
        assert!(watcher.check(t0 + Duration::seconds(360)).is_none());
        assert!(watcher.is_idle());

        // Input ends the stretch.
        assert!(matches!(
            watcher.note_input(t0 + Duration::seconds(400)),
            Some(SignalKind::IdleEnded)
        ));
        assert!(!watcher.is_idle());
    }

    #[tokio::test]
    async fn idle_helpers_publish_idle_signals() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = SignalSender::new(tx);

        sender.idle_started();
        sender.idle_ended();

        assert!(matches!(
            rx.recv().await.unwrap().kind,
            SignalKind::IdleStarted
        ));
        assert!(matches!(rx.recv().await.unwrap().kind, SignalKind::IdleEnded));
    }

    #[test]
    fn idle_watcher_needs_input_before_reporting() {
        let mut watcher = IdleWatcher::new(300);
        // No input seen at all: nothing to measure against.
        assert!(watcher.check(Utc::now()).is_none());
    }
}
