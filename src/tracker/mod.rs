//! Session and distraction tracking.
//!
//! One state machine over the current window of attention: Idle →
//! InSession(app, title, start) → Idle. A different-app activation closes
//! the running session and opens the next; closed sessions land on the
//! meaningful list or the switch list depending on the duration floor. A
//! ring of recent switch pairs feeds distraction detection.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::config::MonitorConfig;
use crate::models::{ActivityEvent, ActivityEventType, DistractedPeriod, FocusSession};

const ENABLE_LOGS: bool = true;
use crate::log_info;

pub struct SessionTracker {
    meaningful_floor: Duration,
    meaningful_cap: usize,
    switches_cap: usize,
    ring_cap: usize,
    distraction_window: Duration,
    distraction_min_switches: usize,
    distracted_cap: usize,

    current: Option<CurrentSession>,
    /// Newest first.
    meaningful: VecDeque<FocusSession>,
    /// Newest first.
    switches: VecDeque<FocusSession>,
    /// (app, switch time) pairs, oldest first, kept regardless of how the
    /// closed session was classified.
    switch_ring: VecDeque<(String, DateTime<Utc>)>,
    distracted: VecDeque<DistractedPeriod>,
}

struct CurrentSession {
    app_key: String,
    session: FocusSession,
}

impl SessionTracker {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            meaningful_floor: Duration::seconds(config.meaningful_session_secs),
            meaningful_cap: config.meaningful_sessions_cap,
            switches_cap: config.recent_switches_cap,
            ring_cap: config.switch_ring_cap,
            distraction_window: Duration::seconds(config.distraction_window_secs),
            distraction_min_switches: config.distraction_min_switches,
            distracted_cap: config.distracted_periods_cap,
            current: None,
            meaningful: VecDeque::new(),
            switches: VecDeque::new(),
            switch_ring: VecDeque::new(),
            distracted: VecDeque::new(),
        }
    }

    /// Feed one normalized event. Returns a synthesized distraction event
    /// when a new distracted period was just detected, so the caller can
    /// put it through the log like any other fact.
    pub fn handle_event(&mut self, event: &ActivityEvent) -> Option<ActivityEvent> {
        match event.event_type {
            ActivityEventType::AppActivate | ActivityEventType::WindowTitleChanged => {
                let app_key = event
                    .app_identifier
                    .clone()
                    .or_else(|| event.app_name.clone())?;
                let app_name = event.app_name.clone().unwrap_or_else(|| app_key.clone());
                self.focus_changed(&app_key, &app_name, event.window_title.clone(), event.timestamp)
            }
            // Attention is gone; same close path as stopping.
            ActivityEventType::IdleStart | ActivityEventType::ScreenSleep => {
                self.close_current(event.timestamp);
                None
            }
            _ => None,
        }
    }

    /// Close whatever is open, e.g. when monitoring stops.
    pub fn stop(&mut self, at: DateTime<Utc>) {
        self.close_current(at);
    }

    pub fn current_session(&self) -> Option<&FocusSession> {
        self.current.as_ref().map(|c| &c.session)
    }

    pub fn meaningful_sessions(&self) -> &VecDeque<FocusSession> {
        &self.meaningful
    }

    pub fn recent_switches(&self) -> &VecDeque<FocusSession> {
        &self.switches
    }

    pub fn distracted_periods(&self) -> &VecDeque<DistractedPeriod> {
        &self.distracted
    }

    fn focus_changed(
        &mut self,
        app_key: &str,
        app_name: &str,
        window_title: Option<String>,
        at: DateTime<Utc>,
    ) -> Option<ActivityEvent> {
        if let Some(current) = &mut self.current {
            if current.app_key == app_key {
                // Same app, possibly a new window.
                if window_title.is_some() {
                    current.session.window_title = window_title;
                }
                return None;
            }
        }

        let switched = self.current.is_some();
        self.close_current(at);

        self.current = Some(CurrentSession {
            app_key: app_key.to_string(),
            session: FocusSession::begin(app_name, window_title, at),
        });

        if switched {
            self.switch_ring.push_back((app_name.to_string(), at));
            while self.switch_ring.len() > self.ring_cap {
                self.switch_ring.pop_front();
            }
            return self.detect_distraction(at);
        }
        None
    }

    fn close_current(&mut self, at: DateTime<Utc>) {
        let Some(current) = self.current.take() else {
            return;
        };
        let mut session = current.session;
        session.ended_at = Some(at);

        let duration = at - session.started_at;
        if duration >= self.meaningful_floor {
            self.meaningful.push_front(session);
            self.meaningful.truncate(self.meaningful_cap);
        } else {
            self.switches.push_front(session);
            self.switches.truncate(self.switches_cap);
        }
    }

    /// Many short switches with nothing settling: since the last meaningful
    /// session ended (or the oldest retained switch, if none), at least the
    /// configured window must have elapsed with enough switches, and no
    /// already-recorded period may cover that span.
    fn detect_distraction(&mut self, now: DateTime<Utc>) -> Option<ActivityEvent> {
        let lookback = self
            .meaningful
            .front()
            .and_then(|s| s.ended_at)
            .or_else(|| self.switch_ring.front().map(|(_, at)| *at))?;

        if now - lookback < self.distraction_window {
            return None;
        }

        let switch_count = self
            .switch_ring
            .iter()
            .filter(|(_, at)| *at > lookback && *at <= now)
            .count();
        if switch_count < self.distraction_min_switches {
            return None;
        }

        // Already reported for this stretch of hopping.
        if self.distracted.iter().any(|p| p.ended_at >= lookback) {
            return None;
        }

        let period = DistractedPeriod {
            started_at: lookback,
            ended_at: now,
            switch_count,
        };
        log_info!(
            "distracted period: {} switches over {}s",
            switch_count,
            (now - lookback).num_seconds()
        );
        self.distracted.push_back(period.clone());
        while self.distracted.len() > self.distracted_cap {
            self.distracted.pop_front();
        }

        let mut event = ActivityEvent::new(ActivityEventType::Distraction, now);
        event.event_data = Some(serde_json::json!({
            "switchCount": period.switch_count,
            "startedAt": period.started_at.to_rfc3339(),
            "endedAt": period.ended_at.to_rfc3339(),
        }));
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SessionTracker {
        SessionTracker::new(&MonitorConfig::default())
    }

    fn activate(app: &str, at: DateTime<Utc>) -> ActivityEvent {
        let mut event = ActivityEvent::new(ActivityEventType::AppActivate, at);
        event.app_identifier = Some(format!("com.test.{app}"));
        event.app_name = Some(app.to_string());
        event
    }

    #[test]
    fn meaningful_session_vs_short_switch() {
        let mut t = tracker();
        let t0 = Utc::now();

        t.handle_event(&activate("A", t0));
        t.handle_event(&activate("B", t0 + Duration::seconds(90)));
        t.handle_event(&activate("A", t0 + Duration::seconds(92)));

        // A ran 90s: meaningful. B ran 2s: a switch.
        assert_eq!(t.meaningful_sessions().len(), 1);
        let meaningful = &t.meaningful_sessions()[0];
        assert_eq!(meaningful.app_name, "A");
        assert_eq!(meaningful.duration().unwrap().num_seconds(), 90);

        assert_eq!(t.recent_switches().len(), 1);
        assert_eq!(t.recent_switches()[0].app_name, "B");

        // A is current again.
        assert_eq!(t.current_session().unwrap().app_name, "A");
    }

    #[test]
    fn same_app_title_change_keeps_session() {
        let mut t = tracker();
        let t0 = Utc::now();

        t.handle_event(&activate("Editor", t0));
        let mut title = ActivityEvent::new(
            ActivityEventType::WindowTitleChanged,
            t0 + Duration::seconds(30),
        );
        title.app_identifier = Some("com.test.Editor".into());
        title.app_name = Some("Editor".into());
        title.window_title = Some("file.ts".into());
        t.handle_event(&title);

        assert_eq!(t.meaningful_sessions().len(), 0);
        assert_eq!(t.recent_switches().len(), 0);
        let current = t.current_session().unwrap();
        assert_eq!(current.started_at, t0);
        assert_eq!(current.window_title.as_deref(), Some("file.ts"));
    }

    #[test]
    fn detects_one_distracted_period() {
        let mut t = tracker();
        let t0 = Utc::now();

        // Alternate between apps every 50s; every session is below the
        // 60s floor, so nothing meaningful ever intervenes.
        let mut synthesized = Vec::new();
        for i in 0..8 {
            let app = if i % 2 == 0 { "A" } else { "B" };
            if let Some(event) =
                t.handle_event(&activate(app, t0 + Duration::seconds(50 * i)))
            {
                synthesized.push(event);
            }
        }

        assert_eq!(t.distracted_periods().len(), 1);
        assert_eq!(synthesized.len(), 1);
        assert_eq!(synthesized[0].event_type, ActivityEventType::Distraction);
        let period = &t.distracted_periods()[0];
        assert!(period.switch_count >= 3);

        // Keep hopping: the overlapping window must not double-report.
        for i in 8..12 {
            let app = if i % 2 == 0 { "A" } else { "B" };
            assert!(t
                .handle_event(&activate(app, t0 + Duration::seconds(50 * i)))
                .is_none());
        }
        assert_eq!(t.distracted_periods().len(), 1);
    }

    #[test]
    fn meaningful_session_resets_distraction_lookback() {
        let mut t = tracker();
        let t0 = Utc::now();

        // A long settled session first.
        t.handle_event(&activate("A", t0));
        t.handle_event(&activate("B", t0 + Duration::seconds(400)));

        // A couple of quick switches right after: the lookback anchors at
        // the meaningful session's end, so no distraction yet.
        t.handle_event(&activate("C", t0 + Duration::seconds(410)));
        t.handle_event(&activate("D", t0 + Duration::seconds(420)));
        assert_eq!(t.distracted_periods().len(), 0);
    }

    #[test]
    fn idle_start_closes_session() {
        let mut t = tracker();
        let t0 = Utc::now();

        t.handle_event(&activate("A", t0));
        let idle = ActivityEvent::new(ActivityEventType::IdleStart, t0 + Duration::seconds(120));
        t.handle_event(&idle);

        assert!(t.current_session().is_none());
        assert_eq!(t.meaningful_sessions().len(), 1);
    }

    #[test]
    fn bounded_lists_evict_oldest() {
        let mut t = tracker();
        let t0 = Utc::now();

        // 30 quick switches; cap for the switch list is 20.
        for i in 0..30 {
            let app = format!("app{i}");
            t.handle_event(&activate(&app, t0 + Duration::seconds(i)));
        }
        assert!(t.recent_switches().len() <= 20);
        // Newest first.
        assert_eq!(t.recent_switches()[0].app_name, "app28");
    }
}
