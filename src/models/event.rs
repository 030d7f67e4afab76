use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything the pipeline can record, including the in-app feature family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ActivityEventType {
    AppLaunch,
    AppTerminate,
    AppActivate,
    WindowTitleChanged,
    WindowClosed,
    KeyPress,
    MouseClick,
    MouseMove,
    MouseScroll,
    IdleStart,
    IdleEnd,
    ScreenSleep,
    ScreenWake,
    Heartbeat,
    Distraction,
    // In-app feature usage
    TabSwitch,
    SettingsOpened,
    SettingsClosed,
    NoteAction,
    ClipboardAction,
    TimerAction,
    ScreenshotAction,
    SettingChanged,
}

impl ActivityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityEventType::AppLaunch => "app_launch",
            ActivityEventType::AppTerminate => "app_terminate",
            ActivityEventType::AppActivate => "app_activate",
            ActivityEventType::WindowTitleChanged => "window_title_changed",
            ActivityEventType::WindowClosed => "window_closed",
            ActivityEventType::KeyPress => "key_press",
            ActivityEventType::MouseClick => "mouse_click",
            ActivityEventType::MouseMove => "mouse_move",
            ActivityEventType::MouseScroll => "mouse_scroll",
            ActivityEventType::IdleStart => "idle_start",
            ActivityEventType::IdleEnd => "idle_end",
            ActivityEventType::ScreenSleep => "screen_sleep",
            ActivityEventType::ScreenWake => "screen_wake",
            ActivityEventType::Heartbeat => "heartbeat",
            ActivityEventType::Distraction => "distraction",
            ActivityEventType::TabSwitch => "tab_switch",
            ActivityEventType::SettingsOpened => "settings_opened",
            ActivityEventType::SettingsClosed => "settings_closed",
            ActivityEventType::NoteAction => "note_action",
            ActivityEventType::ClipboardAction => "clipboard_action",
            ActivityEventType::TimerAction => "timer_action",
            ActivityEventType::ScreenshotAction => "screenshot_action",
            ActivityEventType::SettingChanged => "setting_changed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        let parsed = match value {
            "app_launch" => ActivityEventType::AppLaunch,
            "app_terminate" => ActivityEventType::AppTerminate,
            "app_activate" => ActivityEventType::AppActivate,
            "window_title_changed" => ActivityEventType::WindowTitleChanged,
            "window_closed" => ActivityEventType::WindowClosed,
            "key_press" => ActivityEventType::KeyPress,
            "mouse_click" => ActivityEventType::MouseClick,
            "mouse_move" => ActivityEventType::MouseMove,
            "mouse_scroll" => ActivityEventType::MouseScroll,
            "idle_start" => ActivityEventType::IdleStart,
            "idle_end" => ActivityEventType::IdleEnd,
            "screen_sleep" => ActivityEventType::ScreenSleep,
            "screen_wake" => ActivityEventType::ScreenWake,
            "heartbeat" => ActivityEventType::Heartbeat,
            "distraction" => ActivityEventType::Distraction,
            "tab_switch" => ActivityEventType::TabSwitch,
            "settings_opened" => ActivityEventType::SettingsOpened,
            "settings_closed" => ActivityEventType::SettingsClosed,
            "note_action" => ActivityEventType::NoteAction,
            "clipboard_action" => ActivityEventType::ClipboardAction,
            "timer_action" => ActivityEventType::TimerAction,
            "screenshot_action" => ActivityEventType::ScreenshotAction,
            "setting_changed" => ActivityEventType::SettingChanged,
            _ => return None,
        };
        Some(parsed)
    }
}

/// An immutable fact about something the user (or the system) did.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    pub event_type: ActivityEventType,
    pub app_identifier: Option<String>,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub event_data: Option<serde_json::Value>,
    /// When the signal claims it happened.
    pub timestamp: DateTime<Utc>,
    /// When the pipeline accepted it.
    pub created_at: DateTime<Utc>,
    pub sequence_id: Option<String>,
}

impl ActivityEvent {
    pub fn new(event_type: ActivityEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            app_identifier: None,
            app_name: None,
            window_title: None,
            event_data: None,
            timestamp,
            created_at: Utc::now(),
            sequence_id: None,
        }
    }
}
