//! Desktop state observation.
//!
//! The observer reports the frontmost app, takes screenshots, and lists
//! visible elements. All of it is platform capability injected from outside;
//! every operation may fail silently, in which case callers receive null
//! fields. [`NullObserver`] is the no-backend implementation.

use async_trait::async_trait;
use mimic_core::model::{now_iso, AppInfo, Frame};
use serde::Serialize;
use serde_json::json;

/// A snapshot of the desktop at one moment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DesktopState {
    /// The frontmost application, when it could be determined.
    pub app: Option<AppInfo>,
    /// Path of the screenshot taken for this snapshot, when available.
    pub screenshot_path: Option<String>,
    /// ISO-8601 timestamp of the observation.
    pub timestamp: String,
}

impl DesktopState {
    /// The frontmost app's name, or empty.
    pub fn app_name(&self) -> &str {
        self.app.as_ref().map_or("", |a| a.name.as_str())
    }

    /// Renders the state as the JSON payload handed to the oracle.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "app": self.app,
            "screenshot_path": self.screenshot_path,
            "timestamp": self.timestamp,
        })
    }
}

/// UI element information at one position.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PositionInfo {
    pub app: Option<AppInfo>,
    pub element: Option<serde_json::Value>,
    pub x: f64,
    pub y: f64,
}

/// One element of a visible-elements listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VisibleElement {
    pub role: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub frame: Option<Frame>,
    pub depth: usize,
}

/// Observes the desktop on demand.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Snapshot of the frontmost app plus a fresh screenshot.
    async fn observe_current_state(&self) -> DesktopState;

    /// The UI element at the given screen position.
    async fn observe_at_position(&self, x: f64, y: f64) -> PositionInfo;

    /// Takes a screenshot; None when the capability is unavailable.
    async fn take_screenshot(&self, prefix: &str) -> Option<String>;

    /// Visible elements of an application, depth-bounded.
    async fn get_visible_elements(&self, pid: i64, max_depth: usize) -> Vec<VisibleElement>;
}

/// Observer for environments without a screen-capture backend: every field
/// comes back null, which downstream code treats as "no signal".
#[derive(Debug, Default)]
pub struct NullObserver;

#[async_trait]
impl Observer for NullObserver {
    async fn observe_current_state(&self) -> DesktopState {
        DesktopState { app: None, screenshot_path: None, timestamp: now_iso() }
    }

    async fn observe_at_position(&self, x: f64, y: f64) -> PositionInfo {
        PositionInfo { app: None, element: None, x, y }
    }

    async fn take_screenshot(&self, _prefix: &str) -> Option<String> {
        None
    }

    async fn get_visible_elements(&self, _pid: i64, _max_depth: usize) -> Vec<VisibleElement> {
        Vec::new()
    }
}
