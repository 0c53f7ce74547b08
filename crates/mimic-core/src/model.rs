//! Domain model for the learning and replay engine.
//!
//! Persisted documents (`Workflow`, `ExecutionFeedback`, `CaptureRecord`)
//! carry an explicit `schema_version` and preserve unknown keys through a
//! flattened map, so files written by newer builds survive a round-trip
//! through older ones.

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Workflow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Freshly extracted, never executed.
    #[default]
    Draft,
    /// Executed at least once with some success.
    Tested,
    /// Executed at least 5 times with a success rate of 70% or more.
    Active,
    /// Executed at least 3 times with a success rate below 20%. Terminal.
    Deprecated,
}

impl WorkflowStatus {
    /// The lowercase string used on disk.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Tested => "tested",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of executable action step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Left click.
    #[default]
    Click,
    /// Right click.
    RightClick,
    /// Typed text (a run of key events).
    TextInput,
    /// A single key press.
    KeyInput,
    /// A keyboard shortcut (modifiers + key).
    KeyShortcut,
}

impl ActionKind {
    /// Maps a capture record's `user_action.type` onto an action kind.
    ///
    /// `shortcut` is normalized to `key_shortcut`; unrecognized values
    /// (e.g., `timer`) fall back to `click`.
    pub fn from_capture_type(kind: &str) -> Self {
        match kind {
            "right_click" => Self::RightClick,
            "text_input" => Self::TextInput,
            "key_input" => Self::KeyInput,
            "shortcut" | "key_shortcut" => Self::KeyShortcut,
            _ => Self::Click,
        }
    }

    /// Whether the action is a keyboard action (no element search required).
    pub fn is_key_action(self) -> bool {
        matches!(self, Self::TextInput | Self::KeyInput | Self::KeyShortcut)
    }

    /// The snake_case string used on disk.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::RightClick => "right_click",
            Self::TextInput => "text_input",
            Self::KeyInput => "key_input",
            Self::KeyShortcut => "key_shortcut",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accessibility descriptor of the element an action targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

impl TargetDescriptor {
    /// Whether any structural information is present at all.
    pub fn has_any(&self) -> bool {
        self.role.is_some()
            || self.title.is_some()
            || self.value.is_some()
            || self.description.is_some()
            || self.identifier.is_some()
    }
}

/// Screen coordinates in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// A single raw key event inside a text input run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    #[serde(default)]
    pub keycode: Option<i64>,
    #[serde(default)]
    pub flags: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Keyboard payload of an action step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyPayload {
    #[serde(default)]
    pub keycode: Option<i64>,
    #[serde(default)]
    pub flags: Option<i64>,
    #[serde(default)]
    pub key_events: Vec<KeyEvent>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

/// Parameterization marker on a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMarker {
    #[serde(default)]
    pub is_parameterized: bool,
    #[serde(default)]
    pub param_name: Option<String>,
}

/// One executable operation step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub action_type: ActionKind,
    #[serde(default)]
    pub app_bundle_id: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub target: TargetDescriptor,
    #[serde(default)]
    pub coordinates: Point,
    #[serde(default)]
    pub key: KeyPayload,
    #[serde(default)]
    pub parameterized: ParameterMarker,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    /// Replay hint: sleep this long before executing the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_before_secs: Option<f64>,
    /// Replay hint: element-search deadline for the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
    /// Replay hint: re-activate the target app before executing.
    #[serde(default, skip_serializing_if = "is_false")]
    pub needs_focus_check: bool,
}

impl ActionStep {
    /// Builds a step from a raw capture record.
    ///
    /// Coordinates come from the user action when present, otherwise from
    /// the target element's frame center.
    pub fn from_capture(record: &CaptureRecord) -> Self {
        let action = &record.user_action;
        let (x, y) = match (action.x, action.y) {
            (Some(x), Some(y)) => (x, y),
            _ => record
                .target
                .frame
                .as_ref()
                .map_or((0.0, 0.0), |frame| (frame.x + frame.width / 2.0, frame.y + frame.height / 2.0)),
        };

        Self {
            action_type: ActionKind::from_capture_type(&action.kind),
            app_bundle_id: record.app.bundle_id.clone(),
            app_name: record.app.name.clone(),
            target: TargetDescriptor {
                role: record.target.role.clone(),
                title: record.target.name.clone(),
                value: record.target.value.clone(),
                description: record.target.description.clone(),
                identifier: record.target.identifier.clone(),
            },
            coordinates: Point { x, y },
            key: KeyPayload {
                keycode: action.keycode,
                flags: action.flags,
                key_events: action.key_events.clone(),
                text: action.text.clone().unwrap_or_default(),
                modifiers: action.modifiers.clone(),
            },
            parameterized: ParameterMarker::default(),
            description: String::new(),
            screenshot_path: record.screenshots.full.clone(),
            wait_before_secs: None,
            timeout_secs: None,
            needs_focus_check: false,
        }
    }
}

/// A parameterizable slot in a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub step_index: i64,
}

/// A learned, named, parameterizable list of action steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub workflow_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<ActionStep>,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<WorkflowParameter>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub source_session_ids: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub execution_count: u32,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Unknown keys from newer writers, preserved on round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            workflow_id: String::new(),
            name: String::new(),
            description: String::new(),
            steps: Vec::new(),
            app_name: String::new(),
            tags: Vec::new(),
            parameters: Vec::new(),
            confidence: 0.0,
            source_session_ids: Vec::new(),
            created_at: String::new(),
            status: WorkflowStatus::default(),
            execution_count: 0,
            parent_id: None,
            extra: BTreeMap::new(),
        }
    }
}

impl Workflow {
    /// Creates a fresh draft workflow.
    #[must_use]
    pub fn draft(name: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            workflow_id: new_workflow_id(),
            name: name.into(),
            app_name: app_name.into(),
            created_at: now_iso(),
            ..Self::default()
        }
    }

    /// Confidence clamped into [0, 1].
    pub fn clamped_confidence(&self) -> f64 {
        self.confidence.clamp(0.0, 1.0)
    }
}

/// Per-step error recorded in a feedback document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub step_index: usize,
    pub error_code: String,
    #[serde(default)]
    pub error_msg: String,
}

/// How a feedback's execution was driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Replay of a stored workflow.
    Workflow,
    /// Free exploration toward a goal.
    #[default]
    Autonomous,
}

/// The recorded outcome of one execution attempt. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFeedback {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub feedback_id: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub goal: String,
    pub success: bool,
    #[serde(default)]
    pub steps_executed: usize,
    #[serde(default)]
    pub steps_succeeded: usize,
    #[serde(default)]
    pub failed_step_indices: Vec<usize>,
    #[serde(default)]
    pub error_details: Vec<ErrorDetail>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub app_name: String,
}

impl Default for ExecutionFeedback {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            feedback_id: String::new(),
            workflow_id: None,
            goal: String::new(),
            success: false,
            steps_executed: 0,
            steps_succeeded: 0,
            failed_step_indices: Vec::new(),
            error_details: Vec::new(),
            timestamp: String::new(),
            execution_mode: ExecutionMode::default(),
            duration_seconds: 0.0,
            app_name: String::new(),
        }
    }
}

/// A learned `(error, app, action) → recovery-action` pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPattern {
    pub error_code: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub failed_action: String,
    pub recovery_action: String,
    #[serde(default)]
    pub sample_count: u32,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub success_rate: f64,
}

/// Session hint carried by each capture record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHint {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub sequence: i64,
}

/// The raw user action inside a capture record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserAction {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub button: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub keycode: Option<i64>,
    #[serde(default)]
    pub flags: Option<i64>,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub key_events: Vec<KeyEvent>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Element frame in screen coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

/// The element under the cursor at capture time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub frame: Option<Frame>,
    #[serde(default)]
    pub is_secure: bool,
}

/// The frontmost application at capture time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bundle_id: String,
    #[serde(default)]
    pub pid: Option<i64>,
}

/// Browser context, when the frontmost app is a browser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserInfo {
    #[serde(default)]
    pub is_browser: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub page_title: Option<String>,
}

/// The focused window at capture time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Paths to the screenshots taken alongside the capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotPaths {
    #[serde(default)]
    pub full: Option<String>,
    #[serde(default)]
    pub cropped: Option<String>,
}

/// One capture record, produced by the external event tap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub capture_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub session: SessionHint,
    #[serde(default)]
    pub user_action: UserAction,
    #[serde(default)]
    pub target: TargetInfo,
    #[serde(default)]
    pub app: AppInfo,
    #[serde(default)]
    pub browser: BrowserInfo,
    #[serde(default)]
    pub window: WindowInfo,
    #[serde(default)]
    pub screenshots: ScreenshotPaths,
    /// Where the record was loaded from. Not part of the document.
    #[serde(skip)]
    pub source_path: PathBuf,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for CaptureRecord {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            capture_id: String::new(),
            timestamp: String::new(),
            session: SessionHint::default(),
            user_action: UserAction::default(),
            target: TargetInfo::default(),
            app: AppInfo::default(),
            browser: BrowserInfo::default(),
            window: WindowInfo::default(),
            screenshots: ScreenshotPaths::default(),
            source_path: PathBuf::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// A time/app/size-bounded slice of an ordered record sequence.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub app_name: String,
    pub steps: Vec<ActionStep>,
    pub records: Vec<CaptureRecord>,
    pub start_time: String,
    pub end_time: String,
    pub session_id: String,
}

/// Generates a fresh workflow id (`wf-` + 8 hex chars).
#[must_use]
pub fn new_workflow_id() -> String {
    format!("wf-{}", short_hex())
}

/// Generates a fresh feedback id (`fb-` + 8 hex chars).
#[must_use]
pub fn new_feedback_id() -> String {
    format!("fb-{}", short_hex())
}

fn short_hex() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

/// The current local time as an ISO-8601 string.
#[must_use]
pub fn now_iso() -> String {
    Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Parses an ISO-8601-ish timestamp leniently.
///
/// Accepts fractional and whole seconds, a space separator, and RFC 3339
/// with an offset. Returns None for anything else.
pub fn parse_timestamp(ts: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] =
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(ts, format) {
            return Some(parsed);
        }
    }
    DateTime::parse_from_rfc3339(ts).ok().map(|dt| dt.naive_local())
}
