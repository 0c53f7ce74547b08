//! Step execution against the UI probe.
//!
//! Activates the target app, replays keyboard actions directly, and for
//! clicks resolves the target element through the probe with a vision
//! fallback: when the probe can only offer the recorded coordinates
//! (`coordinate_fallback`), the oracle is asked to locate the element on a
//! screenshot, and its coordinates win at confidence 0.5 or more. Exactly one
//! click is posted per step regardless of which coordinate source wins.

use crate::observer::Observer;
use crate::probe::{ElementHit, MatchMethod, MouseButton, UiProbe};
use mimic_core::model::{ActionKind, ActionStep};
use mimic_oracle::Oracle;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error code: the target element could not be located.
pub const ERR_HINT_NOT_FOUND: &str = "HINT_NOT_FOUND";
/// Error code: a keyboard action was missing its payload or failed to post.
pub const ERR_INPUT_FAILED: &str = "INPUT_FAILED";
/// Error code: element search exceeded the step's deadline.
pub const ERR_TIMEOUT: &str = "TIMEOUT";
/// Error code: the probe itself reported a failure.
pub const ERR_PROBE: &str = "PROBE_ERROR";

/// The result of playing one step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepPlayback {
    pub success: bool,
    /// How the element was located, when the step needed one.
    pub method: Option<String>,
    /// The coordinates actually used, when the step clicked.
    pub coordinates: Option<(f64, f64)>,
    /// Stable error code on failure.
    pub error_code: Option<String>,
    /// Human-readable error detail on failure.
    pub error: Option<String>,
    pub dry_run: bool,
}

impl StepPlayback {
    fn failed(code: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code.to_string()),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Plays action steps through the UI probe.
pub struct StepExecutor {
    probe: Arc<dyn UiProbe>,
    observer: Arc<dyn Observer>,
    oracle: Oracle,
}

impl StepExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(probe: Arc<dyn UiProbe>, observer: Arc<dyn Observer>, oracle: Oracle) -> Self {
        Self { probe, observer, oracle }
    }

    /// Plays one step. In dry-run mode nothing touches the probe.
    pub async fn play_step(&self, step: &ActionStep, dry_run: bool) -> StepPlayback {
        if dry_run {
            return StepPlayback { success: true, dry_run: true, ..StepPlayback::default() };
        }

        if let Some(wait) = step.wait_before_secs {
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }

        if !step.app_bundle_id.is_empty() {
            if let Err(e) = self.probe.activate_app(&step.app_bundle_id).await {
                debug!(error = %e, "app activation failed, continuing");
            }
            if step.needs_focus_check {
                // The focus-check hint asks for a second activation round trip.
                if let Err(e) = self.probe.activate_app(&step.app_bundle_id).await {
                    debug!(error = %e, "focus check failed, continuing");
                }
            }
        }

        if step.action_type.is_key_action() {
            return self.play_key_action(step).await;
        }
        self.play_click_action(step).await
    }

    async fn play_key_action(&self, step: &ActionStep) -> StepPlayback {
        match step.action_type {
            ActionKind::TextInput => {
                if step.key.key_events.is_empty() {
                    return StepPlayback::failed(
                        ERR_INPUT_FAILED,
                        "no key events recorded for text input",
                    );
                }
                for event in &step.key.key_events {
                    let Some(keycode) = event.keycode else { continue };
                    if let Err(e) =
                        self.probe.type_keys(keycode, event.flags, Some(&step.key.text)).await
                    {
                        return StepPlayback::failed(ERR_INPUT_FAILED, e.to_string());
                    }
                }
                StepPlayback { success: true, ..StepPlayback::default() }
            }
            _ => {
                let Some(keycode) = step.key.keycode else {
                    return StepPlayback::failed(ERR_INPUT_FAILED, "missing keycode");
                };
                if let Err(e) = self.probe.type_keys(keycode, step.key.flags, None).await {
                    return StepPlayback::failed(ERR_INPUT_FAILED, e.to_string());
                }
                StepPlayback { success: true, ..StepPlayback::default() }
            }
        }
    }

    async fn play_click_action(&self, step: &ActionStep) -> StepPlayback {
        let hit = match self.find_element(step).await {
            Ok(Some(hit)) => hit,
            Ok(None) => return StepPlayback::failed(ERR_HINT_NOT_FOUND, "element not found"),
            Err(playback) => return playback,
        };

        let (mut x, mut y) = (hit.x, hit.y);
        let mut method = hit.method.as_str().to_string();

        // Structural search came up empty: try to pin the element by vision.
        if hit.method == MatchMethod::CoordinateFallback {
            if let Some((vx, vy)) = self.vision_fallback(step).await {
                x = vx;
                y = vy;
                method = "vision_fallback".to_string();
            }
        }

        let button = if step.action_type == ActionKind::RightClick {
            MouseButton::Right
        } else {
            MouseButton::Left
        };
        if let Err(e) = self.probe.click(x, y, button).await {
            return StepPlayback::failed(ERR_PROBE, e.to_string());
        }

        info!(x, y, method = %method, "step clicked");
        StepPlayback {
            success: true,
            method: Some(method),
            coordinates: Some((x, y)),
            ..StepPlayback::default()
        }
    }

    async fn find_element(&self, step: &ActionStep) -> Result<Option<ElementHit>, StepPlayback> {
        let search = self.probe.find_element(step);
        let result = match step.timeout_secs {
            Some(deadline) => {
                match tokio::time::timeout(Duration::from_secs_f64(deadline), search).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(StepPlayback::failed(ERR_TIMEOUT, "element search timed out"))
                    }
                }
            }
            None => search.await,
        };
        result.map_err(|e| StepPlayback::failed(ERR_HINT_NOT_FOUND, e.to_string()))
    }

    /// Vision fallback: locate the element on a screenshot and adopt the
    /// coordinates when the oracle is confident enough.
    async fn vision_fallback(&self, step: &ActionStep) -> Option<(f64, f64)> {
        let screenshot = match &step.screenshot_path {
            Some(path) if Path::new(path).exists() => path.clone(),
            _ => self.observer.take_screenshot("vision").await?,
        };

        let description = build_element_description(step);
        let hit = self.oracle.find_element_by_vision(Path::new(&screenshot), &description).await?;
        if hit.confidence >= 0.5 {
            info!(x = hit.x, y = hit.y, confidence = hit.confidence, "vision fallback hit");
            return Some((hit.x, hit.y));
        }
        warn!(confidence = hit.confidence, "vision fallback below confidence threshold");
        None
    }
}

/// Assembles the element description handed to the vision oracle.
fn build_element_description(step: &ActionStep) -> String {
    let mut parts = Vec::new();
    if let Some(role) = &step.target.role {
        parts.push(format!("role={role}"));
    }
    if let Some(title) = &step.target.title {
        parts.push(format!("title={title}"));
    }
    if let Some(description) = &step.target.description {
        parts.push(format!("description={description}"));
    }
    if let Some(value) = &step.target.value {
        parts.push(format!("value={value}"));
    }
    if let Some(identifier) = &step.target.identifier {
        parts.push(format!("identifier={identifier}"));
    }
    if !step.description.is_empty() {
        parts.push(step.description.clone());
    }
    if parts.is_empty() {
        return format!("{} target", step.action_type);
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;
    use crate::probe::{MockProbe, ProbeCall};
    use mimic_core::model::{KeyEvent, Point};
    use mimic_oracle::MockOracle;

    fn executor_with(probe: Arc<MockProbe>, oracle: MockOracle) -> StepExecutor {
        StepExecutor::new(probe, Arc::new(NullObserver), Oracle::new(Arc::new(oracle)))
    }

    fn click_step() -> ActionStep {
        ActionStep {
            action_type: ActionKind::Click,
            app_bundle_id: "com.apple.finder".to_string(),
            coordinates: Point { x: 10.0, y: 20.0 },
            ..ActionStep::default()
        }
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let probe = Arc::new(MockProbe::new());
        let executor = executor_with(Arc::clone(&probe), MockOracle::new("mock"));

        let result = executor.play_step(&click_step(), true).await;
        assert!(result.success);
        assert!(result.dry_run);
        assert!(probe.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn test_click_posts_exactly_once() {
        let probe = Arc::new(MockProbe::new());
        let executor = executor_with(Arc::clone(&probe), MockOracle::new("mock"));

        let result = executor.play_step(&click_step(), false).await;
        assert!(result.success);
        assert_eq!(result.method.as_deref(), Some("title_role"));
        assert_eq!(probe.actuation_count(), 1);
    }

    #[tokio::test]
    async fn test_element_not_found() {
        let probe = Arc::new(MockProbe::new());
        probe.push_element(None);
        let executor = executor_with(Arc::clone(&probe), MockOracle::new("mock"));

        let result = executor.play_step(&click_step(), false).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(ERR_HINT_NOT_FOUND));
        assert_eq!(probe.actuation_count(), 0);
    }

    #[tokio::test]
    async fn test_vision_fallback_adopts_confident_hit() {
        let dir = tempfile::TempDir::new().unwrap();
        let screenshot = dir.path().join("shot.png");
        std::fs::write(&screenshot, "png").unwrap();

        let probe = Arc::new(MockProbe::new());
        probe.push_element(Some(ElementHit {
            x: 10.0,
            y: 20.0,
            method: MatchMethod::CoordinateFallback,
        }));
        let oracle = MockOracle::new("mock");
        oracle.push_response(
            r#"{"x": 111.0, "y": 222.0, "confidence": 0.8, "description": "button"}"#,
        );

        let mut step = click_step();
        step.screenshot_path = Some(screenshot.to_string_lossy().into_owned());
        let executor = executor_with(Arc::clone(&probe), oracle);

        let result = executor.play_step(&step, false).await;
        assert!(result.success);
        assert_eq!(result.method.as_deref(), Some("vision_fallback"));
        assert_eq!(result.coordinates, Some((111.0, 222.0)));
        // One click only, at the vision coordinates.
        assert_eq!(probe.actuation_count(), 1);
        assert!(probe
            .recorded_calls()
            .iter()
            .any(|c| matches!(c, ProbeCall::Click { x, .. } if (*x - 111.0).abs() < 1e-9)));
    }

    #[tokio::test]
    async fn test_vision_fallback_rejects_low_confidence() {
        let dir = tempfile::TempDir::new().unwrap();
        let screenshot = dir.path().join("shot.png");
        std::fs::write(&screenshot, "png").unwrap();

        let probe = Arc::new(MockProbe::new());
        probe.push_element(Some(ElementHit {
            x: 10.0,
            y: 20.0,
            method: MatchMethod::CoordinateFallback,
        }));
        let oracle = MockOracle::new("mock");
        oracle.push_response(r#"{"x": 111.0, "y": 222.0, "confidence": 0.3, "description": ""}"#);

        let mut step = click_step();
        step.screenshot_path = Some(screenshot.to_string_lossy().into_owned());
        let executor = executor_with(Arc::clone(&probe), oracle);

        let result = executor.play_step(&step, false).await;
        // Recorded coordinates win; still exactly one click.
        assert!(result.success);
        assert_eq!(result.coordinates, Some((10.0, 20.0)));
        assert_eq!(probe.actuation_count(), 1);
    }

    #[tokio::test]
    async fn test_key_shortcut_requires_keycode() {
        let probe = Arc::new(MockProbe::new());
        let executor = executor_with(Arc::clone(&probe), MockOracle::new("mock"));

        let step = ActionStep { action_type: ActionKind::KeyShortcut, ..ActionStep::default() };
        let result = executor.play_step(&step, false).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some(ERR_INPUT_FAILED));
    }

    #[tokio::test]
    async fn test_text_input_replays_key_events() {
        let probe = Arc::new(MockProbe::new());
        let executor = executor_with(Arc::clone(&probe), MockOracle::new("mock"));

        let mut step = ActionStep { action_type: ActionKind::TextInput, ..ActionStep::default() };
        step.key.key_events = vec![
            KeyEvent { keycode: Some(4), ..KeyEvent::default() },
            KeyEvent { keycode: Some(14), ..KeyEvent::default() },
        ];
        let result = executor.play_step(&step, false).await;
        assert!(result.success);
        assert_eq!(probe.actuation_count(), 2);
    }

    #[test]
    fn test_build_element_description() {
        let mut step = click_step();
        step.target.role = Some("AXButton".to_string());
        step.target.title = Some("OK".to_string());
        assert_eq!(build_element_description(&step), "role=AXButton, title=OK");

        let bare = ActionStep::default();
        assert_eq!(build_element_description(&bare), "click target");
    }
}
