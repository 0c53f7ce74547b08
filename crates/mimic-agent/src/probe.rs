//! UI-probe contract.
//!
//! The probe is a platform capability provided from outside: it activates
//! applications, posts clicks and key events, and locates the element a
//! recorded step targeted. This crate ships two implementations:
//! [`NoopProbe`] (logs and reports success at the recorded coordinates, for
//! environments without an accessibility backend) and [`MockProbe`]
//! (records every invocation, for tests).

use crate::AgentError;
use async_trait::async_trait;
use mimic_core::model::ActionStep;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// How the probe located an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Identifier,
    Value,
    Description,
    TitleRole,
    Role,
    AppWideIdentifier,
    AppWideValue,
    AppWideDescription,
    AppWideTitleRole,
    /// Nothing structural matched; only the recorded coordinates remain.
    CoordinateFallback,
}

impl MatchMethod {
    /// The snake_case name used in step results.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::Value => "value",
            Self::Description => "description",
            Self::TitleRole => "title_role",
            Self::Role => "role",
            Self::AppWideIdentifier => "app_wide_identifier",
            Self::AppWideValue => "app_wide_value",
            Self::AppWideDescription => "app_wide_description",
            Self::AppWideTitleRole => "app_wide_title_role",
            Self::CoordinateFallback => "coordinate_fallback",
        }
    }
}

/// A located element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementHit {
    pub x: f64,
    pub y: f64,
    pub method: MatchMethod,
}

/// Mouse button for click actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// The platform capability that actuates the UI.
#[async_trait]
pub trait UiProbe: Send + Sync {
    /// Brings the application to the foreground.
    async fn activate_app(&self, bundle_id: &str) -> Result<(), AgentError>;

    /// Posts a click at the given screen coordinates.
    async fn click(&self, x: f64, y: f64, button: MouseButton) -> Result<(), AgentError>;

    /// Posts a key event.
    async fn type_keys(
        &self,
        keycode: i64,
        flags: Option<i64>,
        text: Option<&str>,
    ) -> Result<(), AgentError>;

    /// Locates the element a step targeted on the current screen.
    ///
    /// Returns None when nothing (not even the coordinate fallback) applies.
    async fn find_element(&self, step: &ActionStep) -> Result<Option<ElementHit>, AgentError>;
}

/// Probe stand-in for environments without an accessibility backend.
///
/// Element search always reports the recorded coordinates as a
/// `coordinate_fallback`; actuation calls log and succeed without touching
/// the OS.
#[derive(Debug, Default)]
pub struct NoopProbe;

#[async_trait]
impl UiProbe for NoopProbe {
    async fn activate_app(&self, bundle_id: &str) -> Result<(), AgentError> {
        debug!(bundle_id, "noop probe: activate_app");
        Ok(())
    }

    async fn click(&self, x: f64, y: f64, button: MouseButton) -> Result<(), AgentError> {
        debug!(x, y, ?button, "noop probe: click");
        Ok(())
    }

    async fn type_keys(
        &self,
        keycode: i64,
        flags: Option<i64>,
        text: Option<&str>,
    ) -> Result<(), AgentError> {
        debug!(keycode, ?flags, text_len = text.map_or(0, str::len), "noop probe: type_keys");
        Ok(())
    }

    async fn find_element(&self, step: &ActionStep) -> Result<Option<ElementHit>, AgentError> {
        Ok(Some(ElementHit {
            x: step.coordinates.x,
            y: step.coordinates.y,
            method: MatchMethod::CoordinateFallback,
        }))
    }
}

/// One recorded probe invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeCall {
    ActivateApp { bundle_id: String },
    Click { x: f64, y: f64, right: bool },
    TypeKeys { keycode: i64 },
}

/// Scripted probe for tests: records calls and pops element-search results
/// from a queue (falling back to a title/role hit at the step coordinates).
#[derive(Debug, Default)]
pub struct MockProbe {
    calls: Mutex<Vec<ProbeCall>>,
    element_script: Mutex<VecDeque<Option<ElementHit>>>,
    fail_clicks: bool,
}

impl MockProbe {
    /// Creates a probe whose element searches succeed with `title_role` hits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a probe whose clicks fail.
    #[must_use]
    pub fn failing_clicks() -> Self {
        Self { fail_clicks: true, ..Self::default() }
    }

    /// Queues an element-search result.
    pub fn push_element(&self, hit: Option<ElementHit>) {
        self.element_script.lock().expect("element lock").push_back(hit);
    }

    /// All calls recorded so far.
    pub fn recorded_calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Number of actuation calls (clicks + key events) recorded.
    pub fn actuation_count(&self) -> usize {
        self.recorded_calls()
            .iter()
            .filter(|c| matches!(c, ProbeCall::Click { .. } | ProbeCall::TypeKeys { .. }))
            .count()
    }

    fn record(&self, call: ProbeCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl UiProbe for MockProbe {
    async fn activate_app(&self, bundle_id: &str) -> Result<(), AgentError> {
        self.record(ProbeCall::ActivateApp { bundle_id: bundle_id.to_string() });
        Ok(())
    }

    async fn click(&self, x: f64, y: f64, button: MouseButton) -> Result<(), AgentError> {
        self.record(ProbeCall::Click { x, y, right: button == MouseButton::Right });
        if self.fail_clicks {
            return Err(AgentError::Probe("scripted click failure".to_string()));
        }
        Ok(())
    }

    async fn type_keys(
        &self,
        keycode: i64,
        _flags: Option<i64>,
        _text: Option<&str>,
    ) -> Result<(), AgentError> {
        self.record(ProbeCall::TypeKeys { keycode });
        Ok(())
    }

    async fn find_element(&self, step: &ActionStep) -> Result<Option<ElementHit>, AgentError> {
        let scripted = self.element_script.lock().expect("element lock").pop_front();
        Ok(scripted.unwrap_or(Some(ElementHit {
            x: step.coordinates.x,
            y: step.coordinates.y,
            method: MatchMethod::TitleRole,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_probe_coordinate_fallback() {
        let probe = NoopProbe;
        let step = ActionStep {
            coordinates: mimic_core::model::Point { x: 10.0, y: 20.0 },
            ..ActionStep::default()
        };
        let hit = probe.find_element(&step).await.unwrap().unwrap();
        assert_eq!(hit.method, MatchMethod::CoordinateFallback);
        assert_eq!(hit.x, 10.0);
    }

    #[tokio::test]
    async fn test_mock_probe_records_calls() {
        let probe = MockProbe::new();
        probe.activate_app("com.apple.finder").await.unwrap();
        probe.click(1.0, 2.0, MouseButton::Left).await.unwrap();
        probe.type_keys(36, None, None).await.unwrap();

        let calls = probe.recorded_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(probe.actuation_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_probe_scripted_elements() {
        let probe = MockProbe::new();
        probe.push_element(None);
        let step = ActionStep::default();
        assert!(probe.find_element(&step).await.unwrap().is_none());
        // Queue exhausted: default title/role hit.
        let hit = probe.find_element(&step).await.unwrap().unwrap();
        assert_eq!(hit.method, MatchMethod::TitleRole);
    }
}
