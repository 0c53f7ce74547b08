//! Next-action selection.
//!
//! Two modes: replay (return the workflow's step at an index, with parameter
//! binding) and free exploration (ask the oracle, given the goal, the current
//! state, and recent history). Actions targeting a sensitive application are
//! flagged for confirmation.

use crate::observer::DesktopState;
use mimic_abstraction::{ActionChoice, ChoiceKind};
use mimic_core::config::EngineConfig;
use mimic_core::model::{ActionKind, ActionStep, AppInfo, Point, Workflow};
use mimic_oracle::Oracle;
use std::collections::HashMap;
use tracing::warn;

/// Text handed to the oracle enumerating what it may do.
const AVAILABLE_ACTIONS: &str = "click(x,y) - click at the given coordinates\n\
     right_click(x,y) - right click\n\
     text_input(text) - type text\n\
     key_shortcut(keycode, flags) - press a keyboard shortcut\n\
     wait - wait a moment\n\
     done - the goal is achieved";

/// A compact view of one past step for the oracle's history window.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub step: usize,
    pub action: String,
    pub result: String,
}

/// Chooses the next action from a workflow or from the oracle.
pub struct ActionSelector {
    config: EngineConfig,
    oracle: Oracle,
}

impl ActionSelector {
    /// Creates a selector.
    #[must_use]
    pub fn new(config: EngineConfig, oracle: Oracle) -> Self {
        Self { config, oracle }
    }

    /// The step at `step_index`, with parameters bound. None when out of range.
    ///
    /// When the step is parameterized and a non-empty value is provided under
    /// its parameter name, the value replaces the step's text and target
    /// value.
    pub fn select_from_workflow(
        &self,
        workflow: &Workflow,
        step_index: usize,
        parameters: &HashMap<String, String>,
    ) -> Option<ActionStep> {
        let mut step = workflow.steps.get(step_index)?.clone();

        if step.parameterized.is_parameterized {
            if let Some(name) = &step.parameterized.param_name {
                if let Some(value) = parameters.get(name).filter(|v| !v.is_empty()) {
                    step.key.text = value.clone();
                    step.target.value = Some(value.clone());
                }
            }
        }

        Some(step)
    }

    /// Asks the oracle for the next action during free exploration.
    ///
    /// Sets `requires_confirmation` when the current app is on the
    /// sensitivity list. None when the oracle is unreachable.
    pub async fn select_autonomous(
        &self,
        goal: &str,
        state: &DesktopState,
        history: &[HistoryEntry],
    ) -> Option<ActionChoice> {
        let history_text = render_history(history);
        let mut choice = self
            .oracle
            .select_next_action(goal, &state.to_json(), AVAILABLE_ACTIONS, &history_text)
            .await?;

        let app_name = state.app_name();
        if self.config.is_dangerous_app(app_name) {
            choice.requires_confirmation = true;
            warn!(app = app_name, "dangerous app action flagged for confirmation");
        }

        Some(choice)
    }

    /// Shallow conversion of an oracle choice into an executable step.
    pub fn choice_to_step(choice: &ActionChoice, app: Option<&AppInfo>) -> ActionStep {
        let action_type = match choice.action_type {
            ChoiceKind::RightClick => ActionKind::RightClick,
            ChoiceKind::TextInput => ActionKind::TextInput,
            ChoiceKind::KeyShortcut => ActionKind::KeyShortcut,
            // Wait and done are handled by the loop before conversion.
            _ => ActionKind::Click,
        };

        let mut step = ActionStep {
            action_type,
            coordinates: Point { x: choice.x, y: choice.y },
            description: choice.target_description.clone(),
            ..ActionStep::default()
        };
        step.key.text = choice.text.clone();
        step.key.keycode = choice.keycode;
        step.key.flags = choice.flags;
        step.key.modifiers = choice.modifiers.clone();
        if let Some(app) = app {
            step.app_bundle_id = app.bundle_id.clone();
            step.app_name = app.name.clone();
        }
        step
    }
}

/// Renders the last 10 history entries as the oracle's history window.
fn render_history(history: &[HistoryEntry]) -> String {
    let start = history.len().saturating_sub(10);
    history[start..]
        .iter()
        .map(|h| format!("Step {}: {} → {}", h.step, h.action, h.result))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_core::model::ParameterMarker;

    fn workflow_with_param() -> Workflow {
        let mut step = ActionStep { action_type: ActionKind::TextInput, ..ActionStep::default() };
        step.key.text = "placeholder".to_string();
        step.parameterized = ParameterMarker {
            is_parameterized: true,
            param_name: Some("filename".to_string()),
        };
        Workflow {
            workflow_id: "wf-1".to_string(),
            name: "save file".to_string(),
            steps: vec![ActionStep::default(), step],
            ..Workflow::default()
        }
    }

    fn selector() -> ActionSelector {
        let oracle = Oracle::new(std::sync::Arc::new(mimic_oracle::MockOracle::new("mock")));
        ActionSelector::new(EngineConfig::default(), oracle)
    }

    #[test]
    fn test_select_from_workflow_out_of_range() {
        let selector = selector();
        let workflow = workflow_with_param();
        assert!(selector.select_from_workflow(&workflow, 2, &HashMap::new()).is_none());
    }

    #[test]
    fn test_parameter_binding() {
        let selector = selector();
        let workflow = workflow_with_param();
        let params: HashMap<String, String> =
            [("filename".to_string(), "report.txt".to_string())].into_iter().collect();

        let step = selector.select_from_workflow(&workflow, 1, &params).unwrap();
        assert_eq!(step.key.text, "report.txt");
        assert_eq!(step.target.value.as_deref(), Some("report.txt"));
    }

    #[test]
    fn test_empty_parameter_value_leaves_step_unchanged() {
        let selector = selector();
        let workflow = workflow_with_param();
        let params: HashMap<String, String> =
            [("filename".to_string(), String::new())].into_iter().collect();

        let step = selector.select_from_workflow(&workflow, 1, &params).unwrap();
        assert_eq!(step.key.text, "placeholder");
    }

    #[test]
    fn test_choice_to_step_conversion() {
        let choice = ActionChoice {
            action_type: ChoiceKind::RightClick,
            target_description: "context menu".to_string(),
            x: 5.0,
            y: 6.0,
            text: String::new(),
            keycode: None,
            flags: None,
            modifiers: vec![],
            reasoning: String::new(),
            confidence: 0.9,
            requires_confirmation: false,
        };
        let app = AppInfo {
            name: "Finder".to_string(),
            bundle_id: "com.apple.finder".to_string(),
            pid: None,
        };
        let step = ActionSelector::choice_to_step(&choice, Some(&app));
        assert_eq!(step.action_type, ActionKind::RightClick);
        assert_eq!(step.coordinates.x, 5.0);
        assert_eq!(step.app_bundle_id, "com.apple.finder");
        assert_eq!(step.description, "context menu");
    }

    #[test]
    fn test_render_history_window() {
        let history: Vec<HistoryEntry> = (1..=15)
            .map(|i| HistoryEntry {
                step: i,
                action: "click".to_string(),
                result: "success".to_string(),
            })
            .collect();
        let text = render_history(&history);
        assert_eq!(text.lines().count(), 10);
        assert!(text.starts_with("Step 6:"));
    }
}
