//! High-level oracle adapter.
//!
//! [`Oracle`] wraps a provider and exposes the operations the learning and
//! execution paths need: session analysis, skill extraction, workflow segment
//! analysis, next-action selection, execution verification, goal checking, and
//! vision-based element search.
//!
//! Failure semantics: transport errors are retried with bounded exponential
//! backoff and then collapse into a neutral result (None, or an
//! achieved=false / success=false outcome). Schema-parse failures are retried
//! once. Callers never see an error from this adapter.

use mimic_abstraction::{
    ActionChoice, ExtractedSkill, GenerationParams, GoalCheck, ImageAttachment, OracleError,
    OracleProvider, SessionAnalysis, SessionTranscript, VerifyOutcome, VisionHit,
    WorkflowAnalysis,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum attempts for a single oracle call (including the first).
const MAX_ATTEMPTS: u32 = 5;
/// Backoff cap in seconds.
const BACKOFF_CAP_SECS: u64 = 30;

/// Provider-agnostic adapter over the AI oracle.
#[derive(Clone)]
pub struct Oracle {
    provider: Arc<dyn OracleProvider>,
}

impl Oracle {
    /// Creates an adapter over the given provider.
    #[must_use]
    pub fn new(provider: Arc<dyn OracleProvider>) -> Self {
        Self { provider }
    }

    /// The underlying model's ID.
    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    /// Summarizes a capture session.
    ///
    /// Returns None when the oracle is unreachable.
    pub async fn analyze_session(&self, transcript: &SessionTranscript) -> Option<SessionAnalysis> {
        let prompt = format!(
            "The following is an operation log recorded in the app '{}'.\n\
             Period: {} ~ {}\nOperations: {}\n\n{}\n\n\
             Summarize what this operation session accomplishes, concisely.",
            transcript.app_name,
            transcript.start_time,
            transcript.end_time,
            transcript.record_count,
            transcript.lines.join("\n"),
        );
        let params = GenerationParams::default().with_effort("low");
        match self.request_text("analyze_session", &prompt, params).await {
            Ok(summary) => {
                Some(SessionAnalysis { session_id: transcript.session_id.clone(), summary })
            }
            Err(e) => {
                warn!(error = %e, "session analysis failed");
                None
            }
        }
    }

    /// Extracts a reusable skill from a session, if the oracle finds one.
    ///
    /// Returns None when `is_skill` is false or the oracle is unreachable.
    pub async fn extract_skill(&self, transcript: &SessionTranscript) -> Option<ExtractedSkill> {
        let prompt = format!(
            "The following is an operation log recorded in the app '{}'.\n\
             Period: {} ~ {}\nOperations: {}\n\n{}\n\n\
             Analyze the sequence:\n\
             1. Is there a repeated operation pattern?\n\
             2. Is there an operation flow that can be turned into a procedure?\n\
             3. Can it be extracted as a skill (a reusable operation procedure)?\n\n\
             Set is_skill=true if a skill can be extracted, is_skill=false otherwise.\n\
             Set confidence to your extraction confidence between 0 and 1.",
            transcript.app_name,
            transcript.start_time,
            transcript.end_time,
            transcript.record_count,
            transcript.lines.join("\n"),
        );
        let params = GenerationParams::json_schema("extracted_skill", skill_schema())
            .with_effort("low");

        let data: SkillEnvelope =
            self.request_structured("extract_skill", &prompt, params).await?;
        if !data.is_skill {
            return None;
        }
        Some(ExtractedSkill {
            name: data.name,
            description: data.description,
            steps: data.steps,
            app: data.app,
            triggers: data.triggers,
            confidence: data.confidence,
        })
    }

    /// Asks the oracle whether a rendered segment is a reusable workflow.
    ///
    /// Returns None when `is_workflow` is false or the oracle is unreachable.
    pub async fn analyze_workflow_segment(
        &self,
        actions_text: &str,
        app_name: &str,
    ) -> Option<WorkflowAnalysis> {
        let prompt = format!(
            "The following is a sequence of operations in the app '{app_name}'.\n\n\
             {actions_text}\n\n\
             Analyze whether this sequence can be extracted as a workflow (a\n\
             reusable procedure). Set is_workflow=true if it can, is_workflow=false\n\
             otherwise. If there are parameterizable slots (file names, URLs, etc.),\n\
             list them in parameters."
        );
        let params = GenerationParams::json_schema("workflow_analysis", workflow_schema());

        let data: WorkflowEnvelope =
            self.request_structured("analyze_workflow_segment", &prompt, params).await?;
        if !data.is_workflow {
            return None;
        }
        Some(WorkflowAnalysis {
            name: data.name,
            description: data.description,
            tags: data.tags,
            parameters: data.parameters,
            confidence: data.confidence,
        })
    }

    /// Selects the next action toward the goal during free exploration.
    pub async fn select_next_action(
        &self,
        goal: &str,
        current_state: &serde_json::Value,
        available_actions: &str,
        history: &str,
    ) -> Option<ActionChoice> {
        let state_text = serde_json::to_string_pretty(current_state).unwrap_or_default();
        let prompt = format!(
            "Goal: {goal}\n\nCurrent state:\n{state_text}\n\n\
             Available actions:\n{available_actions}\n\n\
             Operation history so far:\n{history}\n\n\
             Choose exactly one next action to make progress toward the goal.\n\
             If the goal is already achieved, set action_type='done'."
        );
        let params = GenerationParams::json_schema("action_selection", action_schema());
        self.request_structured("select_next_action", &prompt, params).await
    }

    /// Compares before/after screenshots against an expected change.
    ///
    /// Returns None when the oracle is unreachable or an image is unreadable,
    /// so callers can distinguish "verified" from "no signal".
    pub async fn verify_execution(
        &self,
        before_screenshot: &Path,
        after_screenshot: &Path,
        expected_change: &str,
    ) -> Option<VerifyOutcome> {
        let prompt = format!(
            "Compare the two screenshots below (taken before and after an action).\n\
             Expected change: {expected_change}\n\n\
             The first image is before, the second is after. Judge whether the\n\
             expected change actually happened and answer as JSON:\n\
             {{\"success\": true/false, \"reasoning\": \"why\"}}"
        );
        if !before_screenshot.exists() || !after_screenshot.exists() {
            warn!("screenshot missing, skipping verification");
            return None;
        }
        let images = [
            ImageAttachment::from_path(before_screenshot),
            ImageAttachment::from_path(after_screenshot),
        ];
        let content = match self
            .request_vision("verify_execution", &prompt, &images, GenerationParams::default())
            .await
        {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "execution verification failed");
                return None;
            }
        };
        match parse_json_content::<VerifyOutcome>(&content) {
            Some(outcome) => Some(outcome),
            // Free-form answer: keep the text as reasoning, count as not verified-success.
            None => Some(VerifyOutcome { success: false, reasoning: content }),
        }
    }

    /// Judges whether the goal has been achieved given the current state.
    ///
    /// Never fails; an unreachable oracle yields an unresolved check.
    pub async fn check_goal_achieved(
        &self,
        goal: &str,
        current_state: &serde_json::Value,
        history: &str,
    ) -> GoalCheck {
        let state_text = serde_json::to_string_pretty(current_state).unwrap_or_default();
        let prompt = format!(
            "Goal: {goal}\n\nCurrent state:\n{state_text}\n\n\
             Operation history:\n{history}\n\n\
             Judge whether the goal has been achieved and answer as JSON:\n\
             {{\"achieved\": true/false, \"confidence\": 0.0~1.0, \"reasoning\": \"why\"}}"
        );
        let content =
            match self.request_text("check_goal_achieved", &prompt, GenerationParams::default()).await
            {
                Ok(content) => content,
                Err(e) => {
                    warn!(error = %e, "goal check failed");
                    return GoalCheck::unresolved(e.to_string());
                }
            };
        parse_json_content::<GoalCheck>(&content)
            .unwrap_or_else(|| GoalCheck::unresolved(content))
    }

    /// Locates an element on a screenshot by description.
    pub async fn find_element_by_vision(
        &self,
        screenshot: &Path,
        element_description: &str,
    ) -> Option<VisionHit> {
        let prompt = format!(
            "Find the following element in the screenshot below:\n\
             \"{element_description}\"\n\n\
             Answer the element's center coordinates in pixels and your confidence\n\
             as JSON: {{\"x\": number, \"y\": number, \"confidence\": 0.0~1.0,\n\
             \"description\": \"what you found\"}}"
        );
        if !screenshot.exists() {
            warn!(screenshot = %screenshot.display(), "screenshot missing, skipping vision search");
            return None;
        }
        let images = [ImageAttachment::from_path(screenshot)];
        let content = match self
            .request_vision("find_element_by_vision", &prompt, &images, GenerationParams::default())
            .await
        {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "vision element search failed");
                return None;
            }
        };
        let hit = parse_json_content::<VisionHit>(&content);
        if hit.is_none() {
            warn!(content = %content, "vision response was not valid JSON");
        }
        hit
    }

    /// One structured call: text request + schema parse, with one parse retry.
    async fn request_structured<T: DeserializeOwned>(
        &self,
        operation: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> Option<T> {
        for parse_attempt in 0..2 {
            let content = match self.request_text(operation, prompt, params.clone()).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(operation, error = %e, "oracle call failed");
                    return None;
                }
            };
            match parse_json_content::<T>(&content) {
                Some(value) => return Some(value),
                None if parse_attempt == 0 => {
                    warn!(operation, "oracle returned non-conforming JSON, retrying once");
                }
                None => {
                    warn!(operation, content = %content, "oracle returned non-conforming JSON");
                }
            }
        }
        None
    }

    async fn request_text(
        &self,
        operation: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, OracleError> {
        let provider = &*self.provider;
        let params = &params;
        self.with_backoff(operation, move || async move {
            provider.generate_text(prompt, Some(params.clone())).await
        })
        .await
        .map(|r| r.content)
    }

    async fn request_vision(
        &self,
        operation: &str,
        prompt: &str,
        images: &[ImageAttachment],
        params: GenerationParams,
    ) -> Result<String, OracleError> {
        let provider = &*self.provider;
        let params = &params;
        self.with_backoff(operation, move || async move {
            provider.generate_vision(prompt, images, Some(params.clone())).await
        })
        .await
        .map(|r| r.content)
    }

    async fn with_backoff<F, Fut, T>(&self, operation: &str, call: F) -> Result<T, OracleError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, OracleError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = (u64::from(attempt) * 4).min(BACKOFF_CAP_SECS);
                    debug!(operation, attempt, delay_secs = delay, error = %e, "backing off");
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parses JSON content, tolerating markdown code fences around the document.
fn parse_json_content<T: DeserializeOwned>(content: &str) -> Option<T> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))?;
    serde_json::from_str(stripped.trim()).ok()
}

#[derive(Debug, serde::Deserialize)]
struct SkillEnvelope {
    name: String,
    description: String,
    steps: Vec<String>,
    app: String,
    triggers: Vec<String>,
    confidence: f64,
    is_skill: bool,
}

#[derive(Debug, serde::Deserialize)]
struct WorkflowEnvelope {
    name: String,
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    parameters: Vec<mimic_abstraction::WorkflowParameterSpec>,
    confidence: f64,
    is_workflow: bool,
}

fn skill_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "name": {"type": "string"},
            "description": {"type": "string"},
            "steps": {"type": "array", "items": {"type": "string"}},
            "app": {"type": "string"},
            "triggers": {"type": "array", "items": {"type": "string"}},
            "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            "is_skill": {"type": "boolean"}
        },
        "required": [
            "name", "description", "steps", "app",
            "triggers", "confidence", "is_skill"
        ]
    })
}

fn workflow_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "name": {"type": "string"},
            "description": {"type": "string"},
            "tags": {"type": "array", "items": {"type": "string"}},
            "parameters": {"type": "array", "items": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "step_index": {"type": "integer"}
                },
                "required": ["name", "description", "step_index"]
            }},
            "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            "is_workflow": {"type": "boolean"}
        },
        "required": [
            "name", "description", "tags", "parameters",
            "confidence", "is_workflow"
        ]
    })
}

fn action_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "action_type": {
                "type": "string",
                "enum": ["click", "right_click", "text_input", "key_shortcut", "wait", "done"]
            },
            "target_description": {"type": "string"},
            "x": {"type": "number"},
            "y": {"type": "number"},
            "text": {"type": "string"},
            "keycode": {"type": ["integer", "null"]},
            "flags": {"type": ["integer", "null"]},
            "modifiers": {"type": "array", "items": {"type": "string"}},
            "reasoning": {"type": "string"},
            "confidence": {"type": "number", "minimum": 0, "maximum": 1}
        },
        "required": [
            "action_type", "target_description", "x", "y",
            "text", "keycode", "flags", "modifiers",
            "reasoning", "confidence"
        ]
    })
}
