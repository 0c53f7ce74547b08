//! Oracle abstraction layer for Mimic.
//!
//! This crate defines the provider trait and the typed request/response
//! surface for the AI oracle that analyzes capture sessions, names workflows,
//! selects actions during free exploration, and judges screenshots.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Represents an error that can occur when talking to an oracle provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// An error occurred during the API request (e.g., network issues).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The provider returned an error response.
    #[error("Oracle Response Error: {0}")]
    ResponseError(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    SerializationError(String),

    /// The provider is not supported or not configured.
    #[error("Unsupported Oracle Provider: {0}")]
    UnsupportedProvider(String),

    /// Provider rate limit or quota hit; the caller may back off and retry.
    #[error("Provider '{provider}' rate limited{}", message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
    RateLimited {
        /// The provider name (e.g., "openai", "gemini").
        provider: String,
        /// Optional error message from the provider.
        message: Option<String>,
    },

    /// Provider returned a 5xx; the caller may back off and retry.
    #[error("Provider '{provider}' unavailable (status {status})")]
    Unavailable {
        /// The provider name.
        provider: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The provider returned output that does not conform to the requested schema.
    #[error("Schema mismatch in {operation}: {detail}")]
    SchemaMismatch {
        /// The oracle operation that requested the schema.
        operation: String,
        /// What failed to parse.
        detail: String,
    },
}

impl OracleError {
    /// Whether a bounded backoff-and-retry is appropriate for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Unavailable { .. })
    }
}

/// Format for oracle response output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseFormat {
    /// Plain text output (default).
    Text,
    /// JSON-formatted output without schema validation.
    Json,
    /// JSON output conforming to the provided schema.
    JsonSchema {
        /// Schema name (surfaced to the provider where supported).
        name: String,
        /// The JSON Schema document.
        schema: serde_json::Value,
    },
}

/// Parameters for controlling an oracle generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// The maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Reasoning effort hint ("low", "medium", "high") for providers that take one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,

    /// Format for the response output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: None,
            max_output_tokens: Some(2000),
            reasoning_effort: Some("medium".to_string()),
            response_format: None,
        }
    }
}

impl GenerationParams {
    /// Creates parameters requesting schema-constrained JSON output.
    #[must_use]
    pub fn json_schema(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            response_format: Some(ResponseFormat::JsonSchema { name: name.into(), schema }),
            ..Self::default()
        }
    }

    /// Sets the reasoning effort hint.
    #[must_use]
    pub fn with_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }
}

/// Usage statistics for an oracle request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleUsage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,
    /// Number of tokens in the completion.
    pub completion_tokens: u32,
    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// The response from an oracle generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleResponse {
    /// The generated content.
    pub content: String,
    /// The ID of the model that produced the response.
    pub model_id: Option<String>,
    /// Usage statistics, when the provider reports them.
    pub usage: Option<OracleUsage>,
}

/// A screenshot attached to a vision request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Path to the image file on disk.
    pub path: PathBuf,
}

impl ImageAttachment {
    /// Creates an attachment for the given path.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The MIME type inferred from the file extension (png unless jpeg).
    pub fn media_type(&self) -> &'static str {
        match self.path.extension().and_then(|e| e.to_str()) {
            Some("jpg" | "jpeg") => "image/jpeg",
            _ => "image/png",
        }
    }

    /// Reads the file and returns its base64-encoded bytes.
    ///
    /// # Errors
    /// Returns an `OracleError` if the file cannot be read.
    pub fn read_base64(&self) -> Result<String, OracleError> {
        use base64::Engine;
        let bytes = std::fs::read(&self.path).map_err(|e| {
            OracleError::RequestError(format!(
                "failed to read image {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// Formats the image as a `data:` URL.
    ///
    /// # Errors
    /// Returns an `OracleError` if the file cannot be read.
    pub fn to_data_url(&self) -> Result<String, OracleError> {
        Ok(format!("data:{};base64,{}", self.media_type(), self.read_base64()?))
    }
}

/// A trait for oracle provider backends.
///
/// All providers must be `Send + Sync` to allow concurrent use across tasks.
#[async_trait]
pub trait OracleProvider: Send + Sync {
    /// Generates a text (or schema-constrained JSON) completion for the prompt.
    ///
    /// # Errors
    /// Returns an `OracleError` if generation fails.
    async fn generate_text(
        &self,
        prompt: &str,
        params: Option<GenerationParams>,
    ) -> Result<OracleResponse, OracleError>;

    /// Generates a completion for a prompt accompanied by screenshots.
    ///
    /// # Errors
    /// Returns an `OracleError` if generation fails or an image cannot be read.
    async fn generate_vision(
        &self,
        prompt: &str,
        images: &[ImageAttachment],
        params: Option<GenerationParams>,
    ) -> Result<OracleResponse, OracleError>;

    /// Returns the ID of the underlying model.
    fn model_id(&self) -> &str;
}

/// A rendered view of a capture session handed to the oracle for analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTranscript {
    /// The session identifier.
    pub session_id: String,
    /// The application the session was recorded in.
    pub app_name: String,
    /// ISO-8601 timestamp of the first record.
    pub start_time: String,
    /// ISO-8601 timestamp of the last record.
    pub end_time: String,
    /// Number of records in the session.
    pub record_count: usize,
    /// One rendered line per record.
    pub lines: Vec<String>,
}

/// The oracle's free-text summary of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAnalysis {
    /// The analyzed session's identifier.
    pub session_id: String,
    /// The summary text.
    pub summary: String,
}

/// A reusable operation pattern extracted from a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSkill {
    /// Short name of the skill.
    pub name: String,
    /// What the skill accomplishes.
    pub description: String,
    /// Human-readable step descriptions.
    pub steps: Vec<String>,
    /// The application the skill applies to.
    pub app: String,
    /// Phrases that should trigger the skill.
    pub triggers: Vec<String>,
    /// Extraction confidence in [0, 1].
    pub confidence: f64,
}

/// A parameterizable slot the oracle identified inside a workflow segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowParameterSpec {
    /// Parameter name (e.g., "filename").
    pub name: String,
    /// What the parameter controls.
    pub description: String,
    /// Index of the step the parameter binds to.
    pub step_index: i64,
}

/// The oracle's verdict on a workflow segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAnalysis {
    /// Suggested workflow name.
    pub name: String,
    /// Suggested description.
    pub description: String,
    /// Suggested tags.
    pub tags: Vec<String>,
    /// Parameterizable slots.
    pub parameters: Vec<WorkflowParameterSpec>,
    /// Confidence that the segment is a reusable workflow, in [0, 1].
    pub confidence: f64,
}

/// Kinds of action the oracle may choose during free exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceKind {
    /// Left click at the given coordinates.
    Click,
    /// Right click at the given coordinates.
    RightClick,
    /// Type the given text.
    TextInput,
    /// Press a keyboard shortcut.
    KeyShortcut,
    /// Do nothing for a moment.
    Wait,
    /// The goal is already achieved.
    Done,
}

impl ChoiceKind {
    /// The snake_case name used in step records and prompts.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::RightClick => "right_click",
            Self::TextInput => "text_input",
            Self::KeyShortcut => "key_shortcut",
            Self::Wait => "wait",
            Self::Done => "done",
        }
    }
}

/// The oracle's choice of next action during free exploration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionChoice {
    /// What kind of action to take.
    pub action_type: ChoiceKind,
    /// Description of the intended target element.
    #[serde(default)]
    pub target_description: String,
    /// Target x coordinate.
    #[serde(default)]
    pub x: f64,
    /// Target y coordinate.
    #[serde(default)]
    pub y: f64,
    /// Text to type, for text input.
    #[serde(default)]
    pub text: String,
    /// Keycode, for shortcuts.
    #[serde(default)]
    pub keycode: Option<i64>,
    /// Modifier flags, for shortcuts.
    #[serde(default)]
    pub flags: Option<i64>,
    /// Modifier names, for shortcuts.
    #[serde(default)]
    pub modifiers: Vec<String>,
    /// Why the oracle chose this action.
    #[serde(default)]
    pub reasoning: String,
    /// The oracle's confidence in the choice, in [0, 1].
    #[serde(default)]
    pub confidence: f64,
    /// Set by the selector when the action targets a sensitive application.
    #[serde(default)]
    pub requires_confirmation: bool,
}

/// The outcome of a before/after screenshot comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    /// Whether the expected change was observed.
    pub success: bool,
    /// Why the oracle judged as it did.
    #[serde(default)]
    pub reasoning: String,
}

/// The outcome of a goal-achievement check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalCheck {
    /// Whether the goal appears achieved.
    pub achieved: bool,
    /// The oracle's confidence, in [0, 1].
    #[serde(default)]
    pub confidence: f64,
    /// Why the oracle judged as it did.
    #[serde(default)]
    pub reasoning: String,
}

impl GoalCheck {
    /// The neutral result used when the oracle is unreachable.
    #[must_use]
    pub fn unresolved(reasoning: impl Into<String>) -> Self {
        Self { achieved: false, confidence: 0.0, reasoning: reasoning.into() }
    }
}

/// An element located on a screenshot by vision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionHit {
    /// Center x coordinate in pixels.
    pub x: f64,
    /// Center y coordinate in pixels.
    pub y: f64,
    /// The oracle's confidence, in [0, 1].
    #[serde(default)]
    pub confidence: f64,
    /// What the oracle believes it found.
    #[serde(default)]
    pub description: String,
}
