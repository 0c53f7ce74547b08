//! Google Gemini oracle implementation.
//!
//! This module provides an implementation of the `OracleProvider` trait for
//! Google's Gemini generateContent API. Structured output uses
//! `responseMimeType`/`responseSchema`; screenshots are attached as inline
//! data parts.

use async_trait::async_trait;
use mimic_abstraction::{
    GenerationParams, ImageAttachment, OracleError, OracleProvider, OracleResponse, OracleUsage,
    ResponseFormat,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error};

/// Google Gemini oracle implementation.
#[derive(Debug, Clone)]
pub struct GeminiOracle {
    /// The model ID (e.g., "gemini-2.0-flash").
    model_id: String,
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the Gemini API.
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl GeminiOracle {
    /// Creates a new `GeminiOracle` with the given model ID.
    ///
    /// # Errors
    /// Returns an `OracleError` if `GEMINI_API_KEY` is not set.
    pub fn new(model_id: String) -> Result<Self, OracleError> {
        let api_key = env::var("GEMINI_API_KEY").map_err(|_| {
            OracleError::UnsupportedProvider(
                "GEMINI_API_KEY environment variable not set".to_string(),
            )
        })?;
        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new `GeminiOracle` with an explicit API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self {
            model_id,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            client: Client::new(),
        }
    }

    /// Removes schema keys Gemini rejects (`additionalProperties`, `strict`).
    fn sanitize_schema(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let cleaned = map
                    .iter()
                    .filter(|(key, _)| {
                        key.as_str() != "additionalProperties" && key.as_str() != "strict"
                    })
                    .map(|(key, val)| (key.clone(), Self::sanitize_schema(val)))
                    .collect();
                serde_json::Value::Object(cleaned)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::sanitize_schema).collect())
            }
            other => other.clone(),
        }
    }

    fn generation_config(params: Option<GenerationParams>) -> Option<GenerationConfig> {
        let params = params?;
        let mut config = GenerationConfig {
            temperature: params.temperature,
            max_output_tokens: params.max_output_tokens,
            response_mime_type: None,
            response_schema: None,
        };
        match params.response_format {
            Some(ResponseFormat::Json) => {
                config.response_mime_type = Some("application/json".to_string());
            }
            Some(ResponseFormat::JsonSchema { schema, .. }) => {
                config.response_mime_type = Some("application/json".to_string());
                config.response_schema = Some(Self::sanitize_schema(&schema));
            }
            _ => {}
        }
        Some(config)
    }

    async fn send(&self, request: GenerateRequest) -> Result<OracleResponse, OracleError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model_id, self.api_key
        );

        let response = self.client.post(&url).json(&request).send().await.map_err(|e| {
            error!(error = %e, "Failed to send request to Gemini API");
            OracleError::RequestError(format!("Network error: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Gemini API returned error status");

            if status.as_u16() == 429 {
                return Err(OracleError::RateLimited {
                    provider: "gemini".to_string(),
                    message: Some(error_text),
                });
            }
            if status.is_server_error() {
                return Err(OracleError::Unavailable {
                    provider: "gemini".to_string(),
                    status: status.as_u16(),
                });
            }
            return Err(OracleError::ResponseError(format!(
                "API error ({status}): {error_text}"
            )));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Gemini API response");
            OracleError::SerializationError(format!("Failed to parse response: {e}"))
        })?;

        let content = body
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .and_then(|p| p.text.clone())
            .ok_or_else(|| {
                error!("No content in Gemini API response");
                OracleError::ResponseError("No content in API response".to_string())
            })?;

        let usage = body.usage_metadata.map(|u| OracleUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        Ok(OracleResponse { content, model_id: Some(self.model_id.clone()), usage })
    }
}

#[async_trait]
impl OracleProvider for GeminiOracle {
    async fn generate_text(
        &self,
        prompt: &str,
        params: Option<GenerationParams>,
    ) -> Result<OracleResponse, OracleError> {
        debug!(
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "GeminiOracle generating text"
        );

        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part::text(prompt)],
            }],
            generation_config: Self::generation_config(params),
        };
        self.send(request).await
    }

    async fn generate_vision(
        &self,
        prompt: &str,
        images: &[ImageAttachment],
        params: Option<GenerationParams>,
    ) -> Result<OracleResponse, OracleError> {
        debug!(
            model_id = %self.model_id,
            image_count = images.len(),
            "GeminiOracle generating vision response"
        );

        let mut parts = vec![Part::text(prompt)];
        for image in images {
            parts.push(Part {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: image.media_type().to_string(),
                    data: image.read_base64()?,
                }),
            });
        }

        let request = GenerateRequest {
            contents: vec![Content { role: "user".to_string(), parts }],
            generation_config: Self::generation_config(params),
        };
        self.send(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// Gemini API request/response structures

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inline_data", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self { text: Some(text.to_string()), inline_data: None }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct InlineData {
    #[serde(rename = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}
