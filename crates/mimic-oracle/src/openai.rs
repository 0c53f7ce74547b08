//! OpenAI oracle implementation.
//!
//! This module provides an implementation of the `OracleProvider` trait for
//! OpenAI's chat completions API, including schema-constrained JSON output
//! and vision input via data URLs.

use async_trait::async_trait;
use mimic_abstraction::{
    GenerationParams, ImageAttachment, OracleError, OracleProvider, OracleResponse, OracleUsage,
    ResponseFormat,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error};

/// OpenAI oracle implementation.
#[derive(Debug, Clone)]
pub struct OpenAIOracle {
    /// The model ID (e.g., "gpt-5", "gpt-4o").
    model_id: String,
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the OpenAI API.
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl OpenAIOracle {
    /// Creates a new `OpenAIOracle` with the given model ID.
    ///
    /// # Arguments
    /// * `model_id` - The OpenAI model ID to use (e.g., "gpt-5")
    ///
    /// # Errors
    /// Returns an `OracleError` if `OPENAI_API_KEY` is not set.
    pub fn new(model_id: String) -> Result<Self, OracleError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            OracleError::UnsupportedProvider(
                "OPENAI_API_KEY environment variable not set".to_string(),
            )
        })?;
        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new `OpenAIOracle` with an explicit API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self {
            model_id,
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            client: Client::new(),
        }
    }

    fn build_request(
        &self,
        content: MessageContent,
        params: Option<GenerationParams>,
    ) -> ChatRequest {
        let mut request = ChatRequest {
            model: self.model_id.clone(),
            messages: vec![ChatMessage { role: "user".to_string(), content }],
            temperature: None,
            max_completion_tokens: None,
            response_format: None,
        };

        if let Some(params) = params {
            request.temperature = params.temperature;
            request.max_completion_tokens = params.max_output_tokens;
            request.response_format = params.response_format.map(|format| match format {
                ResponseFormat::Text => ApiResponseFormat::plain("text"),
                ResponseFormat::Json => ApiResponseFormat::plain("json_object"),
                ResponseFormat::JsonSchema { name, schema } => ApiResponseFormat {
                    kind: "json_schema".to_string(),
                    json_schema: Some(JsonSchemaSpec { name, schema, strict: true }),
                },
            });
        }

        request
    }

    async fn send(&self, request: ChatRequest) -> Result<OracleResponse, OracleError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send request to OpenAI API");
                OracleError::RequestError(format!("Network error: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "OpenAI API returned error status");

            if status.as_u16() == 429 || status.as_u16() == 402 {
                return Err(OracleError::RateLimited {
                    provider: "openai".to_string(),
                    message: Some(error_text),
                });
            }
            if status.is_server_error() {
                return Err(OracleError::Unavailable {
                    provider: "openai".to_string(),
                    status: status.as_u16(),
                });
            }
            return Err(OracleError::ResponseError(format!(
                "API error ({status}): {error_text}"
            )));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse OpenAI API response");
            OracleError::SerializationError(format!("Failed to parse response: {e}"))
        })?;

        let content = chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| {
                error!("No content in OpenAI API response");
                OracleError::ResponseError("No content in API response".to_string())
            })?;

        let usage = chat_response.usage.map(|u| OracleUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(OracleResponse { content, model_id: Some(self.model_id.clone()), usage })
    }
}

#[async_trait]
impl OracleProvider for OpenAIOracle {
    async fn generate_text(
        &self,
        prompt: &str,
        params: Option<GenerationParams>,
    ) -> Result<OracleResponse, OracleError> {
        debug!(
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "OpenAIOracle generating text"
        );
        let request = self.build_request(MessageContent::Text(prompt.to_string()), params);
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
            "OpenAIOracle generating vision response"
        );

        let mut parts = vec![ContentPart::Text { text: prompt.to_string() }];
        for image in images {
            parts.push(ContentPart::ImageUrl { image_url: ImageUrl { url: image.to_data_url()? } });
        }

        let request = self.build_request(MessageContent::Parts(parts), params);
        self.send(request).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// OpenAI API request/response structures

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ApiResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ApiResponseFormat {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_schema: Option<JsonSchemaSpec>,
}

impl ApiResponseFormat {
    fn plain(kind: &str) -> Self {
        Self { kind: kind.to_string(), json_schema: None }
    }
}

#[derive(Debug, Serialize)]
struct JsonSchemaSpec {
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)] // Matches API naming
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
