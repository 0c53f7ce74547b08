//! Oracle provider implementations for Mimic.
//!
//! This crate provides concrete implementations of the `OracleProvider` trait
//! and the high-level [`Oracle`] adapter used by the extractor and the
//! autonomous loop.
//!
//! # Supported Providers
//!
//! - **Mock**: Scripted responses for testing and offline development
//! - **OpenAI**: GPT models (`OPENAI_API_KEY` required)
//! - **Gemini**: Google's Gemini models (`GEMINI_API_KEY` required)

pub mod adapter;
pub mod factory;
pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use mimic_abstraction::{
    GenerationParams, ImageAttachment, OracleError, OracleProvider, OracleResponse,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

pub use adapter::Oracle;
pub use factory::{OracleConfig, OracleFactory, ProviderKind};
pub use gemini::GeminiOracle;
pub use openai::OpenAIOracle;

/// A scripted implementation of the `OracleProvider` trait for tests.
///
/// Responses are popped from a queue in call order; when the queue runs dry,
/// the optional fallback response is repeated. Both text and vision calls
/// drain the same queue.
#[derive(Debug, Default)]
pub struct MockOracle {
    id: String,
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    fallback: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl MockOracle {
    /// Creates a new `MockOracle` with the given ID and no scripted responses.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a mock that repeats the same response for every call.
    #[must_use]
    pub fn always(id: impl Into<String>, response: impl Into<String>) -> Self {
        let mut mock = Self::new(id);
        mock.fallback = Some(response.into());
        mock
    }

    /// Queues a successful response.
    pub fn push_response(&self, content: impl Into<String>) {
        self.script.lock().expect("script lock").push_back(Ok(content.into()));
    }

    /// Queues an error.
    pub fn push_error(&self, error: OracleError) {
        self.script.lock().expect("script lock").push_back(Err(error));
    }

    /// Prompts observed so far, in call order.
    pub fn recorded_prompts(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Number of calls observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    fn next_response(&self, prompt: &str) -> Result<OracleResponse, OracleError> {
        self.calls.lock().expect("calls lock").push(prompt.to_string());
        let scripted = self.script.lock().expect("script lock").pop_front();
        let content = match scripted {
            Some(Ok(content)) => content,
            Some(Err(e)) => return Err(e),
            None => self.fallback.clone().ok_or_else(|| {
                OracleError::RequestError("mock oracle script exhausted".to_string())
            })?,
        };
        Ok(OracleResponse { content, model_id: Some(self.id.clone()), usage: None })
    }
}

#[async_trait]
impl OracleProvider for MockOracle {
    async fn generate_text(
        &self,
        prompt: &str,
        params: Option<GenerationParams>,
    ) -> Result<OracleResponse, OracleError> {
        debug!(model_id = %self.id, prompt_len = prompt.len(), params = ?params, "MockOracle generating text");
        self.next_response(prompt)
    }

    async fn generate_vision(
        &self,
        prompt: &str,
        images: &[ImageAttachment],
        params: Option<GenerationParams>,
    ) -> Result<OracleResponse, OracleError> {
        debug!(
            model_id = %self.id,
            image_count = images.len(),
            params = ?params,
            "MockOracle generating vision response"
        );
        self.next_response(prompt)
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_scripted_order() {
        let mock = MockOracle::new("mock-1");
        mock.push_response("first");
        mock.push_response("second");

        let a = mock.generate_text("p1", None).await.unwrap();
        let b = mock.generate_text("p2", None).await.unwrap();
        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_fallback_repeats() {
        let mock = MockOracle::always("mock-1", "{\"ok\":true}");
        for _ in 0..3 {
            let res = mock.generate_text("p", None).await.unwrap();
            assert_eq!(res.content, "{\"ok\":true}");
        }
    }

    #[tokio::test]
    async fn test_mock_exhausted_errors() {
        let mock = MockOracle::new("mock-1");
        let err = mock.generate_text("p", None).await.unwrap_err();
        assert!(matches!(err, OracleError::RequestError(_)));
    }

    #[tokio::test]
    async fn test_mock_scripted_error() {
        let mock = MockOracle::new("mock-1");
        mock.push_error(OracleError::RateLimited {
            provider: "mock".to_string(),
            message: None,
        });
        let err = mock.generate_text("p", None).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
