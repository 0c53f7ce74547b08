//! Oracle factory for creating provider instances from configuration.
//!
//! This module provides functionality to create oracle providers based on
//! configuration, handling API key loading from environment variables.

use crate::{GeminiOracle, MockOracle, OpenAIOracle};
use mimic_abstraction::{OracleError, OracleProvider};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Oracle provider enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Scripted mock provider for testing.
    Mock,
    /// OpenAI GPT models.
    OpenAI,
    /// Google Gemini models.
    Gemini,
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "openai" => Ok(Self::OpenAI),
            "gemini" | "google" => Ok(Self::Gemini),
            _ => Err(()),
        }
    }
}

/// Oracle configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// The provider to create.
    pub kind: ProviderKind,
    /// The model ID (e.g., "gpt-5", "gemini-2.0-flash").
    pub model_id: String,
    /// Optional API key (if not provided, loaded from the environment).
    pub api_key: Option<String>,
}

impl OracleConfig {
    /// Creates a new `OracleConfig` with the given kind and model ID.
    #[must_use]
    pub fn new(kind: ProviderKind, model_id: String) -> Self {
        Self { kind, model_id, api_key: None }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }
}

/// Factory for creating oracle provider instances.
pub struct OracleFactory;

impl OracleFactory {
    /// Creates a provider instance from the given configuration.
    ///
    /// # Errors
    /// Returns an `OracleError` if creation fails (e.g., missing API key).
    pub fn create(config: OracleConfig) -> Result<Arc<dyn OracleProvider>, OracleError> {
        debug!(kind = ?config.kind, model_id = %config.model_id, "Creating oracle provider");

        match config.kind {
            ProviderKind::Mock => Ok(Arc::new(MockOracle::always(config.model_id, "{}"))),
            ProviderKind::OpenAI => {
                let oracle = if let Some(api_key) = config.api_key {
                    OpenAIOracle::with_api_key(config.model_id, api_key)
                } else {
                    OpenAIOracle::new(config.model_id)?
                };
                Ok(Arc::new(oracle))
            }
            ProviderKind::Gemini => {
                let oracle = if let Some(api_key) = config.api_key {
                    GeminiOracle::with_api_key(config.model_id, api_key)
                } else {
                    GeminiOracle::new(config.model_id)?
                };
                Ok(Arc::new(oracle))
            }
        }
    }

    /// Creates a provider instance from a provider name and model ID.
    ///
    /// # Errors
    /// Returns an `OracleError` if the provider name is unrecognized or
    /// creation fails.
    pub fn create_from_str(
        provider: &str,
        model_id: String,
    ) -> Result<Arc<dyn OracleProvider>, OracleError> {
        let kind = ProviderKind::from_str(provider).map_err(|()| {
            error!(provider = %provider, "Unrecognized oracle provider");
            OracleError::UnsupportedProvider(format!("Unrecognized provider: {provider}"))
        })?;
        Self::create(OracleConfig::new(kind, model_id))
    }
}
