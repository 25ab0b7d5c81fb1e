//! Provider client implementations for Council.
//!
//! This crate provides concrete implementations of the `ProviderClient` trait.
//!
//! # Supported Providers
//!
//! - **Mock**: Testing and development
//! - **OpenAI**: GPT models (API key required)
//! - **Gemini**: Google's Gemini models (API key required)
//! - **Groq / OpenRouter / Together**: hosted gateways speaking the
//!   OpenAI-compatible wire format (API key required)
//! - **Ollama**: Local models (no API key, local execution)

pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod universal;

mod wire;

use async_trait::async_trait;
use council_abstraction::{
    GenerationParams, HealthStatus, ProviderClient, ProviderError, ProviderResponse, TokenUsage,
};
use tracing::debug;

pub use factory::{ClientConfig, ClientFactory, ProviderKind};
pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use universal::UniversalClient;

/// A mock implementation of the `ProviderClient` trait for testing.
#[derive(Debug, Default)]
pub struct MockClient {
    id: String,
    canned_response: Option<String>,
}

impl MockClient {
    /// Creates a new `MockClient` with the given model ID.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self { id, canned_response: None }
    }

    /// Sets a fixed response text returned by every call.
    #[must_use]
    pub fn with_response(mut self, response: String) -> Self {
        self.canned_response = Some(response);
        self
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    async fn generate(
        &self,
        prompt: &str,
        params: Option<GenerationParams>,
    ) -> Result<ProviderResponse, ProviderError> {
        debug!(
            model_id = %self.id,
            prompt = %prompt,
            params = ?params,
            "MockClient generating"
        );

        let text = self
            .canned_response
            .clone()
            .unwrap_or_else(|| format!("Mock response from {} for: {prompt}", self.id));

        let usage = TokenUsage::new(count_tokens(prompt), count_tokens(&text));

        Ok(ProviderResponse { text, model_id: self.id.clone(), usage })
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    fn provider(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// Rough token count used when a provider omits usage data.
///
/// Uses the common 4-characters-per-token approximation.
#[must_use]
pub fn count_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(4)
}
