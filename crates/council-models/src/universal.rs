//! Universal OpenAI-compatible provider client.
//!
//! This module provides an implementation of the `ProviderClient` trait for
//! any gateway that speaks the OpenAI Chat Completions wire format. It backs
//! the hosted aggregators in the default catalog:
//!
//! - **Groq**: low-latency hosted open models
//! - **OpenRouter**: unified access to multiple upstream providers
//! - **Together**: hosted open models
//!
//! as well as self-hosted OpenAI-compatible servers.

use async_trait::async_trait;
use council_abstraction::{
    GenerationParams, HealthStatus, ProviderClient, ProviderError, ProviderResponse, TokenUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error};

use crate::wire::{map_error_status, retry_after_secs};

/// Universal OpenAI-compatible provider client.
#[derive(Debug, Clone)]
pub struct UniversalClient {
    /// Logical provider name used in breaker keys and usage summaries.
    provider: String,
    /// The upstream model identifier (e.g., "llama3-70b-8192").
    model_id: String,
    /// Base URL for the API endpoint.
    base_url: String,
    /// Optional API key (self-hosted servers often run without auth).
    api_key: Option<String>,
    /// HTTP client for requests.
    client: Client,
}

impl UniversalClient {
    /// Creates a new `UniversalClient` for an arbitrary endpoint.
    ///
    /// # Arguments
    /// * `provider` - Logical provider name (e.g., "groq")
    /// * `model_id` - The upstream model identifier
    /// * `base_url` - Base URL of the endpoint (e.g., "https://api.groq.com/openai/v1")
    /// * `api_key` - Optional API key
    #[must_use]
    pub fn new(
        provider: String,
        model_id: String,
        base_url: String,
        api_key: Option<String>,
    ) -> Self {
        Self { provider, model_id, base_url, api_key, client: Client::new() }
    }

    /// Creates a client for the Groq API, reading `GROQ_API_KEY`.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the key is not set.
    pub fn groq(model_id: String) -> Result<Self, ProviderError> {
        let api_key = env::var("GROQ_API_KEY").map_err(|_| {
            ProviderError::Unsupported("GROQ_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(
            "groq".to_string(),
            model_id,
            "https://api.groq.com/openai/v1".to_string(),
            Some(api_key),
        ))
    }

    /// Creates a client for the OpenRouter API, reading `OPENROUTER_API_KEY`.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the key is not set.
    pub fn openrouter(model_id: String) -> Result<Self, ProviderError> {
        let api_key = env::var("OPENROUTER_API_KEY").map_err(|_| {
            ProviderError::Unsupported(
                "OPENROUTER_API_KEY environment variable not set".to_string(),
            )
        })?;
        Ok(Self::new(
            "openrouter".to_string(),
            model_id,
            "https://openrouter.ai/api/v1".to_string(),
            Some(api_key),
        ))
    }

    /// Creates a client for the Together API, reading `TOGETHER_API_KEY`.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the key is not set.
    pub fn together(model_id: String) -> Result<Self, ProviderError> {
        let api_key = env::var("TOGETHER_API_KEY").map_err(|_| {
            ProviderError::Unsupported("TOGETHER_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(
            "together".to_string(),
            model_id,
            "https://api.together.xyz/v1".to_string(),
            Some(api_key),
        ))
    }

    /// Creates a client for a local server that requires no authentication.
    #[must_use]
    pub fn without_auth(provider: String, model_id: String, base_url: String) -> Self {
        Self::new(provider, model_id, base_url, None)
    }
}

#[async_trait]
impl ProviderClient for UniversalClient {
    async fn generate(
        &self,
        prompt: &str,
        params: Option<GenerationParams>,
    ) -> Result<ProviderResponse, ProviderError> {
        debug!(
            provider = %self.provider,
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "UniversalClient generating"
        );

        let url = format!("{}/chat/completions", self.base_url);

        let mut request_body = ChatRequest {
            model: self.model_id.clone(),
            messages: vec![ChatRequestMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
        };

        if let Some(params) = params {
            request_body.temperature = params.temperature;
            request_body.top_p = params.top_p;
            request_body.max_tokens = params.max_tokens;
            request_body.stop = params.stop_sequences;
        }

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(provider = %self.provider, error = %e, "Failed to send request");
            ProviderError::Transport(format!("Network error: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = %self.provider,
                status = %status,
                error = %error_text,
                "Endpoint returned error status"
            );
            return Err(map_error_status(&self.provider, status.as_u16(), &error_text, retry_after));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            error!(provider = %self.provider, error = %e, "Failed to parse response");
            ProviderError::InvalidResponse(format!("Failed to parse response: {e}"))
        })?;

        let text = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("No choices in API response".to_string())
            })?;

        let usage = chat_response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_else(|| {
                TokenUsage::new(crate::count_tokens(prompt), crate::count_tokens(&text))
            });

        Ok(ProviderResponse { text, model_id: self.model_id.clone(), usage })
    }

    async fn health_check(&self) -> HealthStatus {
        let url = format!("{}/models", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        match request.send().await {
            Ok(response) if response.status().is_success() => HealthStatus::Healthy,
            Ok(response) if response.status().is_server_error() => HealthStatus::Down,
            Ok(_) => HealthStatus::Degraded,
            Err(_) => HealthStatus::Down,
        }
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// OpenAI-compatible wire structures

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
