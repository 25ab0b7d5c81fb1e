//! OpenAI provider client.
//!
//! This module provides an implementation of the `ProviderClient` trait for
//! OpenAI's Chat Completions API.

use async_trait::async_trait;
use council_abstraction::{
    GenerationParams, HealthStatus, ProviderClient, ProviderError, ProviderResponse, TokenUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error};

use crate::wire::{map_error_status, retry_after_secs};

/// OpenAI provider client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    /// The model ID (e.g., "gpt-4", "gpt-3.5-turbo").
    model_id: String,
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the OpenAI API.
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl OpenAiClient {
    /// Creates a new `OpenAiClient` with the given model ID.
    ///
    /// # Arguments
    /// * `model_id` - The OpenAI model ID to use (e.g., "gpt-4")
    ///
    /// # Errors
    /// Returns a `ProviderError` if the API key is not found in environment variables.
    pub fn new(model_id: String) -> Result<Self, ProviderError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            ProviderError::Unsupported("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new `OpenAiClient` with a custom API key.
    ///
    /// # Arguments
    /// * `model_id` - The OpenAI model ID to use
    /// * `api_key` - The API key for authentication
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self {
            model_id,
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            client: Client::new(),
        }
    }

    /// Overrides the base URL (used by tests against a local stub server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    async fn generate(
        &self,
        prompt: &str,
        params: Option<GenerationParams>,
    ) -> Result<ProviderResponse, ProviderError> {
        debug!(
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "OpenAiClient generating"
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

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send request to OpenAI API");
                ProviderError::Transport(format!("Network error: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "OpenAI API returned error status");
            return Err(map_error_status("openai", status.as_u16(), &error_text, retry_after));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse OpenAI API response");
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
        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(response) if response.status().is_success() => HealthStatus::Healthy,
            Ok(response) if response.status().is_server_error() => HealthStatus::Down,
            Ok(_) => HealthStatus::Degraded,
            Err(_) => HealthStatus::Down,
        }
    }

    fn provider(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// OpenAI API request/response structures

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
