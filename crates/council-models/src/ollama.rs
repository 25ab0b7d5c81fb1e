//! Ollama provider client.
//!
//! This module provides an implementation of the `ProviderClient` trait for
//! Ollama's local API. No API key is required; the deployment mode decides
//! whether local models are loaded at all.

use async_trait::async_trait;
use council_abstraction::{
    GenerationParams, HealthStatus, ProviderClient, ProviderError, ProviderResponse, TokenUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::wire::map_error_status;

/// Ollama provider client.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    /// The model ID (e.g., "llama2", "codellama").
    model_id: String,
    /// The base URL for the Ollama API (default: "http://localhost:11434").
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl OllamaClient {
    /// Creates a new `OllamaClient` with the given model ID.
    ///
    /// Uses the default Ollama server URL: `http://localhost:11434`
    #[must_use]
    pub fn new(model_id: String) -> Self {
        Self::with_base_url(model_id, "http://localhost:11434".to_string())
    }

    /// Creates a new `OllamaClient` with a custom base URL.
    ///
    /// # Arguments
    /// * `model_id` - The Ollama model ID to use
    /// * `base_url` - The base URL for the Ollama API
    #[must_use]
    pub fn with_base_url(model_id: String, base_url: String) -> Self {
        Self { model_id, base_url, client: Client::new() }
    }
}

#[async_trait]
impl ProviderClient for OllamaClient {
    async fn generate(
        &self,
        prompt: &str,
        params: Option<GenerationParams>,
    ) -> Result<ProviderResponse, ProviderError> {
        debug!(
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "OllamaClient generating"
        );

        let url = format!("{}/api/generate", self.base_url);

        let options = params.map(|p| OllamaOptions {
            temperature: p.temperature,
            top_p: p.top_p,
            num_predict: p.max_tokens,
            stop: p.stop_sequences,
        });

        let request_body = OllamaGenerateRequest {
            model: self.model_id.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options,
        };

        let response =
            self.client.post(&url).json(&request_body).send().await.map_err(|e| {
                error!(error = %e, "Failed to send request to Ollama");
                ProviderError::Transport(format!("Network error: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Ollama returned error status");
            return Err(map_error_status("ollama", status.as_u16(), &error_text, None));
        }

        let ollama_response: OllamaGenerateResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Ollama response");
            ProviderError::InvalidResponse(format!("Failed to parse response: {e}"))
        })?;

        // Ollama reports eval counts instead of token usage.
        let usage = TokenUsage::new(
            ollama_response.prompt_eval_count.unwrap_or_else(|| crate::count_tokens(prompt)),
            ollama_response
                .eval_count
                .unwrap_or_else(|| crate::count_tokens(&ollama_response.response)),
        );

        Ok(ProviderResponse {
            text: ollama_response.response,
            model_id: self.model_id.clone(),
            usage,
        })
    }

    async fn health_check(&self) -> HealthStatus {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => HealthStatus::Healthy,
            Ok(_) => HealthStatus::Degraded,
            Err(_) => HealthStatus::Down,
        }
    }

    fn provider(&self) -> &str {
        "ollama"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// Ollama API request/response structures

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}
