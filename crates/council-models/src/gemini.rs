//! Google Gemini provider client.
//!
//! This module provides an implementation of the `ProviderClient` trait for
//! Google's Gemini API.

use async_trait::async_trait;
use council_abstraction::{
    GenerationParams, HealthStatus, ProviderClient, ProviderError, ProviderResponse, TokenUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, error};

use crate::wire::{map_error_status, retry_after_secs};

/// Google Gemini provider client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    /// The model ID (e.g., "gemini-pro").
    model_id: String,
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the Gemini API.
    base_url: String,
    /// HTTP client for making requests.
    client: Client,
}

impl GeminiClient {
    /// Creates a new `GeminiClient` with the given model ID.
    ///
    /// # Arguments
    /// * `model_id` - The Gemini model ID to use (e.g., "gemini-pro")
    ///
    /// # Errors
    /// Returns a `ProviderError` if the API key is not found in environment variables.
    pub fn new(model_id: String) -> Result<Self, ProviderError> {
        let api_key = env::var("GEMINI_API_KEY").map_err(|_| {
            ProviderError::Unsupported("GEMINI_API_KEY environment variable not set".to_string())
        })?;

        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new `GeminiClient` with a custom API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self {
            model_id,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
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
impl ProviderClient for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        params: Option<GenerationParams>,
    ) -> Result<ProviderResponse, ProviderError> {
        debug!(
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            "GeminiClient generating"
        );

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model_id, self.api_key
        );

        let generation_config = params.map(|p| GeminiGenerationConfig {
            temperature: p.temperature,
            top_p: p.top_p,
            max_output_tokens: p.max_tokens,
            stop_sequences: p.stop_sequences,
        });

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt.to_string() }],
            }],
            generation_config,
        };

        let response =
            self.client.post(&url).json(&request_body).send().await.map_err(|e| {
                error!(error = %e, "Failed to send request to Gemini API");
                ProviderError::Transport(format!("Network error: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = %status, error = %error_text, "Gemini API returned error status");
            return Err(map_error_status("gemini", status.as_u16(), &error_text, retry_after));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Gemini API response");
            ProviderError::InvalidResponse(format!("Failed to parse response: {e}"))
        })?;

        let text = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("No candidates in API response".to_string())
            })?;

        let usage = gemini_response
            .usage_metadata
            .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_else(|| {
                TokenUsage::new(crate::count_tokens(prompt), crate::count_tokens(&text))
            });

        Ok(ProviderResponse { text, model_id: self.model_id.clone(), usage })
    }

    async fn health_check(&self) -> HealthStatus {
        let url = format!("{}/models?key={}", self.base_url, self.api_key);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => HealthStatus::Healthy,
            Ok(response) if response.status().is_server_error() => HealthStatus::Down,
            Ok(_) => HealthStatus::Degraded,
            Err(_) => HealthStatus::Down,
        }
    }

    fn provider(&self) -> &str {
        "gemini"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// Gemini API request/response structures

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: u32,
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_identity() {
        let client = GeminiClient::with_api_key("gemini-pro".to_string(), "test-key".to_string());
        assert_eq!(client.provider(), "gemini");
        assert_eq!(client.model_id(), "gemini-pro");
    }
}
