//! Provider abstraction layer for Council.
//!
//! This crate defines the capability trait and wire types for talking to
//! language-model providers. Orchestration logic lives above this layer;
//! provider HTTP formats live below it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents a typed failure from a provider client.
///
/// Failures are data: every variant carries enough context for the caller
/// to decide between fallback, retry, and surfacing the error.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderError {
    /// The provider rejected the call due to rate limiting or quota.
    #[error("Provider '{provider}' rate limited{}", retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited {
        /// The provider name (e.g., "openai", "gemini").
        provider: String,
        /// Suggested retry delay in seconds, when the provider supplied one.
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },

    /// The call exceeded its deadline.
    #[error("Provider call timed out after {elapsed_ms}ms")]
    Timeout {
        /// Elapsed time before the deadline fired, in milliseconds.
        elapsed_ms: u64,
    },

    /// Network-level failure (connect, DNS, TLS, broken stream).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Authentication or authorization failure.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The provider returned a server-side error status.
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Error message from the provider, already sanitized.
        message: String,
    },

    /// The provider response could not be decoded.
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// The call was cancelled cooperatively.
    #[error("Provider call cancelled")]
    Cancelled,

    /// The provider is not configured or not supported.
    #[error("Unsupported provider: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Whether a fallback to another model is worth attempting.
    ///
    /// Cancellation and configuration errors are terminal; everything else
    /// is a property of the failing provider, not of the subtask.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Unsupported(_))
    }

    /// Stable machine-readable code for this error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limit",
            Self::Timeout { .. } => "timeout",
            Self::Transport(_) => "transport",
            Self::Auth(_) => "auth",
            Self::Server { .. } => "server_error",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Cancelled => "cancelled",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

/// Parameters for controlling text generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature, between 0 and 2.
    pub temperature: Option<f32>,

    /// Nucleus sampling mass.
    pub top_p: Option<f32>,

    /// Maximum number of tokens to generate.
    pub max_tokens: Option<u32>,

    /// Sequences at which the provider stops generating.
    pub stop_sequences: Option<Vec<String>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: Some(1.0),
            max_tokens: Some(1024),
            stop_sequences: None,
        }
    }
}

/// Token accounting for a single provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt.
    pub input_tokens: u32,

    /// Number of tokens in the completion.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Creates a new usage record.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self { input_tokens, output_tokens }
    }

    /// Total tokens consumed by the call.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// The response from a provider generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated text.
    pub text: String,

    /// The model that produced the response.
    pub model_id: String,

    /// Token usage reported (or estimated) for the call.
    pub usage: TokenUsage,
}

/// Health of a provider endpoint as seen from this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Endpoint reachable and responding normally.
    Healthy,
    /// Endpoint reachable but slow or partially failing.
    Degraded,
    /// Endpoint unreachable or failing consistently.
    Down,
}

impl HealthStatus {
    /// Whether the provider can receive traffic at all.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Down)
    }
}

/// A capability for making blocking-style generation requests to one model.
///
/// One instance per (provider, model). Implementations must be `Send + Sync`
/// so the executor can share them across concurrent subtasks.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Generates a completion for the given prompt.
    ///
    /// # Arguments
    /// * `prompt` - The input prompt
    /// * `params` - Optional generation parameters
    ///
    /// # Errors
    /// Returns a `ProviderError` describing the failure; callers route
    /// retryable errors through the breaker and fallback path.
    async fn generate(
        &self,
        prompt: &str,
        params: Option<GenerationParams>,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Probes the provider endpoint.
    async fn health_check(&self) -> HealthStatus;

    /// Returns the provider name (e.g., "openai").
    fn provider(&self) -> &str;

    /// Returns the model ID this client targets.
    fn model_id(&self) -> &str;
}
