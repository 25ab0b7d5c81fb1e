//! Client factory for creating provider clients from configuration.
//!
//! This module builds `ProviderClient` instances from catalog entries,
//! handling API key loading from environment variables.

use crate::{GeminiClient, MockClient, OllamaClient, OpenAiClient, UniversalClient};
use council_abstraction::{ProviderClient, ProviderError};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Provider kind enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Mock provider for testing.
    Mock,
    /// OpenAI.
    OpenAi,
    /// Google Gemini.
    Gemini,
    /// Groq (OpenAI-compatible gateway).
    Groq,
    /// OpenRouter (OpenAI-compatible gateway).
    OpenRouter,
    /// Together (OpenAI-compatible gateway).
    Together,
    /// Local Ollama server.
    Ollama,
}

impl ProviderKind {
    /// Name of the environment variable holding this provider's credential.
    ///
    /// Returns `None` for providers that require no credential.
    #[must_use]
    pub fn credential_var(&self) -> Option<&'static str> {
        match self {
            Self::Mock | Self::Ollama => None,
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::Together => Some("TOGETHER_API_KEY"),
        }
    }

    /// Whether models of this provider run on the local machine.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Ollama | Self::Mock)
    }

    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::OpenRouter => "openrouter",
            Self::Together => "together",
            Self::Ollama => "ollama",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "openai" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            "groq" => Ok(Self::Groq),
            "openrouter" => Ok(Self::OpenRouter),
            "together" => Ok(Self::Together),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The provider to build a client for.
    pub kind: ProviderKind,
    /// The upstream model identifier.
    pub model_id: String,
    /// Optional API key (if not provided, loaded from the environment).
    pub api_key: Option<String>,
    /// Optional base URL override (used for local servers and tests).
    pub base_url: Option<String>,
}

impl ClientConfig {
    /// Creates a new `ClientConfig` with the given kind and model ID.
    #[must_use]
    pub fn new(kind: ProviderKind, model_id: String) -> Self {
        Self { kind, model_id, api_key: None, base_url: None }
    }

    /// Sets the API key for this configuration.
    #[must_use]
    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Sets the base URL for this configuration.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

/// Factory for creating provider client instances.
pub struct ClientFactory;

impl ClientFactory {
    /// Creates a provider client from the given configuration.
    ///
    /// # Arguments
    /// * `config` - The client configuration
    ///
    /// # Errors
    /// Returns a `ProviderError` if client creation fails (e.g., missing API key).
    pub fn create(config: ClientConfig) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        debug!(
            provider = %config.kind,
            model_id = %config.model_id,
            "Creating provider client"
        );

        match config.kind {
            ProviderKind::Mock => Ok(Arc::new(MockClient::new(config.model_id))),
            ProviderKind::OpenAi => {
                let mut client = if let Some(api_key) = config.api_key {
                    OpenAiClient::with_api_key(config.model_id, api_key)
                } else {
                    OpenAiClient::new(config.model_id)?
                };
                if let Some(base_url) = config.base_url {
                    client = client.with_base_url(base_url);
                }
                Ok(Arc::new(client))
            }
            ProviderKind::Gemini => {
                let mut client = if let Some(api_key) = config.api_key {
                    GeminiClient::with_api_key(config.model_id, api_key)
                } else {
                    GeminiClient::new(config.model_id)?
                };
                if let Some(base_url) = config.base_url {
                    client = client.with_base_url(base_url);
                }
                Ok(Arc::new(client))
            }
            ProviderKind::Groq | ProviderKind::OpenRouter | ProviderKind::Together => {
                let client = match config.api_key {
                    Some(api_key) => UniversalClient::new(
                        config.kind.as_str().to_string(),
                        config.model_id,
                        config
                            .base_url
                            .unwrap_or_else(|| Self::gateway_base_url(config.kind).to_string()),
                        Some(api_key),
                    ),
                    None => Self::gateway(config.kind, config.model_id)?,
                };
                Ok(Arc::new(client))
            }
            ProviderKind::Ollama => {
                let client = if let Some(base_url) = config.base_url {
                    OllamaClient::with_base_url(config.model_id, base_url)
                } else {
                    OllamaClient::new(config.model_id)
                };
                Ok(Arc::new(client))
            }
        }
    }

    fn gateway_base_url(kind: ProviderKind) -> &'static str {
        match kind {
            ProviderKind::Groq => "https://api.groq.com/openai/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderKind::Together => "https://api.together.xyz/v1",
            _ => unreachable!("only gateway kinds reach here"),
        }
    }

    fn gateway(kind: ProviderKind, model_id: String) -> Result<UniversalClient, ProviderError> {
        match kind {
            ProviderKind::Groq => UniversalClient::groq(model_id),
            ProviderKind::OpenRouter => UniversalClient::openrouter(model_id),
            ProviderKind::Together => UniversalClient::together(model_id),
            other => Err(ProviderError::Unsupported(format!(
                "{other} is not an OpenAI-compatible gateway"
            ))),
        }
    }

    /// Creates a provider client from a provider name string and model ID.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the provider name is unrecognized or
    /// creation fails.
    pub fn create_from_str(
        provider: &str,
        model_id: String,
    ) -> Result<Arc<dyn ProviderClient>, ProviderError> {
        let kind = ProviderKind::from_str(provider).map_err(|()| {
            error!(provider = %provider, "Unrecognized provider");
            ProviderError::Unsupported(format!("Unrecognized provider: {provider}"))
        })?;

        Self::create(ClientConfig::new(kind, model_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!(ProviderKind::from_str("mock"), Ok(ProviderKind::Mock));
        assert_eq!(ProviderKind::from_str("OpenAI"), Ok(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::from_str("GEMINI"), Ok(ProviderKind::Gemini));
        assert_eq!(ProviderKind::from_str("google"), Ok(ProviderKind::Gemini));
        assert_eq!(ProviderKind::from_str("groq"), Ok(ProviderKind::Groq));
        assert_eq!(ProviderKind::from_str("openrouter"), Ok(ProviderKind::OpenRouter));
        assert_eq!(ProviderKind::from_str("ollama"), Ok(ProviderKind::Ollama));
        assert_eq!(ProviderKind::from_str("unknown"), Err(()));
    }

    #[test]
    fn test_credential_vars() {
        assert_eq!(ProviderKind::OpenAi.credential_var(), Some("OPENAI_API_KEY"));
        assert_eq!(ProviderKind::Groq.credential_var(), Some("GROQ_API_KEY"));
        assert_eq!(ProviderKind::Ollama.credential_var(), None);
        assert_eq!(ProviderKind::Mock.credential_var(), None);
    }

    #[test]
    fn test_local_providers() {
        assert!(ProviderKind::Ollama.is_local());
        assert!(ProviderKind::Mock.is_local());
        assert!(!ProviderKind::OpenAi.is_local());
    }

    #[test]
    fn test_factory_create_mock() {
        let config = ClientConfig::new(ProviderKind::Mock, "test-mock".to_string());
        let client = ClientFactory::create(config).unwrap();
        assert_eq!(client.model_id(), "test-mock");
    }

    #[test]
    fn test_factory_create_from_str() {
        let client = ClientFactory::create_from_str("mock", "test-mock".to_string()).unwrap();
        assert_eq!(client.model_id(), "test-mock");
        assert_eq!(client.provider(), "mock");
    }

    #[test]
    fn test_factory_create_invalid_provider() {
        let result = ClientFactory::create_from_str("invalid", "test".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn test_factory_create_ollama_custom_url() {
        let config = ClientConfig::new(ProviderKind::Ollama, "llama2".to_string())
            .with_base_url("http://10.0.0.5:11434".to_string());
        let client = ClientFactory::create(config).unwrap();
        assert_eq!(client.provider(), "ollama");
    }
}
