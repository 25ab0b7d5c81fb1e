//! Static model catalog and runtime availability filtering.

use crate::config::DeploymentMode;
use crate::types::TaskType;
use council_abstraction::{HealthStatus, ProviderClient, TokenUsage};
use council_models::{ClientConfig, ClientFactory, ProviderKind};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The model id is not in the catalog.
    #[error("Model not found: {0}")]
    NotFound(String),
}

/// One catalog entry. Immutable after registry load.
#[derive(Debug, Clone)]
pub struct ModelRecord {
    /// Catalog id (e.g., "groq-llama3-70b").
    pub id: String,
    /// Owning provider.
    pub provider: ProviderKind,
    /// Upstream model name passed to the provider API.
    pub model_name: String,
    /// Task types this model is trusted with.
    pub capabilities: Vec<TaskType>,
    /// Cost per input token in USD.
    pub unit_price_input: f64,
    /// Cost per output token in USD.
    pub unit_price_output: f64,
    /// Typical end-to-end latency in milliseconds.
    pub typical_latency_ms: u64,
    /// Observed reliability in [0, 1].
    pub reliability: f64,
    /// Maximum context window in tokens.
    pub max_context: u32,
}

impl ModelRecord {
    /// Combined per-token unit cost used for routing comparisons.
    #[must_use]
    pub fn unit_cost(&self) -> f64 {
        self.unit_price_input + self.unit_price_output
    }

    /// Cost of a single run with the given token usage.
    #[must_use]
    pub fn run_cost(&self, usage: &TokenUsage) -> f64 {
        f64::from(usage.input_tokens) * self.unit_price_input
            + f64::from(usage.output_tokens) * self.unit_price_output
    }

    /// Whether the model supports the given task type.
    #[must_use]
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.capabilities.contains(&task_type)
    }
}

/// Catalog of models plus one client per loaded model.
///
/// Loaded once at startup and shared read-only afterwards.
pub struct ProviderRegistry {
    records: Vec<ModelRecord>,
    clients: HashMap<String, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    /// Builds a registry from explicit records and clients (tests and
    /// embedders inject mock clients through here).
    #[must_use]
    pub fn with_models(
        records: Vec<ModelRecord>,
        clients: HashMap<String, Arc<dyn ProviderClient>>,
    ) -> Self {
        Self { records, clients }
    }

    /// Loads the subset of the default catalog that is usable right now.
    ///
    /// A catalog entry is loaded when its provider credential resolves, the
    /// deployment mode admits it, and the startup health probe does not
    /// report the provider as down. Providers without credentials are
    /// skipped silently; a failed probe is logged.
    pub async fn load_available(deployment: DeploymentMode) -> Self {
        let mut records = Vec::new();
        let mut clients: HashMap<String, Arc<dyn ProviderClient>> = HashMap::new();
        let mut probed: HashMap<ProviderKind, HealthStatus> = HashMap::new();

        for record in Self::default_catalog() {
            if !deployment.admits(record.provider.is_local()) {
                continue;
            }
            if let Some(var) = record.provider.credential_var() {
                if std::env::var(var).is_err() {
                    debug!(model_id = %record.id, credential = var, "Skipping model, credential not set");
                    continue;
                }
            }

            let config = ClientConfig::new(record.provider, record.model_name.clone());
            let client = match ClientFactory::create(config) {
                Ok(client) => client,
                Err(e) => {
                    warn!(model_id = %record.id, error = %e, "Failed to build provider client");
                    continue;
                }
            };

            // One probe per provider, not per model.
            let health = match probed.get(&record.provider) {
                Some(health) => *health,
                None => {
                    let health = client.health_check().await;
                    probed.insert(record.provider, health);
                    health
                }
            };
            if !health.is_usable() {
                warn!(provider = %record.provider, "Provider down at startup, skipping its models");
                continue;
            }

            clients.insert(record.id.clone(), client);
            records.push(record);
        }

        info!(model_count = records.len(), "Provider registry loaded");
        Self { records, clients }
    }

    /// All models supporting the given task type.
    #[must_use]
    pub fn by_task_type(&self, task_type: TaskType) -> Vec<&ModelRecord> {
        self.records.iter().filter(|r| r.supports(task_type)).collect()
    }

    /// Looks up a model by catalog id.
    ///
    /// # Errors
    /// Returns `RegistryError::NotFound` for unknown ids.
    pub fn get(&self, model_id: &str) -> Result<&ModelRecord, RegistryError> {
        self.records
            .iter()
            .find(|r| r.id == model_id)
            .ok_or_else(|| RegistryError::NotFound(model_id.to_string()))
    }

    /// Returns the client bound to a loaded model.
    #[must_use]
    pub fn client(&self, model_id: &str) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(model_id).cloned()
    }

    /// All loaded records.
    #[must_use]
    pub fn models(&self) -> &[ModelRecord] {
        &self.records
    }

    /// Whether no model is available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of loaded models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Probes every loaded provider once and reports per-provider health.
    pub async fn check_all(&self) -> HashMap<String, HealthStatus> {
        let mut seen: HashMap<String, HealthStatus> = HashMap::new();
        for record in &self.records {
            let provider = record.provider.as_str().to_string();
            if seen.contains_key(&provider) {
                continue;
            }
            if let Some(client) = self.client(&record.id) {
                seen.insert(provider, client.health_check().await);
            }
        }
        seen
    }

    /// The built-in model catalog.
    ///
    /// Prices are per token; latencies are typical end-to-end figures for
    /// short prompts.
    #[must_use]
    pub fn default_catalog() -> Vec<ModelRecord> {
        use TaskType::*;
        vec![
            ModelRecord {
                id: "groq-llama3-70b".to_string(),
                provider: ProviderKind::Groq,
                model_name: "llama3-70b-8192".to_string(),
                capabilities: vec![Reasoning, Research, CodeGeneration],
                unit_price_input: 0.000_000_59,
                unit_price_output: 0.000_000_79,
                typical_latency_ms: 500,
                reliability: 0.95,
                max_context: 8_192,
            },
            ModelRecord {
                id: "groq-mixtral-8x7b".to_string(),
                provider: ProviderKind::Groq,
                model_name: "mixtral-8x7b-32768".to_string(),
                capabilities: vec![Reasoning, Creative],
                unit_price_input: 0.000_000_27,
                unit_price_output: 0.000_000_27,
                typical_latency_ms: 400,
                reliability: 0.93,
                max_context: 32_768,
            },
            ModelRecord {
                id: "together-mixtral-8x7b".to_string(),
                provider: ProviderKind::Together,
                model_name: "mistralai/Mixtral-8x7B-Instruct-v0.1".to_string(),
                capabilities: vec![Reasoning, CodeGeneration],
                unit_price_input: 0.000_000_6,
                unit_price_output: 0.000_000_6,
                typical_latency_ms: 1_200,
                reliability: 0.92,
                max_context: 32_768,
            },
            ModelRecord {
                id: "openrouter-gpt-3.5-turbo".to_string(),
                provider: ProviderKind::OpenRouter,
                model_name: "openai/gpt-3.5-turbo".to_string(),
                capabilities: vec![Reasoning, Research, CodeGeneration, Creative],
                unit_price_input: 0.000_000_5,
                unit_price_output: 0.000_001_5,
                typical_latency_ms: 1_500,
                reliability: 0.94,
                max_context: 16_385,
            },
            ModelRecord {
                id: "openrouter-claude-3-sonnet".to_string(),
                provider: ProviderKind::OpenRouter,
                model_name: "anthropic/claude-3-sonnet".to_string(),
                capabilities: vec![Reasoning, Research, CodeGeneration, FactCheck, Verification],
                unit_price_input: 0.000_003,
                unit_price_output: 0.000_015,
                typical_latency_ms: 2_000,
                reliability: 0.98,
                max_context: 200_000,
            },
            ModelRecord {
                id: "openrouter-gpt4-turbo".to_string(),
                provider: ProviderKind::OpenRouter,
                model_name: "openai/gpt-4-turbo".to_string(),
                capabilities: vec![Reasoning, CodeGeneration, Debugging, Verification],
                unit_price_input: 0.000_01,
                unit_price_output: 0.000_03,
                typical_latency_ms: 3_000,
                reliability: 0.97,
                max_context: 128_000,
            },
            ModelRecord {
                id: "gemini-pro".to_string(),
                provider: ProviderKind::Gemini,
                model_name: "gemini-pro".to_string(),
                capabilities: vec![Reasoning, Research, Creative, FactCheck],
                unit_price_input: 0.0,
                unit_price_output: 0.0,
                typical_latency_ms: 2_000,
                reliability: 0.92,
                max_context: 32_768,
            },
            ModelRecord {
                id: "openai-gpt-3.5-turbo".to_string(),
                provider: ProviderKind::OpenAi,
                model_name: "gpt-3.5-turbo".to_string(),
                capabilities: vec![Reasoning, Research, CodeGeneration, Creative],
                unit_price_input: 0.000_000_5,
                unit_price_output: 0.000_001_5,
                typical_latency_ms: 1_000,
                reliability: 0.94,
                max_context: 16_385,
            },
            ModelRecord {
                id: "openai-gpt-4".to_string(),
                provider: ProviderKind::OpenAi,
                model_name: "gpt-4".to_string(),
                capabilities: vec![
                    Reasoning,
                    Research,
                    CodeGeneration,
                    Creative,
                    FactCheck,
                    Debugging,
                    Verification,
                ],
                unit_price_input: 0.000_03,
                unit_price_output: 0.000_06,
                typical_latency_ms: 3_000,
                reliability: 0.98,
                max_context: 8_192,
            },
            ModelRecord {
                id: "ollama-llama2-7b".to_string(),
                provider: ProviderKind::Ollama,
                model_name: "llama2".to_string(),
                capabilities: vec![Reasoning, Research, Creative],
                unit_price_input: 0.0,
                unit_price_output: 0.0,
                typical_latency_ms: 3_000,
                reliability: 0.85,
                max_context: 4_096,
            },
            ModelRecord {
                id: "ollama-mistral-7b".to_string(),
                provider: ProviderKind::Ollama,
                model_name: "mistral".to_string(),
                capabilities: vec![Reasoning, CodeGeneration],
                unit_price_input: 0.0,
                unit_price_output: 0.0,
                typical_latency_ms: 2_500,
                reliability: 0.87,
                max_context: 8_192,
            },
            ModelRecord {
                id: "ollama-codellama-7b".to_string(),
                provider: ProviderKind::Ollama,
                model_name: "codellama".to_string(),
                capabilities: vec![CodeGeneration, Debugging],
                unit_price_input: 0.0,
                unit_price_output: 0.0,
                typical_latency_ms: 3_500,
                reliability: 0.83,
                max_context: 4_096,
            },
        ]
    }
}
