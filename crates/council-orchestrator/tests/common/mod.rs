//! Shared test fixtures: scripted provider clients and registries.
#![allow(dead_code)] // not every test binary uses every fixture

use async_trait::async_trait;
use council_abstraction::{
    GenerationParams, HealthStatus, ProviderClient, ProviderError, ProviderResponse, TokenUsage,
};
use council_models::ProviderKind;
use council_orchestrator::routing::{ModelRecord, ProviderRegistry};
use council_orchestrator::types::TaskType;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// A provider client driven by a queue of scripted outcomes.
///
/// Calls pop the front of the script; an empty script succeeds with a
/// default response.
pub struct ScriptedClient {
    provider: String,
    model_id: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: AtomicU32,
}

impl ScriptedClient {
    pub fn new(provider: &str, model_id: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn push_success(&self, text: &str) {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn push_failure(&self, error: ProviderError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedClient {
    async fn generate(
        &self,
        prompt: &str,
        _params: Option<GenerationParams>,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(text)) => Ok(ProviderResponse {
                text,
                model_id: self.model_id.clone(),
                usage: TokenUsage::new(
                    (prompt.len() as u32).div_ceil(4),
                    12,
                ),
            }),
            Some(Err(error)) => Err(error),
            None => Ok(ProviderResponse {
                text: format!("Scripted response from {}", self.model_id),
                model_id: self.model_id.clone(),
                usage: TokenUsage::new((prompt.len() as u32).div_ceil(4), 12),
            }),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Installs a test tracing subscriber once, honoring `RUST_LOG`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// All task types, for models that should never fail capability filtering.
pub fn all_task_types() -> Vec<TaskType> {
    vec![
        TaskType::Reasoning,
        TaskType::Research,
        TaskType::CodeGeneration,
        TaskType::Debugging,
        TaskType::Creative,
        TaskType::FactCheck,
        TaskType::Verification,
    ]
}

pub fn record(
    id: &str,
    provider: ProviderKind,
    unit_price: f64,
    latency_ms: u64,
    reliability: f64,
) -> ModelRecord {
    ModelRecord {
        id: id.to_string(),
        provider,
        model_name: id.to_string(),
        capabilities: all_task_types(),
        unit_price_input: unit_price,
        unit_price_output: unit_price,
        typical_latency_ms: latency_ms,
        reliability,
        max_context: 16_384,
    }
}

/// Two-provider registry: "model-a" (openai, cheap) and "model-b"
/// (gemini, five times the price), both scripted.
pub fn two_provider_registry(
) -> (Arc<ProviderRegistry>, Arc<ScriptedClient>, Arc<ScriptedClient>) {
    let client_a = Arc::new(ScriptedClient::new("openai", "model-a"));
    let client_b = Arc::new(ScriptedClient::new("gemini", "model-b"));

    let records = vec![
        record("model-a", ProviderKind::OpenAi, 1e-6, 500, 0.95),
        record("model-b", ProviderKind::Gemini, 5e-6, 500, 0.95),
    ];
    let mut clients: HashMap<String, Arc<dyn ProviderClient>> = HashMap::new();
    clients.insert("model-a".to_string(), client_a.clone());
    clients.insert("model-b".to_string(), client_b.clone());

    (Arc::new(ProviderRegistry::with_models(records, clients)), client_a, client_b)
}
