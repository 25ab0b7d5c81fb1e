//! Integration tests for provider failover and circuit breaking.
//!
//! Covers the fallback path on a rate-limited primary, breaker opening
//! after consecutive failures, fast-fail while open, and half-open
//! recovery.

mod common;

use common::two_provider_registry;
use council_orchestrator::{
    BreakerState, CircuitBreaker, CostEngine, CouncilConfig, ExecutionMode, Orchestrator,
    ProgressBus, ProgressKind, Request,
};
use council_abstraction::ProviderError;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn orchestrator_with_breaker(
    registry: Arc<council_orchestrator::ProviderRegistry>,
    bus: Arc<ProgressBus>,
    breaker: Arc<CircuitBreaker>,
) -> Orchestrator {
    let cost = Arc::new(CostEngine::new(Arc::clone(&registry)));
    Orchestrator::with_breaker(registry, bus, cost, CouncilConfig::default(), breaker)
}

fn trivial_request() -> Request {
    Request::new(
        "authenticated-user".to_string(),
        "Say hello in one word".to_string(),
        ExecutionMode::Fast,
    )
}

#[tokio::test]
async fn test_fallback_on_rate_limit() {
    common::init_tracing();
    let (registry, client_a, client_b) = two_provider_registry();
    client_a.push_failure(ProviderError::RateLimited {
        provider: "openai".to_string(),
        retry_after_secs: Some(30),
    });

    let bus = Arc::new(ProgressBus::new());
    let breaker = Arc::new(CircuitBreaker::new());
    let orchestrator =
        orchestrator_with_breaker(registry, Arc::clone(&bus), Arc::clone(&breaker));

    let mut request = trivial_request();
    let request_id = request.id;
    let mut subscription = bus.subscribe(request_id, 0).await;

    let final_response = orchestrator
        .process(&mut request, &CancellationToken::new())
        .await
        .expect("fallback should recover the request");

    // The cheap primary failed once; the fallback served the subtask.
    assert_eq!(client_a.call_count(), 1);
    assert_eq!(client_b.call_count(), 1);
    assert_eq!(final_response.provider_usage, vec![("gemini".to_string(), 1)]);
    assert_eq!(final_response.models_used, vec!["model-b".to_string()]);

    // One failure leaves the breaker closed.
    assert_eq!(breaker.state("openai"), BreakerState::Closed);
    assert_eq!(breaker.snapshot("openai").consecutive_failures, 1);

    // The execution event records the fallback and its reason.
    let mut found_fallback = false;
    while let Ok(message) = subscription.receiver.try_recv() {
        if message.kind == ProgressKind::ExecutionProgress {
            assert_eq!(message.payload["used_fallback"], true);
            assert_eq!(message.payload["primary_model_failed"], "model-a");
            assert_eq!(message.payload["fallback_model"], "model-b");
            assert_eq!(message.payload["reason"], "rate limit");
            found_fallback = true;
        }
    }
    assert!(found_fallback, "no fallback execution event seen");

    // The selection log retains the fallback with its prior assignment.
    let fallback_entry = final_response
        .selection_log
        .iter()
        .find(|entry| entry.fallback_from.is_some())
        .expect("fallback selection recorded");
    assert_eq!(fallback_entry.model_id, "model-b");
    assert_eq!(fallback_entry.fallback_from.as_deref(), Some("model-a"));
}

#[tokio::test]
async fn test_exhausted_fallbacks_fail_the_request() {
    let (registry, client_a, client_b) = two_provider_registry();
    client_a.push_failure(ProviderError::Server { status: 500, message: "boom".to_string() });
    client_b.push_failure(ProviderError::Server { status: 500, message: "boom".to_string() });

    let bus = Arc::new(ProgressBus::new());
    let breaker = Arc::new(CircuitBreaker::new());
    let orchestrator =
        orchestrator_with_breaker(registry, Arc::clone(&bus), Arc::clone(&breaker));

    let mut request = trivial_request();
    let error = orchestrator
        .process(&mut request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(error.code(), "orchestration_failed");
    assert_eq!(request.status, council_orchestrator::RequestStatus::Failed);
}

#[tokio::test]
async fn test_breaker_opens_after_five_consecutive_failures() {
    let (registry, client_a, client_b) = two_provider_registry();
    // Five requests in a row hit a failing primary and recover via the
    // fallback provider.
    for _ in 0..5 {
        client_a.push_failure(ProviderError::Server {
            status: 503,
            message: "overloaded".to_string(),
        });
    }

    let bus = Arc::new(ProgressBus::new());
    let breaker = Arc::new(CircuitBreaker::with_settings(
        5,
        Duration::from_millis(200),
        Duration::from_millis(800),
    ));
    let orchestrator =
        orchestrator_with_breaker(registry, Arc::clone(&bus), Arc::clone(&breaker));

    for i in 0..5 {
        let mut request = trivial_request();
        orchestrator
            .process(&mut request, &CancellationToken::new())
            .await
            .unwrap_or_else(|e| panic!("request {i} should recover via fallback: {e}"));
    }

    assert_eq!(breaker.state("openai"), BreakerState::Open);
    let calls_while_closed = client_a.call_count();
    assert_eq!(calls_while_closed, 5);

    // While open, routing skips the provider at candidate-set construction:
    // the next request goes straight to the fallback provider with no
    // network call against the broken one.
    let calls_b_before = client_b.call_count();
    let mut request = trivial_request();
    let final_response = orchestrator
        .process(&mut request, &CancellationToken::new())
        .await
        .expect("healthy provider still serves requests");
    assert_eq!(client_a.call_count(), calls_while_closed);
    assert_eq!(client_b.call_count(), calls_b_before + 1);
    let primary = &final_response.selection_log[0];
    assert_eq!(primary.model_id, "model-b");
    assert!(primary.fallback_from.is_none());

    // After the cooldown one probe is admitted; its success closes the
    // circuit with a reset counter.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let mut request = trivial_request();
    let final_response = orchestrator
        .process(&mut request, &CancellationToken::new())
        .await
        .expect("probe should succeed");
    assert_eq!(final_response.models_used, vec!["model-a".to_string()]);
    assert_eq!(breaker.state("openai"), BreakerState::Closed);
    assert_eq!(breaker.snapshot("openai").consecutive_failures, 0);
    assert_eq!(client_a.call_count(), calls_while_closed + 1);
}

#[tokio::test]
async fn test_timeout_is_a_typed_failure_through_the_fallback_path() {
    use async_trait::async_trait;
    use common::{record, ScriptedClient};
    use council_abstraction::{
        GenerationParams, HealthStatus, ProviderClient, ProviderResponse,
    };
    use council_models::ProviderKind;
    use council_orchestrator::ProviderRegistry;
    use std::collections::HashMap;

    // A provider that never answers within the FAST deadline.
    struct HangingClient {
        inner: ScriptedClient,
    }

    #[async_trait]
    impl ProviderClient for HangingClient {
        async fn generate(
            &self,
            _prompt: &str,
            _params: Option<GenerationParams>,
        ) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("the deadline always fires first")
        }
        async fn health_check(&self) -> HealthStatus {
            HealthStatus::Healthy
        }
        fn provider(&self) -> &str {
            self.inner.provider()
        }
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }
    }

    let records = vec![
        record("model-hang", ProviderKind::OpenAi, 1e-6, 500, 0.95),
        record("model-ok", ProviderKind::Gemini, 5e-6, 500, 0.95),
    ];
    let ok_client = Arc::new(ScriptedClient::new("gemini", "model-ok"));
    let mut clients: HashMap<String, Arc<dyn ProviderClient>> = HashMap::new();
    clients.insert(
        "model-hang".to_string(),
        Arc::new(HangingClient { inner: ScriptedClient::new("openai", "model-hang") }),
    );
    clients.insert("model-ok".to_string(), ok_client.clone());
    let registry = Arc::new(ProviderRegistry::with_models(records, clients));

    let bus = Arc::new(ProgressBus::new());
    let breaker = Arc::new(CircuitBreaker::new());
    let orchestrator =
        orchestrator_with_breaker(registry, Arc::clone(&bus), Arc::clone(&breaker));

    // tokio::time::pause makes the 15s deadline elapse instantly.
    tokio::time::pause();
    let mut request = trivial_request();
    let final_response = orchestrator
        .process(&mut request, &CancellationToken::new())
        .await
        .expect("timeout falls back to the healthy provider");
    tokio::time::resume();

    assert_eq!(final_response.models_used, vec!["model-ok".to_string()]);
    assert_eq!(breaker.snapshot("openai").consecutive_failures, 1);
    let fallback_entry = final_response
        .selection_log
        .iter()
        .find(|entry| entry.fallback_from.is_some())
        .expect("fallback selection recorded");
    assert!(fallback_entry.reason.contains("timeout"));
}
