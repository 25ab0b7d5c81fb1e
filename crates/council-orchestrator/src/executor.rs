//! Concurrent subtask execution with fallback and cancellation.
//!
//! Runs routed (subtask, model) pairs under the mode's parallelism cap and
//! per-call deadline. Typed provider failures feed the circuit breaker and
//! trigger one re-routed fallback attempt; partial failures never abort the
//! request as long as one subtask succeeds.

use crate::progress::{ProgressBus, ProgressKind};
use crate::routing::{CircuitBreaker, ProviderRegistry, Router};
use crate::types::{
    AgentResponse, ExecutionMode, ProviderSelectionEntry, RiskLevel, SelfAssessment, Subtask,
    SubtaskStatus,
};
use chrono::Utc;
use council_abstraction::{GenerationParams, ProviderError, ProviderResponse};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of executing all subtasks of one request.
pub struct ExecutionOutcome {
    /// Successful agent responses, possibly several per subtask when
    /// redundant dispatch was active.
    pub responses: Vec<AgentResponse>,
    /// Fallback selections made during execution, in completion order.
    pub selection_log: Vec<ProviderSelectionEntry>,
}

/// Per-subtask result passed back from the worker tasks.
struct SubtaskResult {
    index: usize,
    status: SubtaskStatus,
    responses: Vec<AgentResponse>,
    selections: Vec<ProviderSelectionEntry>,
    last_error: Option<String>,
}

enum AttemptFailure {
    BreakerOpen,
    Provider(ProviderError),
    Cancelled,
}

impl AttemptFailure {
    fn reason(&self) -> String {
        match self {
            Self::BreakerOpen => "circuit open".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::Provider(e) => match e {
                ProviderError::RateLimited { .. } => "rate limit".to_string(),
                ProviderError::Timeout { .. } => "timeout".to_string(),
                ProviderError::Transport(_) => "transport error".to_string(),
                ProviderError::Auth(_) => "authentication error".to_string(),
                ProviderError::Server { .. } => "server error".to_string(),
                ProviderError::InvalidResponse(_) => "invalid response".to_string(),
                ProviderError::Cancelled => "cancelled".to_string(),
                ProviderError::Unsupported(_) => "provider unavailable".to_string(),
            },
        }
    }

    fn allows_fallback(&self) -> bool {
        match self {
            Self::BreakerOpen => true,
            Self::Cancelled => false,
            Self::Provider(e) => e.is_retryable(),
        }
    }
}

/// Executes routed subtasks against provider clients.
pub struct Executor {
    registry: Arc<ProviderRegistry>,
    breaker: Arc<CircuitBreaker>,
    router: Arc<Router>,
    bus: Arc<ProgressBus>,
    /// Global worker budget shared across all in-flight requests.
    workers: Arc<Semaphore>,
    /// Minimum risk at which BestQuality dispatches redundantly.
    redundant_dispatch_min_risk: RiskLevel,
}

impl Executor {
    /// Creates an executor with the given global worker budget.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        breaker: Arc<CircuitBreaker>,
        router: Arc<Router>,
        bus: Arc<ProgressBus>,
        worker_budget: usize,
    ) -> Self {
        Self {
            registry,
            breaker,
            router,
            bus,
            workers: Arc::new(Semaphore::new(worker_budget.max(1))),
            redundant_dispatch_min_risk: RiskLevel::High,
        }
    }

    /// Overrides the redundant-dispatch risk floor.
    #[must_use]
    pub fn with_redundant_dispatch_min_risk(mut self, risk: RiskLevel) -> Self {
        self.redundant_dispatch_min_risk = risk;
        self
    }

    /// Runs all routed subtasks concurrently under the mode's parallelism
    /// cap, updating each subtask's status in place.
    ///
    /// Work is dispatched in descending priority order: the per-request
    /// permit is acquired before each spawn, so once the cap is reached
    /// the next free slot goes to the highest-priority subtask still
    /// waiting.
    ///
    /// Cancellation is cooperative: in-flight provider calls are abandoned
    /// at the next await point and their results discarded by the caller.
    pub async fn execute(
        &self,
        request_id: Uuid,
        mode: ExecutionMode,
        subtasks: &mut [Subtask],
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let semaphore = Arc::new(Semaphore::new(mode.parallelism()));
        let mut join_set: JoinSet<SubtaskResult> = JoinSet::new();

        for index in dispatch_order(subtasks) {
            let subtask = &subtasks[index];
            let Some(primary) = subtask.assigned_model.clone() else {
                // Routing already failed this subtask; nothing to run.
                continue;
            };

            let mode_permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = Worker {
                registry: Arc::clone(&self.registry),
                breaker: Arc::clone(&self.breaker),
                router: Arc::clone(&self.router),
                bus: Arc::clone(&self.bus),
                request_id,
                mode,
                subtask: subtask.clone(),
            };
            let workers = Arc::clone(&self.workers);
            let cancel = cancel.clone();
            let redundant = mode == ExecutionMode::BestQuality
                && subtask.risk >= self.redundant_dispatch_min_risk;

            join_set.spawn(async move {
                // The per-request permit rode in with the spawn; the global
                // worker budget bounds parallelism across requests.
                let _mode_permit = mode_permit;
                let _worker_permit = workers.acquire_owned().await;
                worker.run(index, primary, redundant, &cancel).await
            });
        }

        let mut responses = Vec::new();
        let mut selection_log = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok(result) = joined else {
                warn!(request_id = %request_id, "Subtask worker panicked");
                continue;
            };
            if let Some(subtask) = subtasks.get_mut(result.index) {
                subtask.status = result.status;
                if let Some(first) = result.responses.first() {
                    subtask.assigned_model = Some(first.model_id.clone());
                }
            }
            responses.extend(result.responses);
            selection_log.extend(result.selections);
            if let Some(error) = result.last_error {
                debug!(request_id = %request_id, error = %error, "Subtask exhausted its candidates");
            }
        }

        ExecutionOutcome { responses, selection_log }
    }
}

/// Subtask indices in dispatch order: priority descending, declaration
/// order between equals.
fn dispatch_order(subtasks: &[Subtask]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..subtasks.len()).collect();
    order.sort_by(|&a, &b| {
        subtasks[b].priority.cmp(&subtasks[a].priority).then(a.cmp(&b))
    });
    order
}

/// Owned per-subtask execution state moved into the worker task.
struct Worker {
    registry: Arc<ProviderRegistry>,
    breaker: Arc<CircuitBreaker>,
    router: Arc<Router>,
    bus: Arc<ProgressBus>,
    request_id: Uuid,
    mode: ExecutionMode,
    subtask: Subtask,
}

impl Worker {
    async fn run(
        &self,
        index: usize,
        primary: String,
        redundant: bool,
        cancel: &CancellationToken,
    ) -> SubtaskResult {
        let mut result = SubtaskResult {
            index,
            status: SubtaskStatus::Running,
            responses: Vec::new(),
            selections: Vec::new(),
            last_error: None,
        };

        if cancel.is_cancelled() {
            result.status = SubtaskStatus::Failed;
            result.last_error = Some("cancelled".to_string());
            return result;
        }

        // Primary attempt.
        match self.attempt(&primary, cancel).await {
            Ok(response) => {
                self.emit_completion(&response, false, None, None).await;
                result.responses.push(response);
                result.status = SubtaskStatus::Completed;
            }
            Err(failure) => {
                let reason = failure.reason();
                if !failure.allows_fallback() {
                    result.status = SubtaskStatus::Failed;
                    result.last_error = Some(reason);
                    return result;
                }

                // One re-routed fallback attempt with the primary excluded.
                match self.router.route(&self.subtask, self.mode, &[primary.clone()]) {
                    Ok(selection) => {
                        let fallback_id = selection.model_id.clone();
                        result.selections.push(ProviderSelectionEntry {
                            subtask_id: self.subtask.id,
                            model_id: fallback_id.clone(),
                            reason: format!("fallback after {reason}: {}", selection.reason),
                            alternatives: selection.alternatives.clone(),
                            snapshot: selection.snapshot.clone(),
                            fallback_from: Some(primary.clone()),
                        });

                        match self.attempt(&fallback_id, cancel).await {
                            Ok(response) => {
                                self.emit_completion(
                                    &response,
                                    true,
                                    Some(&primary),
                                    Some(&reason),
                                )
                                .await;
                                result.responses.push(response);
                                result.status = SubtaskStatus::Completed;
                            }
                            Err(second_failure) => {
                                let second_reason = second_failure.reason();
                                self.emit_failure(&fallback_id, true, Some(&primary), &second_reason)
                                    .await;
                                result.status = SubtaskStatus::Failed;
                                result.last_error = Some(second_reason);
                            }
                        }
                    }
                    Err(_) => {
                        self.emit_failure(&primary, false, None, &reason).await;
                        result.status = SubtaskStatus::Failed;
                        result.last_error = Some(format!("no fallback after {reason}"));
                    }
                }
            }
        }

        // Redundant dispatch for risky BestQuality subtasks: one extra
        // response from the next-best model, arbitrated later. Failures here
        // never affect the subtask status.
        if redundant && result.status == SubtaskStatus::Completed {
            let tried: Vec<String> =
                result.responses.iter().map(|r| r.model_id.clone()).collect();
            if let Ok(selection) = self.router.route(&self.subtask, self.mode, &tried) {
                if let Ok(response) = self.attempt(&selection.model_id, cancel).await {
                    result.selections.push(ProviderSelectionEntry {
                        subtask_id: self.subtask.id,
                        model_id: selection.model_id.clone(),
                        reason: format!("redundant dispatch: {}", selection.reason),
                        alternatives: selection.alternatives,
                        snapshot: selection.snapshot,
                        fallback_from: None,
                    });
                    result.responses.push(response);
                }
            }
        }

        result
    }

    /// One guarded provider call: breaker admission, deadline, outcome
    /// recording.
    async fn attempt(
        &self,
        model_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse, AttemptFailure> {
        let Ok(record) = self.registry.get(model_id) else {
            return Err(AttemptFailure::Provider(ProviderError::Unsupported(format!(
                "model {model_id} not in registry"
            ))));
        };
        let Some(client) = self.registry.client(model_id) else {
            return Err(AttemptFailure::Provider(ProviderError::Unsupported(format!(
                "no client loaded for {model_id}"
            ))));
        };
        let provider = record.provider.as_str();

        if !self.breaker.try_acquire(provider) {
            debug!(model_id = model_id, provider = provider, "Breaker open, skipping to fallback");
            return Err(AttemptFailure::BreakerOpen);
        }

        let deadline = self.mode.call_deadline();
        let params = GenerationParams::default();
        let started = Instant::now();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                // Cancellation is neither success nor failure; just return
                // the probe slot so it cannot leak.
                self.breaker.release_probe(provider);
                return Err(AttemptFailure::Cancelled);
            }
            outcome = tokio::time::timeout(deadline, client.generate(&self.subtask.content, Some(params))) => outcome,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Err(_) => {
                self.breaker.record_failure(provider);
                Err(AttemptFailure::Provider(ProviderError::Timeout { elapsed_ms }))
            }
            Ok(Err(error)) => {
                if matches!(error, ProviderError::Cancelled) {
                    self.breaker.release_probe(provider);
                    Err(AttemptFailure::Cancelled)
                } else {
                    self.breaker.record_failure(provider);
                    Err(AttemptFailure::Provider(error))
                }
            }
            Ok(Ok(provider_response)) => {
                self.breaker.record_success(provider);
                Ok(self.build_response(model_id, provider_response, elapsed_ms, record.reliability))
            }
        }
    }

    fn build_response(
        &self,
        model_id: &str,
        provider_response: ProviderResponse,
        elapsed_ms: u64,
        reliability: f64,
    ) -> AgentResponse {
        let text = provider_response.text;
        let confidence = extract_confidence(&text).unwrap_or(reliability).clamp(0.0, 1.0);
        let assessment = SelfAssessment {
            confidence,
            assumptions: extract_assumptions(&text),
            risk: extract_risk(&text).unwrap_or(self.subtask.risk),
            input_tokens: provider_response.usage.input_tokens,
            output_tokens: provider_response.usage.output_tokens,
            elapsed_ms,
        };
        AgentResponse {
            subtask_id: self.subtask.id,
            model_id: model_id.to_string(),
            text,
            assessment,
            timestamp: Utc::now(),
            success: true,
        }
    }

    async fn emit_completion(
        &self,
        response: &AgentResponse,
        used_fallback: bool,
        primary_model_failed: Option<&str>,
        reason: Option<&str>,
    ) {
        self.bus
            .publish(
                self.request_id,
                ProgressKind::ExecutionProgress,
                json!({
                    "subtask_id": self.subtask.id,
                    "status": "completed",
                    "model_id": response.model_id,
                    "used_fallback": used_fallback,
                    "primary_model_failed": primary_model_failed,
                    "fallback_model": used_fallback.then(|| response.model_id.clone()),
                    "reason": reason,
                    "elapsed_ms": response.assessment.elapsed_ms,
                    "input_tokens": response.assessment.input_tokens,
                    "output_tokens": response.assessment.output_tokens,
                }),
            )
            .await;
    }

    async fn emit_failure(
        &self,
        model_id: &str,
        used_fallback: bool,
        primary_model_failed: Option<&str>,
        reason: &str,
    ) {
        self.bus
            .publish(
                self.request_id,
                ProgressKind::ExecutionProgress,
                json!({
                    "subtask_id": self.subtask.id,
                    "status": "failed",
                    "model_id": model_id,
                    "used_fallback": used_fallback,
                    "primary_model_failed": primary_model_failed,
                    "reason": reason,
                }),
            )
            .await;
    }
}

/// Pulls a self-reported confidence ("Confidence: 0.87") out of a response.
fn extract_confidence(text: &str) -> Option<f64> {
    for line in text.lines() {
        let lower = line.trim().to_lowercase();
        if let Some(rest) = lower.strip_prefix("confidence:") {
            if let Ok(value) = rest.trim().trim_end_matches('%').parse::<f64>() {
                // Accept both 0.87 and 87%.
                return Some(if value > 1.0 { value / 100.0 } else { value });
            }
        }
    }
    None
}

/// Collects stated assumptions, in order of appearance.
fn extract_assumptions(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim().trim_start_matches(['-', '*', ' ']);
            let lower = trimmed.to_lowercase();
            lower
                .strip_prefix("assumption:")
                .or_else(|| lower.strip_prefix("assuming"))
                .map(|_| {
                    trimmed
                        .splitn(2, ':')
                        .nth(1)
                        .unwrap_or(trimmed)
                        .trim()
                        .to_string()
                })
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Pulls a self-reported risk level out of a response.
fn extract_risk(text: &str) -> Option<RiskLevel> {
    for line in text.lines() {
        let lower = line.trim().to_lowercase();
        if let Some(rest) = lower.strip_prefix("risk:") {
            return match rest.trim() {
                "low" => Some(RiskLevel::Low),
                "medium" => Some(RiskLevel::Medium),
                "high" => Some(RiskLevel::High),
                "critical" => Some(RiskLevel::Critical),
                _ => None,
            };
        }
    }
    None
}
