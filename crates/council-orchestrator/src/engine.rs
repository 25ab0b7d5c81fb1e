//! The orchestration pipeline: analysis → decomposition → routing →
//! execution → arbitration → synthesis.
//!
//! The orchestrator exclusively owns Request and Subtask mutation for the
//! lifetime of a request. Every stage publishes its event on the progress
//! bus in a fixed order; an `error` event may terminate any stage.

use crate::analysis::Analyzer;
use crate::arbiter::{Arbiter, ArbitrationDecision};
use crate::config::CouncilConfig;
use crate::cost::CostEngine;
use crate::decomposer::Decomposer;
use crate::error::OrchestrationError;
use crate::executor::Executor;
use crate::progress::{ProgressBus, ProgressKind};
use crate::routing::{CircuitBreaker, ProviderRegistry, Router};
use crate::synthesizer::Synthesizer;
use crate::types::{
    AgentResponse, FinalResponse, ProviderSelectionEntry, Request, RequestStatus, RiskLevel,
    SubtaskStatus,
};
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Maximum accepted prompt length in characters.
const MAX_PROMPT_CHARS: usize = 5000;

/// The request pipeline over shared kernel components.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    breaker: Arc<CircuitBreaker>,
    router: Arc<Router>,
    executor: Executor,
    arbiter: Arbiter,
    synthesizer: Synthesizer,
    cost: Arc<CostEngine>,
    bus: Arc<ProgressBus>,
    analyzer: Analyzer,
    decomposer: Decomposer,
    config: CouncilConfig,
}

impl Orchestrator {
    /// Wires the pipeline over explicitly constructed components.
    ///
    /// The registry, bus, and cost engine are shared with the service
    /// facade; breaker, router, executor, arbiter, and synthesizer are
    /// internal to the pipeline.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        bus: Arc<ProgressBus>,
        cost: Arc<CostEngine>,
        config: CouncilConfig,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new());
        Self::with_breaker(registry, bus, cost, config, breaker)
    }

    /// Wires the pipeline with an injected circuit breaker (tests shrink
    /// its timings).
    #[must_use]
    pub fn with_breaker(
        registry: Arc<ProviderRegistry>,
        bus: Arc<ProgressBus>,
        cost: Arc<CostEngine>,
        config: CouncilConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let router = Arc::new(Router::new(Arc::clone(&registry), Arc::clone(&breaker)));
        let min_risk = RiskLevel::from_str(&config.execution.redundant_dispatch_min_risk)
            .unwrap_or(RiskLevel::High);
        let executor = Executor::new(
            Arc::clone(&registry),
            Arc::clone(&breaker),
            Arc::clone(&router),
            Arc::clone(&bus),
            config.execution.worker_budget,
        )
        .with_redundant_dispatch_min_risk(min_risk);
        let arbiter = Arbiter::new(Arc::clone(&registry));
        let synthesizer = Synthesizer::new(Arc::clone(&registry));

        Self {
            registry,
            breaker,
            router,
            executor,
            arbiter,
            synthesizer,
            cost,
            bus,
            analyzer: Analyzer::new(),
            decomposer: Decomposer::new(),
            config,
        }
    }

    /// The shared circuit breaker (observability).
    #[must_use]
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Runs the full pipeline for one request.
    ///
    /// The request is mutated in place: status transitions, completion
    /// timestamp. Subtask-level provider failures are recovered via
    /// fallback; the call fails only on invalid input, an empty registry,
    /// total subtask failure, or cancellation.
    ///
    /// # Errors
    /// Returns an `OrchestrationError` describing the terminal failure.
    pub async fn process(
        &self,
        request: &mut Request,
        cancel: &CancellationToken,
    ) -> Result<FinalResponse, OrchestrationError> {
        match self.run_pipeline(request, cancel).await {
            Ok(final_response) => {
                request.finish(RequestStatus::Succeeded);
                Ok(final_response)
            }
            Err(OrchestrationError::Cancelled) => {
                request.finish(RequestStatus::Cancelled);
                self.bus
                    .publish(request.id, ProgressKind::Cancelled, json!({ "request_id": request.id }))
                    .await;
                Err(OrchestrationError::Cancelled)
            }
            Err(error) => {
                request.finish(RequestStatus::Failed);
                self.bus
                    .publish(
                        request.id,
                        ProgressKind::Error,
                        json!({ "code": error.code(), "message": error.user_message() }),
                    )
                    .await;
                Err(error)
            }
        }
    }

    async fn run_pipeline(
        &self,
        request: &mut Request,
        cancel: &CancellationToken,
    ) -> Result<FinalResponse, OrchestrationError> {
        let prompt_chars = request.prompt.chars().count();
        if prompt_chars == 0 || prompt_chars > MAX_PROMPT_CHARS {
            return Err(OrchestrationError::InvalidInput(format!(
                "prompt length {prompt_chars} outside 1..={MAX_PROMPT_CHARS}"
            )));
        }
        if self.registry.is_empty() {
            return Err(OrchestrationError::NoProviders);
        }

        request.status = RequestStatus::Running;
        let request_id = request.id;
        let mode = request.mode;
        info!(request_id = %request_id, mode = %mode, "Processing request");

        // Analysis.
        self.bus
            .publish(request_id, ProgressKind::AnalysisStarted, json!({ "mode": mode }))
            .await;
        let analysis = self.analyzer.analyze(&request.prompt);
        self.bus
            .publish(
                request_id,
                ProgressKind::AnalysisComplete,
                serde_json::to_value(&analysis).unwrap_or_else(|_| json!({})),
            )
            .await;
        self.check_cancel(cancel)?;

        // Decomposition.
        let mut subtasks = self.decomposer.decompose(request, &analysis);
        self.bus
            .publish(
                request_id,
                ProgressKind::DecompositionComplete,
                json!({
                    "subtasks": subtasks.iter().map(|s| json!({
                        "id": s.id,
                        "content": s.content,
                        "task_type": s.task_type,
                        "risk": s.risk,
                        "accuracy_requirement": s.accuracy_requirement,
                    })).collect::<Vec<_>>(),
                }),
            )
            .await;

        // Routing.
        let mut selection_log: Vec<ProviderSelectionEntry> = Vec::new();
        let mut routable = 0usize;
        for subtask in &mut subtasks {
            match self.router.route(subtask, mode, &[]) {
                Ok(selection) => {
                    subtask.assigned_model = Some(selection.model_id.clone());
                    subtask.status = SubtaskStatus::Assigned;
                    if let Ok(record) = self.registry.get(&selection.model_id) {
                        let tokens = subtask.content.len() as f64 * 0.25;
                        subtask.estimated_cost = tokens * record.unit_price_input
                            + tokens * record.unit_price_output;
                    }
                    selection_log.push(ProviderSelectionEntry {
                        subtask_id: subtask.id,
                        model_id: selection.model_id,
                        reason: selection.reason,
                        alternatives: selection.alternatives,
                        snapshot: selection.snapshot,
                        fallback_from: None,
                    });
                    routable += 1;
                }
                Err(routing_error) => {
                    warn!(
                        request_id = %request_id,
                        subtask_id = %subtask.id,
                        error = %routing_error,
                        "Subtask has no route"
                    );
                    subtask.status = SubtaskStatus::Failed;
                }
            }
        }
        if routable == 0 {
            return Err(OrchestrationError::OrchestrationFailed(
                "no subtask could be routed to any model".to_string(),
            ));
        }
        self.bus
            .publish(
                request_id,
                ProgressKind::RoutingComplete,
                json!({
                    "assignments": subtasks.iter().filter_map(|s| {
                        s.assigned_model.as_ref().map(|m| json!({
                            "subtask_id": s.id,
                            "model_id": m,
                        }))
                    }).collect::<Vec<_>>(),
                }),
            )
            .await;
        self.check_cancel(cancel)?;

        // Execution.
        let outcome = self.executor.execute(request_id, mode, &mut subtasks, cancel).await;
        self.check_cancel(cancel)?;
        selection_log.extend(outcome.selection_log);

        // Arbitration.
        let (kept, decisions) = if self.config.execution.enable_arbitration {
            self.arbitrate(request_id, outcome.responses).await
        } else {
            (outcome.responses, Vec::new())
        };

        if kept.iter().filter(|r| r.success).count() == 0 {
            return Err(OrchestrationError::OrchestrationFailed(
                "all subtasks failed non-recoverably".to_string(),
            ));
        }

        // Synthesis.
        self.bus.publish(request_id, ProgressKind::SynthesisStarted, json!({})).await;
        let cost_breakdown = self.cost.actual_cost(&kept);
        let estimated = self.cost.estimate(request.prompt.chars().count(), mode);
        self.cost.check_discrepancy(request_id, mode, estimated.cost, cost_breakdown.total_cost);
        if cost_breakdown.total_cost > self.config.cost.max_cost_per_request {
            // Advisory cap only; the request still completes.
            warn!(
                request_id = %request_id,
                total_cost = cost_breakdown.total_cost,
                cap = self.config.cost.max_cost_per_request,
                "Request exceeded the advisory cost cap"
            );
        }

        let final_response =
            self.synthesizer.synthesize(&subtasks, &kept, &decisions, cost_breakdown, selection_log);
        self.bus
            .publish(
                request_id,
                ProgressKind::FinalResponse,
                json!({
                    "overall_confidence": final_response.overall_confidence,
                    "total_cost": final_response.cost.total_cost,
                    "models_used": final_response.models_used,
                    "text_chars": final_response.text.chars().count(),
                }),
            )
            .await;

        info!(
            request_id = %request_id,
            total_cost = final_response.cost.total_cost,
            confidence = final_response.overall_confidence,
            "Request completed"
        );
        Ok(final_response)
    }

    /// Runs per-subtask arbitration plus cross-subtask contradiction
    /// detection, publishing one event per decision.
    async fn arbitrate(
        &self,
        request_id: Uuid,
        responses: Vec<AgentResponse>,
    ) -> (Vec<AgentResponse>, Vec<ArbitrationDecision>) {
        let mut grouped: HashMap<Uuid, Vec<AgentResponse>> = HashMap::new();
        let mut order: Vec<Uuid> = Vec::new();
        for response in responses {
            if !grouped.contains_key(&response.subtask_id) {
                order.push(response.subtask_id);
            }
            grouped.entry(response.subtask_id).or_default().push(response);
        }

        let mut kept = Vec::new();
        let mut decisions = Vec::new();
        for subtask_id in order {
            let group = grouped.remove(&subtask_id).unwrap_or_default();
            let (group_kept, decision) = self.arbiter.arbitrate(subtask_id, group);
            if let Some(decision) = decision {
                self.bus
                    .publish(
                        request_id,
                        ProgressKind::ArbitrationDecision,
                        serde_json::to_value(&decision).unwrap_or_else(|_| json!({})),
                    )
                    .await;
                decisions.push(decision);
            }
            kept.extend(group_kept);
        }

        for contradiction in self.arbiter.detect_contradictions(&kept) {
            self.bus
                .publish(
                    request_id,
                    ProgressKind::ArbitrationDecision,
                    json!({
                        "kind": "contradiction",
                        "claim": contradiction.claim,
                        "asserting_subtask": contradiction.asserting_subtask,
                        "negating_subtask": contradiction.negating_subtask,
                    }),
                )
                .await;
        }

        (kept, decisions)
    }

    fn check_cancel(&self, cancel: &CancellationToken) -> Result<(), OrchestrationError> {
        if cancel.is_cancelled() {
            Err(OrchestrationError::Cancelled)
        } else {
            Ok(())
        }
    }
}
