//! The kernel's external interface: submit, status, result, progress,
//! cancel, history, estimate.
//!
//! Transport layers (HTTP, WebSocket) sit on top of this facade; nothing
//! here is protocol-specific.

use crate::config::CouncilConfig;
use crate::cost::{CostEngine, EstimateSet};
use crate::engine::Orchestrator;
use crate::error::OrchestrationError;
use crate::history::{HistoryFilter, HistoryPage, HistoryStore};
use crate::progress::{ProgressBus, Subscription};
use crate::rate_limiter::{RateLimiter, Role};
use crate::routing::ProviderRegistry;
use crate::types::{ExecutionMode, FinalResponse, Request, RequestStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// A submission from a caller.
#[derive(Debug, Clone)]
pub struct Submission {
    /// The submitting principal.
    pub principal: String,
    /// The principal's role, selecting its quota.
    pub role: Role,
    /// The raw prompt.
    pub prompt: String,
    /// Selected execution mode.
    pub mode: ExecutionMode,
}

/// Status view of one request.
#[derive(Debug, Clone)]
pub struct StatusView {
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Completion time, for terminal requests.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result view of one request.
#[derive(Debug, Clone)]
pub enum ResultView {
    /// The pipeline is still running.
    InProgress(RequestStatus),
    /// The final response.
    Completed(Box<FinalResponse>),
    /// Terminal failure with a stable code and one user-facing sentence.
    Failed {
        /// Stable error code.
        code: String,
        /// User-facing message.
        message: String,
    },
}

/// The orchestration kernel's service facade.
///
/// All components are explicitly constructed at startup and shared through
/// the facade; tests inject alternates through `with_components`.
pub struct CouncilService {
    orchestrator: Arc<Orchestrator>,
    limiter: Arc<RateLimiter>,
    bus: Arc<ProgressBus>,
    cost: Arc<CostEngine>,
    history: Arc<HistoryStore>,
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CouncilService {
    /// Builds the service over a loaded registry and configuration.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, config: CouncilConfig) -> Self {
        let bus = Arc::new(ProgressBus::new());
        let cost = Arc::new(CostEngine::with_settings(
            Arc::clone(&registry),
            std::time::Duration::from_secs(config.cost.estimate_cache_ttl_secs),
            config.cost.discrepancy_tolerance,
        ));
        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            registry,
            Arc::clone(&bus),
            Arc::clone(&cost),
            config,
        ));
        Self::with_components(orchestrator, limiter, bus, cost, Arc::new(HistoryStore::new()))
    }

    /// Wires the service from explicit components.
    #[must_use]
    pub fn with_components(
        orchestrator: Arc<Orchestrator>,
        limiter: Arc<RateLimiter>,
        bus: Arc<ProgressBus>,
        cost: Arc<CostEngine>,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            orchestrator,
            limiter,
            bus,
            cost,
            history,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Accepts a submission, starts the pipeline in the background, and
    /// returns the request id.
    ///
    /// # Errors
    /// Returns `InvalidInput` before the quota is touched, and
    /// `RateLimited` with retry metadata when the caller's window is
    /// exhausted.
    pub async fn submit(&self, submission: Submission) -> Result<Uuid, OrchestrationError> {
        let prompt_chars = submission.prompt.chars().count();
        if prompt_chars == 0 || prompt_chars > 5000 {
            return Err(OrchestrationError::InvalidInput(format!(
                "prompt length {prompt_chars} outside 1..=5000"
            )));
        }

        self.limiter.check(&submission.principal, submission.role).await?;

        let request = Request::new(submission.principal, submission.prompt, submission.mode);
        let request_id = request.id;
        self.history.upsert(request.clone()).await;

        let cancel = CancellationToken::new();
        {
            let mut running = self.running.lock().await;
            running.insert(request_id, cancel.clone());
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let history = Arc::clone(&self.history);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let mut request = request;
            request.status = RequestStatus::Running;
            history.upsert(request.clone()).await;

            match orchestrator.process(&mut request, &cancel).await {
                Ok(final_response) => {
                    history.complete(request, final_response).await;
                }
                Err(error) => {
                    history
                        .fail(request, error.code().to_string(), error.user_message())
                        .await;
                }
            }

            let mut running = running.lock().await;
            running.remove(&request_id);
        });

        info!(request_id = %request_id, "Request accepted");
        Ok(request_id)
    }

    /// Status of one request.
    ///
    /// # Errors
    /// Returns `UnknownRequest` for ids never submitted here.
    pub async fn status(&self, request_id: Uuid) -> Result<StatusView, OrchestrationError> {
        let record = self
            .history
            .get(request_id)
            .await
            .ok_or(OrchestrationError::UnknownRequest(request_id))?;
        Ok(StatusView {
            status: record.request.status,
            created_at: record.request.created_at,
            completed_at: record.request.completed_at,
        })
    }

    /// Result of one request.
    ///
    /// # Errors
    /// Returns `UnknownRequest` for ids never submitted here.
    pub async fn result(&self, request_id: Uuid) -> Result<ResultView, OrchestrationError> {
        let record = self
            .history
            .get(request_id)
            .await
            .ok_or(OrchestrationError::UnknownRequest(request_id))?;
        if let Some(final_response) = record.result {
            return Ok(ResultView::Completed(Box::new(final_response)));
        }
        if let Some((code, message)) = record.error {
            return Ok(ResultView::Failed { code, message });
        }
        Ok(ResultView::InProgress(record.request.status))
    }

    /// Cancels a running request.
    ///
    /// Returns `true` when an in-flight pipeline was signalled; terminal or
    /// unknown requests return `false`.
    pub async fn cancel(&self, request_id: Uuid) -> bool {
        let running = self.running.lock().await;
        if let Some(token) = running.get(&request_id) {
            debug!(request_id = %request_id, "Cancellation requested");
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Subscribes to a request's progress stream.
    pub async fn progress(&self, request_id: Uuid, since_seq: u64) -> Subscription {
        self.bus.subscribe(request_id, since_seq).await
    }

    /// Acknowledges progress messages up to `seq`.
    pub async fn acknowledge(&self, request_id: Uuid, seq: u64) {
        self.bus.acknowledge(request_id, seq).await;
    }

    /// Records a heartbeat response from a live subscription.
    pub async fn heartbeat_response(&self, request_id: Uuid, subscription_id: u64) {
        self.bus.heartbeat_response(request_id, subscription_id).await;
    }

    /// Pages through a principal's request history.
    pub async fn history(
        &self,
        principal: &str,
        page: usize,
        page_size: usize,
        filter: &HistoryFilter,
    ) -> HistoryPage {
        self.history.history(principal, page, page_size, filter).await
    }

    /// Cost and time estimates for all modes at a given prompt length.
    #[must_use]
    pub fn estimate(&self, prompt_len: usize) -> EstimateSet {
        self.cost.estimate_all(prompt_len)
    }

    /// Starts the progress bus maintenance loop (heartbeats, idle
    /// eviction, TTL pruning). Call once after the runtime is up.
    pub fn start_maintenance(&self) -> tokio::task::JoinHandle<()> {
        self.bus.start_maintenance()
    }
}
