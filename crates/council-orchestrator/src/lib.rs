//! Orchestration kernel for Council.
//!
//! A user request is analyzed, decomposed into atomic subtasks, routed to
//! the best available model per subtask, executed in parallel with circuit
//! breakers and fallback, arbitrated when responses compete, and
//! synthesized into one final response. Every stage streams ordered,
//! resumable progress messages; cost is estimated up front and accounted
//! afterwards; per-principal quotas gate submission.

pub mod analysis;
pub mod arbiter;
pub mod config;
pub mod cost;
pub mod decomposer;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod progress;
pub mod rate_limiter;
pub mod routing;
pub mod service;
pub mod synthesizer;
pub mod types;

pub use analysis::{Analysis, Analyzer};
pub use arbiter::{Arbiter, ArbitrationDecision, ArbitrationOutcome, Contradiction};
pub use config::{ConfigError, CouncilConfig, DeploymentMode};
pub use cost::{CostDiscrepancy, CostEngine, Direction, EstimateSet, ModeEstimate};
pub use decomposer::Decomposer;
pub use engine::Orchestrator;
pub use error::{OrchestrationError, Result};
pub use executor::{ExecutionOutcome, Executor};
pub use history::{HistoryFilter, HistoryPage, HistoryStore, RequestRecord};
pub use progress::{ProgressBus, ProgressKind, ProgressMessage, Subscription};
pub use rate_limiter::{RateLimiter, Role};
pub use routing::{
    BreakerSnapshot, BreakerState, BreakerTransition, CircuitBreaker, ModelRecord,
    ProviderRegistry, RegistryError, Router, RoutingError, Selection,
};
pub use service::{CouncilService, ResultView, StatusView, Submission};
pub use synthesizer::Synthesizer;
pub use types::{
    AgentResponse, Complexity, CostBreakdown, ExecutionMode, FinalResponse, ModelCost,
    ProviderSelectionEntry, Request, RequestStatus, RiskLevel, ScoreSnapshot, SelfAssessment,
    Subtask, SubtaskCost, SubtaskOutcome, SubtaskStatus, TaskType,
};
