//! Core data model for the orchestration kernel.
//!
//! Requests, subtasks, responses, and the final synthesized answer. The
//! orchestrator owns all mutation of request and subtask state; everything
//! handed outward is immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// User-selectable execution preset.
///
/// Controls decomposition depth, parallelism, per-call deadlines, and the
/// model-mix preference used for cost estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Cheapest and fastest: shallow decomposition, tight deadlines.
    Fast,
    /// Default tradeoff.
    Balanced,
    /// Deepest decomposition, redundant dispatch for risky subtasks.
    BestQuality,
}

impl ExecutionMode {
    /// Maximum number of subtasks the decomposer may produce.
    #[must_use]
    pub const fn max_subtasks(&self) -> usize {
        match self {
            Self::Fast => 2,
            Self::Balanced => 4,
            Self::BestQuality => 6,
        }
    }

    /// Minimum number of subtasks for a decomposed (COMPOUND/COMPLEX) request.
    #[must_use]
    pub const fn min_subtasks(&self) -> usize {
        match self {
            Self::Fast => 1,
            Self::Balanced => 3,
            Self::BestQuality => 4,
        }
    }

    /// Per-request parallelism cap for the executor.
    #[must_use]
    pub const fn parallelism(&self) -> usize {
        match self {
            Self::Fast => 2,
            Self::Balanced => 3,
            Self::BestQuality => 5,
        }
    }

    /// Deadline applied to each provider call.
    #[must_use]
    pub const fn call_deadline(&self) -> Duration {
        match self {
            Self::Fast => Duration::from_secs(15),
            Self::Balanced => Duration::from_secs(30),
            Self::BestQuality => Duration::from_secs(60),
        }
    }

    /// All modes in ascending cost order.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Fast, Self::Balanced, Self::BestQuality]
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Balanced => write!(f, "balanced"),
            Self::BestQuality => write!(f, "best_quality"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "best_quality" | "best-quality" | "best" => Ok(Self::BestQuality),
            _ => Err(()),
        }
    }
}

/// Classification of a subtask's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Multi-step reasoning and analysis.
    Reasoning,
    /// Information gathering and summarization.
    Research,
    /// Producing source code.
    CodeGeneration,
    /// Diagnosing and fixing defects.
    Debugging,
    /// Open-ended creative output.
    Creative,
    /// Verifying factual claims.
    FactCheck,
    /// Verifying produced artifacts against requirements.
    Verification,
}

impl TaskType {
    /// Deterministic rank used to break ties when several types match a span.
    ///
    /// Lower rank wins.
    #[must_use]
    pub const fn tie_break_rank(&self) -> u8 {
        match self {
            Self::CodeGeneration => 0,
            Self::Debugging => 1,
            Self::Reasoning => 2,
            Self::Research => 3,
            Self::FactCheck => 4,
            Self::Verification => 5,
            Self::Creative => 6,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reasoning => "reasoning",
            Self::Research => "research",
            Self::CodeGeneration => "code_generation",
            Self::Debugging => "debugging",
            Self::Creative => "creative",
            Self::FactCheck => "fact_check",
            Self::Verification => "verification",
        };
        f.write_str(s)
    }
}

/// Risk attached to a subtask, driving redundant dispatch in BestQuality mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Routine work.
    #[default]
    Low,
    /// Mistakes are visible but recoverable.
    Medium,
    /// Mistakes materially damage the answer.
    High,
    /// Mistakes invalidate the whole response.
    Critical,
}

impl std::str::FromStr for RiskLevel {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

/// Complexity label produced by analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// Single-fact or single-phrase answer.
    Trivial,
    /// One coherent question, no decomposition value.
    Simple,
    /// Several separable parts.
    Compound,
    /// Deep multi-part work.
    Complex,
}

impl Complexity {
    /// Whether analysis at this level bypasses decomposition.
    #[must_use]
    pub fn bypasses_decomposition(&self) -> bool {
        matches!(self, Self::Trivial | Self::Simple)
    }
}

/// Lifecycle of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Accepted, not yet picked up.
    Pending,
    /// Pipeline in flight.
    Running,
    /// Final response produced.
    Succeeded,
    /// Terminal failure.
    Failed,
    /// Cancelled externally.
    Cancelled,
}

impl RequestStatus {
    /// Whether the status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Lifecycle of a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// Created by the decomposer.
    Pending,
    /// Bound to a model.
    Assigned,
    /// Provider call in flight.
    Running,
    /// At least one successful response recorded.
    Completed,
    /// All candidates exhausted.
    Failed,
}

/// A user request moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique request id.
    pub id: Uuid,
    /// The submitting principal.
    pub principal: String,
    /// Raw prompt as submitted (1..=5000 chars).
    pub prompt: String,
    /// Selected execution mode.
    pub mode: ExecutionMode,
    /// Current lifecycle status.
    pub status: RequestStatus,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Completion time, set when the status turns terminal.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Request {
    /// Creates a new pending request.
    #[must_use]
    pub fn new(principal: String, prompt: String, mode: ExecutionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal,
            prompt,
            mode,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Marks the request terminal with the given status.
    pub fn finish(&mut self, status: RequestStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// An atomic unit of work derived from a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique subtask id.
    pub id: Uuid,
    /// Parent request id.
    pub request_id: Uuid,
    /// The prompt sent to the assigned model.
    pub content: String,
    /// Classification used for routing.
    pub task_type: TaskType,
    /// Execution priority (higher runs earlier when queued).
    pub priority: u32,
    /// Risk attached by the decomposer.
    pub risk: RiskLevel,
    /// Required accuracy in [0, 1].
    pub accuracy_requirement: f64,
    /// Currently assigned model, if any.
    pub assigned_model: Option<String>,
    /// Current lifecycle status.
    pub status: SubtaskStatus,
    /// Pre-execution cost estimate in USD.
    pub estimated_cost: f64,
}

impl Subtask {
    /// Creates a new pending subtask under the given request.
    #[must_use]
    pub fn new(request_id: Uuid, content: String, task_type: TaskType) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            content,
            task_type,
            priority: 0,
            risk: RiskLevel::default(),
            accuracy_requirement: 0.8,
            assigned_model: None,
            status: SubtaskStatus::Pending,
            estimated_cost: 0.0,
        }
    }

    /// Sets the risk level.
    #[must_use]
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Structured metadata accompanying every model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfAssessment {
    /// Model confidence in [0, 1].
    pub confidence: f64,
    /// Assumptions the model stated, in order of appearance.
    pub assumptions: Vec<String>,
    /// Risk level, inherited from the subtask unless the response states one.
    pub risk: RiskLevel,
    /// Tokens consumed by the prompt.
    pub input_tokens: u32,
    /// Tokens produced in the completion.
    pub output_tokens: u32,
    /// Wall-clock time of the provider call in milliseconds.
    pub elapsed_ms: u64,
}

/// A single model's answer to a subtask. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// The subtask this answers.
    pub subtask_id: Uuid,
    /// The model that produced the answer.
    pub model_id: String,
    /// Response text.
    pub text: String,
    /// Self-reported metadata.
    pub assessment: SelfAssessment,
    /// Production time.
    pub timestamp: DateTime<Utc>,
    /// Whether the call succeeded.
    pub success: bool,
}

/// Cost attributed to one subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskCost {
    /// Subtask id.
    pub subtask_id: Uuid,
    /// Model that served the subtask.
    pub model_id: String,
    /// Cost in USD.
    pub cost: f64,
    /// Prompt tokens.
    pub input_tokens: u32,
    /// Completion tokens.
    pub output_tokens: u32,
}

/// Cost attributed to one model across a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCost {
    /// Model id.
    pub model_id: String,
    /// Provider owning the model.
    pub provider: String,
    /// Cost in USD.
    pub cost: f64,
    /// Number of successful calls.
    pub calls: u32,
}

/// Explicit cost record attached to a final response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Total cost in USD; equals the sum over `by_subtask`.
    pub total_cost: f64,
    /// Per-subtask attribution.
    pub by_subtask: Vec<SubtaskCost>,
    /// Per-model attribution.
    pub by_model: Vec<ModelCost>,
    /// Total prompt tokens.
    pub total_input_tokens: u64,
    /// Total completion tokens.
    pub total_output_tokens: u64,
}

/// Snapshot of the router's view of a model at selection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    /// Combined per-token unit cost (input + output).
    pub unit_cost: f64,
    /// Typical latency in milliseconds.
    pub latency_ms: u64,
    /// Reliability in [0, 1].
    pub reliability: f64,
    /// Final routing score.
    pub score: f64,
}

/// One routing decision, appended to the request's selection log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSelectionEntry {
    /// The subtask being routed.
    pub subtask_id: Uuid,
    /// The selected model.
    pub model_id: String,
    /// Why this model won.
    pub reason: String,
    /// Up to three runner-up model ids, best first.
    pub alternatives: Vec<String>,
    /// Router view of the winner at selection time.
    pub snapshot: ScoreSnapshot,
    /// The previously assigned model when this entry records a fallback.
    pub fallback_from: Option<String>,
}

/// Terminal outcome of a subtask, reported inside the final response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskOutcome {
    /// Subtask id.
    pub subtask_id: Uuid,
    /// Terminal status.
    pub status: SubtaskStatus,
    /// Stable error code for failed subtasks.
    pub error_code: Option<String>,
}

/// The synthesized answer returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResponse {
    /// Synthesized response body.
    pub text: String,
    /// Confidence weighted by content length over contributing responses.
    pub overall_confidence: f64,
    /// Full cost attribution.
    pub cost: CostBreakdown,
    /// Distinct model ids that contributed, in first-use order.
    pub models_used: Vec<String>,
    /// Successful calls per provider.
    pub provider_usage: Vec<(String, u32)>,
    /// Every routing decision made for the request.
    pub selection_log: Vec<ProviderSelectionEntry>,
    /// Terminal status of each subtask.
    pub subtask_outcomes: Vec<SubtaskOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_ordering_matches_cost_ordering() {
        assert!(ExecutionMode::Fast < ExecutionMode::Balanced);
        assert!(ExecutionMode::Balanced < ExecutionMode::BestQuality);
    }

    #[test]
    fn test_mode_presets() {
        assert_eq!(ExecutionMode::Fast.max_subtasks(), 2);
        assert_eq!(ExecutionMode::Balanced.parallelism(), 3);
        assert_eq!(ExecutionMode::BestQuality.call_deadline(), Duration::from_secs(60));
    }

    #[test]
    fn test_mode_from_str() {
        use std::str::FromStr;
        assert_eq!(ExecutionMode::from_str("fast"), Ok(ExecutionMode::Fast));
        assert_eq!(ExecutionMode::from_str("BEST_QUALITY"), Ok(ExecutionMode::BestQuality));
        assert_eq!(ExecutionMode::from_str("turbo"), Err(()));
    }

    #[test]
    fn test_task_type_tie_break_order() {
        let mut types = vec![
            TaskType::Creative,
            TaskType::Verification,
            TaskType::Reasoning,
            TaskType::CodeGeneration,
        ];
        types.sort_by_key(TaskType::tie_break_rank);
        assert_eq!(types[0], TaskType::CodeGeneration);
        assert_eq!(types.last(), Some(&TaskType::Creative));
    }

    #[test]
    fn test_complexity_bypass() {
        assert!(Complexity::Trivial.bypasses_decomposition());
        assert!(Complexity::Simple.bypasses_decomposition());
        assert!(!Complexity::Compound.bypasses_decomposition());
        assert!(!Complexity::Complex.bypasses_decomposition());
    }

    #[test]
    fn test_request_finish_sets_completed_at() {
        let mut request =
            Request::new("alice".to_string(), "hello".to_string(), ExecutionMode::Fast);
        assert!(request.completed_at.is_none());
        request.finish(RequestStatus::Succeeded);
        assert!(request.completed_at.is_some());
        assert!(request.status.is_terminal());
    }

    #[test]
    fn test_subtask_defaults() {
        let request_id = Uuid::new_v4();
        let subtask = Subtask::new(request_id, "part".to_string(), TaskType::Research);
        assert_eq!(subtask.request_id, request_id);
        assert_eq!(subtask.status, SubtaskStatus::Pending);
        assert!(subtask.assigned_model.is_none());
        assert!((subtask.accuracy_requirement - 0.8).abs() < f64::EPSILON);
    }
}
