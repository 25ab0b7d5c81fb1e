//! Model router: scores candidate models per subtask and selects the best.

use super::circuit_breaker::CircuitBreaker;
use super::registry::{ModelRecord, ProviderRegistry};
use crate::types::{ExecutionMode, ScoreSnapshot, Subtask, TaskType};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Errors from routing decisions.
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    /// No model supports the task type, or every supporting model is
    /// excluded or circuit-broken.
    #[error("No routable model for subtask {subtask_id} ({task_type})")]
    NoRoute {
        /// The subtask that could not be routed.
        subtask_id: Uuid,
        /// Its task type.
        task_type: TaskType,
    },
}

/// Scoring weights for candidate ranking.
const WEIGHT_AVAILABILITY: f64 = 0.40;
const WEIGHT_COST: f64 = 0.25;
const WEIGHT_LATENCY: f64 = 0.15;
const WEIGHT_CAPABILITY: f64 = 0.10;
const WEIGHT_RELIABILITY: f64 = 0.10;

/// Reliability boost applied in BestQuality mode.
const BEST_QUALITY_RELIABILITY_BOOST: f64 = 1.5;

/// A candidate model with its computed routing score.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// Catalog model id.
    pub model_id: String,
    /// Final weighted score.
    pub score: f64,
    /// Combined per-token unit cost.
    pub unit_cost: f64,
    /// Typical latency in milliseconds.
    pub latency_ms: u64,
    /// Reliability in [0, 1].
    pub reliability: f64,
}

/// The router's choice for one subtask.
#[derive(Debug, Clone)]
pub struct Selection {
    /// The winning model.
    pub model_id: String,
    /// Human-readable reason for the choice.
    pub reason: String,
    /// Up to three runner-up model ids, best first.
    pub alternatives: Vec<String>,
    /// Router view of the winner at selection time.
    pub snapshot: ScoreSnapshot,
}

/// Scores candidates and selects models for subtasks.
///
/// The candidate set for a subtask is every registry model that supports
/// its task type, is not explicitly excluded, and whose provider breaker is
/// not OPEN. Score normalizations are taken over the candidate set so the
/// scale is stable per invocation.
pub struct Router {
    registry: Arc<ProviderRegistry>,
    breaker: Arc<CircuitBreaker>,
}

impl Router {
    /// Creates a new router over the given registry and breaker.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { registry, breaker }
    }

    /// Selects the best model for a subtask.
    ///
    /// # Arguments
    /// * `subtask` - The subtask to route
    /// * `mode` - Execution mode (applies latency cap / reliability boost)
    /// * `exclude` - Model ids already tried (fallback re-scoring)
    ///
    /// # Errors
    /// Returns `RoutingError::NoRoute` when the candidate set is empty.
    pub fn route(
        &self,
        subtask: &Subtask,
        mode: ExecutionMode,
        exclude: &[String],
    ) -> Result<Selection, RoutingError> {
        let candidates = self.candidates(subtask.task_type, exclude, mode);
        if candidates.is_empty() {
            return Err(RoutingError::NoRoute {
                subtask_id: subtask.id,
                task_type: subtask.task_type,
            });
        }

        let mut scored = Self::score(&candidates, mode);
        scored.sort_by(|a, b| Self::rank(a, b));

        let winner = scored[0].clone();
        let alternatives: Vec<String> =
            scored.iter().skip(1).take(3).map(|c| c.model_id.clone()).collect();

        debug!(
            subtask_id = %subtask.id,
            task_type = %subtask.task_type,
            model_id = %winner.model_id,
            score = winner.score,
            candidates = scored.len(),
            "Routing decision made"
        );

        let reason = format!(
            "highest score {:.1} among {} candidate(s) for {} (unit cost {:.2e}, latency {}ms, reliability {:.2})",
            winner.score,
            scored.len(),
            subtask.task_type,
            winner.unit_cost,
            winner.latency_ms,
            winner.reliability,
        );

        Ok(Selection {
            model_id: winner.model_id.clone(),
            reason,
            alternatives,
            snapshot: ScoreSnapshot {
                unit_cost: winner.unit_cost,
                latency_ms: winner.latency_ms,
                reliability: winner.reliability,
                score: winner.score,
            },
        })
    }

    /// Builds the candidate set for a task type.
    fn candidates(
        &self,
        task_type: TaskType,
        exclude: &[String],
        mode: ExecutionMode,
    ) -> Vec<ModelRecord> {
        let mut candidates: Vec<ModelRecord> = self
            .registry
            .by_task_type(task_type)
            .into_iter()
            .filter(|r| !exclude.contains(&r.id))
            .filter(|r| !self.breaker.is_open(r.provider.as_str()))
            .cloned()
            .collect();

        // FAST drops candidates slower than the 50th percentile latency.
        if mode == ExecutionMode::Fast && candidates.len() > 1 {
            let mut latencies: Vec<u64> =
                candidates.iter().map(|r| r.typical_latency_ms).collect();
            latencies.sort_unstable();
            let p50 = latencies[(latencies.len() - 1) / 2];
            candidates.retain(|r| r.typical_latency_ms <= p50);
        }

        candidates
    }

    /// Scores a candidate set, normalizing cost and latency over the set.
    fn score(candidates: &[ModelRecord], mode: ExecutionMode) -> Vec<ScoredCandidate> {
        let costs: Vec<f64> = candidates.iter().map(ModelRecord::unit_cost).collect();
        let latencies: Vec<f64> =
            candidates.iter().map(|r| r.typical_latency_ms as f64).collect();
        let max_capabilities =
            candidates.iter().map(|r| r.capabilities.len()).max().unwrap_or(1) as f64;

        let (cost_min, cost_max) = min_max(&costs);
        let (lat_min, lat_max) = min_max(&latencies);

        candidates
            .iter()
            .map(|record| {
                let unit_cost = record.unit_cost();
                let availability = 100.0;
                let cost_score = 100.0 * (1.0 - normalize(unit_cost, cost_min, cost_max));
                let latency_score = 100.0
                    * (1.0 - normalize(record.typical_latency_ms as f64, lat_min, lat_max));
                let capability_score =
                    100.0 * record.capabilities.len() as f64 / max_capabilities;
                let mut reliability_score = 100.0 * record.reliability;
                if mode == ExecutionMode::BestQuality {
                    reliability_score *= BEST_QUALITY_RELIABILITY_BOOST;
                }

                let score = WEIGHT_AVAILABILITY * availability
                    + WEIGHT_COST * cost_score
                    + WEIGHT_LATENCY * latency_score
                    + WEIGHT_CAPABILITY * capability_score
                    + WEIGHT_RELIABILITY * reliability_score;

                ScoredCandidate {
                    model_id: record.id.clone(),
                    score,
                    unit_cost,
                    latency_ms: record.typical_latency_ms,
                    reliability: record.reliability,
                }
            })
            .collect()
    }

    /// Deterministic ranking: score desc, then cost asc, latency asc, id asc.
    fn rank(a: &ScoredCandidate, b: &ScoredCandidate) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        if (a.score - b.score).abs() > 1e-9 {
            return b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal);
        }
        match a.unit_cost.partial_cmp(&b.unit_cost).unwrap_or(Ordering::Equal) {
            Ordering::Equal => match a.latency_ms.cmp(&b.latency_ms) {
                Ordering::Equal => a.model_id.cmp(&b.model_id),
                other => other,
            },
            other => other,
        }
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max > min {
        (value - min) / (max - min)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_abstraction::ProviderClient;
    use council_models::{MockClient, ProviderKind};
    use std::collections::HashMap;

    fn record(id: &str, caps: Vec<TaskType>, cost: f64, latency: u64, rel: f64) -> ModelRecord {
        ModelRecord {
            id: id.to_string(),
            provider: ProviderKind::Mock,
            model_name: id.to_string(),
            capabilities: caps,
            unit_price_input: cost / 2.0,
            unit_price_output: cost / 2.0,
            typical_latency_ms: latency,
            reliability: rel,
            max_context: 8_192,
        }
    }

    fn registry_with(records: Vec<ModelRecord>) -> Arc<ProviderRegistry> {
        let mut clients: HashMap<String, std::sync::Arc<dyn ProviderClient>> = HashMap::new();
        for r in &records {
            clients.insert(r.id.clone(), std::sync::Arc::new(MockClient::new(r.id.clone())));
        }
        Arc::new(ProviderRegistry::with_models(records, clients))
    }

    fn subtask(task_type: TaskType) -> Subtask {
        Subtask::new(Uuid::new_v4(), "work".to_string(), task_type)
    }

    #[test]
    fn test_cheaper_model_wins_all_else_equal() {
        let registry = registry_with(vec![
            record("model-a", vec![TaskType::Reasoning], 2e-6, 500, 0.95),
            record("model-b", vec![TaskType::Reasoning], 10e-6, 500, 0.95),
        ]);
        let router = Router::new(registry, Arc::new(CircuitBreaker::new()));

        let selection = router
            .route(&subtask(TaskType::Reasoning), ExecutionMode::Balanced, &[])
            .unwrap();
        assert_eq!(selection.model_id, "model-a");
        assert_eq!(selection.alternatives, vec!["model-b".to_string()]);
    }

    #[test]
    fn test_no_route_for_unsupported_task_type() {
        let registry =
            registry_with(vec![record("model-a", vec![TaskType::Reasoning], 1e-6, 500, 0.95)]);
        let router = Router::new(registry, Arc::new(CircuitBreaker::new()));

        let result = router.route(&subtask(TaskType::Debugging), ExecutionMode::Balanced, &[]);
        assert!(matches!(result, Err(RoutingError::NoRoute { .. })));
    }

    #[test]
    fn test_excluded_model_is_skipped() {
        let registry = registry_with(vec![
            record("model-a", vec![TaskType::Reasoning], 1e-6, 500, 0.95),
            record("model-b", vec![TaskType::Reasoning], 5e-6, 800, 0.9),
        ]);
        let router = Router::new(registry, Arc::new(CircuitBreaker::new()));

        let selection = router
            .route(&subtask(TaskType::Reasoning), ExecutionMode::Balanced, &["model-a".to_string()])
            .unwrap();
        assert_eq!(selection.model_id, "model-b");
    }

    #[test]
    fn test_open_breaker_removes_candidates() {
        let registry = registry_with(vec![
            record("model-a", vec![TaskType::Reasoning], 1e-6, 500, 0.95),
        ]);
        let breaker = Arc::new(CircuitBreaker::with_settings(
            1,
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(300),
        ));
        breaker.record_failure("mock");
        let router = Router::new(registry, breaker);

        let result = router.route(&subtask(TaskType::Reasoning), ExecutionMode::Balanced, &[]);
        assert!(matches!(result, Err(RoutingError::NoRoute { .. })));
    }

    #[test]
    fn test_fast_mode_drops_slow_candidates() {
        let registry = registry_with(vec![
            record("slow", vec![TaskType::Reasoning], 1e-7, 4_000, 0.99),
            record("quick", vec![TaskType::Reasoning], 5e-6, 300, 0.9),
        ]);
        let router = Router::new(registry, Arc::new(CircuitBreaker::new()));

        // Despite being pricier and less reliable, the quick model is the
        // only one under the p50 latency cap.
        let selection =
            router.route(&subtask(TaskType::Reasoning), ExecutionMode::Fast, &[]).unwrap();
        assert_eq!(selection.model_id, "quick");
    }

    #[test]
    fn test_best_quality_boosts_reliability() {
        // The reliable model is slightly pricier within a wide cost spread;
        // the reliability boost should flip the decision relative to
        // balanced mode.
        let registry = registry_with(vec![
            record("cheap", vec![TaskType::Reasoning], 1e-6, 1_000, 0.70),
            record("reliable", vec![TaskType::Reasoning], 2.26e-6, 1_000, 0.99),
            record("anchor", vec![TaskType::Reasoning], 10e-6, 1_000, 0.50),
        ]);
        let router = Router::new(registry.clone(), Arc::new(CircuitBreaker::new()));

        let balanced = router
            .route(&subtask(TaskType::Reasoning), ExecutionMode::Balanced, &[])
            .unwrap();
        assert_eq!(balanced.model_id, "cheap");

        let best = router
            .route(&subtask(TaskType::Reasoning), ExecutionMode::BestQuality, &[])
            .unwrap();
        assert_eq!(best.model_id, "reliable");
    }

    #[test]
    fn test_tie_breaks_are_deterministic() {
        let registry = registry_with(vec![
            record("model-b", vec![TaskType::Reasoning], 1e-6, 500, 0.9),
            record("model-a", vec![TaskType::Reasoning], 1e-6, 500, 0.9),
        ]);
        let router = Router::new(registry, Arc::new(CircuitBreaker::new()));

        let selection = router
            .route(&subtask(TaskType::Reasoning), ExecutionMode::Balanced, &[])
            .unwrap();
        // Identical scores, cost, and latency: lexicographic id decides.
        assert_eq!(selection.model_id, "model-a");
    }

    #[test]
    fn test_selection_snapshot_matches_winner() {
        let registry = registry_with(vec![
            record("model-a", vec![TaskType::Reasoning], 2e-6, 700, 0.93),
        ]);
        let router = Router::new(registry, Arc::new(CircuitBreaker::new()));

        let selection = router
            .route(&subtask(TaskType::Reasoning), ExecutionMode::Balanced, &[])
            .unwrap();
        assert_eq!(selection.snapshot.latency_ms, 700);
        assert!((selection.snapshot.reliability - 0.93).abs() < 1e-12);
        assert!((selection.snapshot.unit_cost - 2e-6).abs() < 1e-18);
        assert!(selection.snapshot.score > 0.0);
    }
}
