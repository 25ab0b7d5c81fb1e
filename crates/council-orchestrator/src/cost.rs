//! Cost model: ex-ante estimation and ex-post accounting.
//!
//! Estimates are derived from request length and the mode's expected model
//! mix (cheapest-first for FAST, average for BALANCED, premium for
//! BEST_QUALITY), cached briefly per (length bucket, mode). Actual cost is
//! summed from token usage at registry unit prices; a large gap between the
//! two produces a discrepancy report that is logged and never user-visible.

use crate::routing::ProviderRegistry;
use crate::types::{AgentResponse, CostBreakdown, ExecutionMode, ModelCost, SubtaskCost};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Guard against division by a zero estimate.
const EPSILON: f64 = 1e-9;

/// Token-estimation multipliers per mode (input, output).
fn multipliers(mode: ExecutionMode) -> (f64, f64) {
    match mode {
        ExecutionMode::Fast => (1.5, 1.5),
        ExecutionMode::Balanced => (3.0, 2.0),
        ExecutionMode::BestQuality => (5.0, 3.0),
    }
}

/// Cost and duration estimate for one mode.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModeEstimate {
    /// Estimated cost in USD.
    pub cost: f64,
    /// Estimated wall-clock time in seconds.
    pub time_secs: f64,
}

/// Estimates for all three modes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EstimateSet {
    /// FAST estimate.
    pub fast: ModeEstimate,
    /// BALANCED estimate.
    pub balanced: ModeEstimate,
    /// BEST_QUALITY estimate.
    pub best_quality: ModeEstimate,
}

/// Direction of an estimate/actual gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Actual cost exceeded the estimate.
    Over,
    /// Actual cost undershot the estimate.
    Under,
}

/// A reported estimate/actual discrepancy.
#[derive(Debug, Clone, Serialize)]
pub struct CostDiscrepancy {
    /// The request concerned.
    pub request_id: Uuid,
    /// Its execution mode.
    pub mode: ExecutionMode,
    /// The ex-ante estimate in USD.
    pub estimated: f64,
    /// The ex-post actual in USD.
    pub actual: f64,
    /// |actual − estimated| / max(estimated, ε).
    pub ratio: f64,
    /// Which way the estimate missed.
    pub direction: Direction,
}

/// Pre-execution estimator and post-execution cost accountant.
pub struct CostEngine {
    registry: Arc<ProviderRegistry>,
    cache: Mutex<HashMap<(usize, ExecutionMode), (ModeEstimate, Instant)>>,
    cache_ttl: Duration,
    discrepancy_tolerance: f64,
}

impl CostEngine {
    /// Creates an engine with a 1-hour estimate cache and 0.5 tolerance.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self::with_settings(registry, Duration::from_secs(3600), 0.5)
    }

    /// Creates an engine with custom cache TTL and discrepancy tolerance.
    #[must_use]
    pub fn with_settings(
        registry: Arc<ProviderRegistry>,
        cache_ttl: Duration,
        discrepancy_tolerance: f64,
    ) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
            cache_ttl: cache_ttl.min(Duration::from_secs(3600)),
            discrepancy_tolerance,
        }
    }

    /// Expected (input price, output price, latency seconds) for a mode.
    ///
    /// FAST assumes the cheapest/fastest mix, BALANCED the average,
    /// BEST_QUALITY the premium end. With an empty registry everything is
    /// zero and estimates degrade to zero cost.
    fn mix(&self, mode: ExecutionMode) -> (f64, f64, f64) {
        let models = self.registry.models();
        if models.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let inputs: Vec<f64> = models.iter().map(|m| m.unit_price_input).collect();
        let outputs: Vec<f64> = models.iter().map(|m| m.unit_price_output).collect();
        let latencies: Vec<f64> =
            models.iter().map(|m| m.typical_latency_ms as f64 / 1000.0).collect();

        let pick = |values: &[f64]| -> (f64, f64, f64) {
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            (min, mean, max)
        };

        let (in_min, in_mean, in_max) = pick(&inputs);
        let (out_min, out_mean, out_max) = pick(&outputs);
        let (lat_min, lat_mean, lat_max) = pick(&latencies);

        match mode {
            ExecutionMode::Fast => (in_min, out_min, lat_min),
            ExecutionMode::Balanced => (in_mean, out_mean, lat_mean),
            ExecutionMode::BestQuality => (in_max, out_max, lat_max),
        }
    }

    /// Estimates cost and time for a request of the given character length.
    ///
    /// The formula runs on the literal length; the length is bucketed to
    /// the nearest 10 only for the cache key.
    pub fn estimate(&self, request_len: usize, mode: ExecutionMode) -> ModeEstimate {
        let bucket = ((request_len + 5) / 10) * 10;
        let key = (bucket, mode);

        {
            let cache = self.cache.lock().unwrap();
            if let Some((estimate, at)) = cache.get(&key) {
                if at.elapsed() < self.cache_ttl {
                    return *estimate;
                }
            }
        }

        let (input_mult, output_mult) = multipliers(mode);
        let input_tokens = (request_len as f64 * 0.25 * input_mult).ceil();
        let output_tokens = (request_len as f64 * 0.25 * output_mult).ceil();

        let (input_price, output_price, latency_secs) = self.mix(mode);
        let cost = input_tokens * input_price + output_tokens * output_price;
        let time_secs = latency_secs * (1.0 + request_len as f64 / 4000.0);

        let estimate = ModeEstimate { cost, time_secs };
        debug!(
            request_len = request_len,
            mode = %mode,
            cost = cost,
            time_secs = time_secs,
            "Cost estimated"
        );

        let mut cache = self.cache.lock().unwrap();
        cache.insert(key, (estimate, Instant::now()));
        estimate
    }

    /// Estimates all three modes for one request length.
    pub fn estimate_all(&self, request_len: usize) -> EstimateSet {
        EstimateSet {
            fast: self.estimate(request_len, ExecutionMode::Fast),
            balanced: self.estimate(request_len, ExecutionMode::Balanced),
            best_quality: self.estimate(request_len, ExecutionMode::BestQuality),
        }
    }

    /// Computes the actual cost breakdown from successful agent responses.
    ///
    /// Grouped per subtask and per model; the total equals the sum over all
    /// responses. Responses from models missing from the registry are
    /// costed at zero and logged.
    pub fn actual_cost(&self, responses: &[AgentResponse]) -> CostBreakdown {
        let mut breakdown = CostBreakdown::default();
        let mut per_model: HashMap<String, ModelCost> = HashMap::new();

        for response in responses.iter().filter(|r| r.success) {
            let usage = council_abstraction::TokenUsage::new(
                response.assessment.input_tokens,
                response.assessment.output_tokens,
            );
            let (cost, provider) = match self.registry.get(&response.model_id) {
                Ok(record) => (record.run_cost(&usage), record.provider.as_str().to_string()),
                Err(_) => {
                    warn!(model_id = %response.model_id, "Costing response from unknown model at zero");
                    (0.0, "unknown".to_string())
                }
            };

            breakdown.total_cost += cost;
            breakdown.total_input_tokens += u64::from(usage.input_tokens);
            breakdown.total_output_tokens += u64::from(usage.output_tokens);
            breakdown.by_subtask.push(SubtaskCost {
                subtask_id: response.subtask_id,
                model_id: response.model_id.clone(),
                cost,
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            });

            let entry = per_model.entry(response.model_id.clone()).or_insert_with(|| ModelCost {
                model_id: response.model_id.clone(),
                provider,
                cost: 0.0,
                calls: 0,
            });
            entry.cost += cost;
            entry.calls += 1;
        }

        let mut by_model: Vec<ModelCost> = per_model.into_values().collect();
        by_model.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        breakdown.by_model = by_model;
        breakdown
    }

    /// Compares estimate and actual, reporting a discrepancy when the
    /// relative gap exceeds the tolerance.
    ///
    /// Discrepancies never fail the request; the caller logs and moves on.
    pub fn check_discrepancy(
        &self,
        request_id: Uuid,
        mode: ExecutionMode,
        estimated: f64,
        actual: f64,
    ) -> Option<CostDiscrepancy> {
        let ratio = (actual - estimated).abs() / estimated.max(EPSILON);
        if ratio <= self.discrepancy_tolerance {
            return None;
        }

        let direction = if actual > estimated { Direction::Over } else { Direction::Under };
        let discrepancy =
            CostDiscrepancy { request_id, mode, estimated, actual, ratio, direction };
        warn!(
            request_id = %request_id,
            mode = %mode,
            estimated = estimated,
            actual = actual,
            ratio = ratio,
            direction = ?direction,
            "Cost estimate discrepancy"
        );
        Some(discrepancy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ModelRecord;
    use crate::types::{RiskLevel, SelfAssessment, TaskType};
    use chrono::Utc;
    use council_abstraction::ProviderClient;
    use council_models::{MockClient, ProviderKind};

    fn registry() -> Arc<ProviderRegistry> {
        let records = vec![
            ModelRecord {
                id: "cheap".to_string(),
                provider: ProviderKind::Mock,
                model_name: "cheap".to_string(),
                capabilities: vec![TaskType::Reasoning],
                unit_price_input: 1e-6,
                unit_price_output: 1e-6,
                typical_latency_ms: 500,
                reliability: 0.9,
                max_context: 8192,
            },
            ModelRecord {
                id: "premium".to_string(),
                provider: ProviderKind::Mock,
                model_name: "premium".to_string(),
                capabilities: vec![TaskType::Reasoning],
                unit_price_input: 3e-5,
                unit_price_output: 6e-5,
                typical_latency_ms: 3000,
                reliability: 0.98,
                max_context: 8192,
            },
        ];
        let mut clients: HashMap<String, Arc<dyn ProviderClient>> = HashMap::new();
        for r in &records {
            clients.insert(r.id.clone(), Arc::new(MockClient::new(r.id.clone())));
        }
        Arc::new(ProviderRegistry::with_models(records, clients))
    }

    fn response(subtask_id: Uuid, model_id: &str, input: u32, output: u32) -> AgentResponse {
        AgentResponse {
            subtask_id,
            model_id: model_id.to_string(),
            text: "answer".to_string(),
            assessment: SelfAssessment {
                confidence: 0.9,
                assumptions: vec![],
                risk: RiskLevel::Low,
                input_tokens: input,
                output_tokens: output,
                elapsed_ms: 100,
            },
            timestamp: Utc::now(),
            success: true,
        }
    }

    #[test]
    fn test_estimates_are_mode_monotone() {
        let engine = CostEngine::new(registry());
        for len in [10usize, 100, 500, 2000, 5000] {
            let set = engine.estimate_all(len);
            assert!(set.fast.cost <= set.balanced.cost, "cost order broken at len {len}");
            assert!(set.balanced.cost <= set.best_quality.cost, "cost order broken at len {len}");
            assert!(set.fast.time_secs <= set.balanced.time_secs);
            assert!(set.balanced.time_secs <= set.best_quality.time_secs);
            assert!(set.fast.cost >= 0.0);
        }
    }

    #[test]
    fn test_estimates_are_length_monotone() {
        let engine = CostEngine::new(registry());
        for mode in ExecutionMode::all() {
            let mut previous = ModeEstimate { cost: 0.0, time_secs: 0.0 };
            for len in (0..=5000).step_by(250) {
                let estimate = engine.estimate(len, mode);
                assert!(estimate.cost >= previous.cost, "len {len} regressed in {mode}");
                assert!(estimate.time_secs >= previous.time_secs);
                previous = estimate;
            }
        }
    }

    #[test]
    fn test_cache_serves_lengths_in_the_same_bucket() {
        let engine = CostEngine::new(registry());
        // 501 and 503 both bucket to 500: the second call is a cache hit
        // and returns the value computed for the first.
        let a = engine.estimate(501, ExecutionMode::Balanced);
        let b = engine.estimate(503, ExecutionMode::Balanced);
        assert_eq!(a.cost.to_bits(), b.cost.to_bits());

        // 509 lands in the next bucket and is computed from its literal
        // length, so it differs from the 501 estimate.
        let c = engine.estimate(509, ExecutionMode::Balanced);
        assert!(c.cost > a.cost);
    }

    #[test]
    fn test_empty_registry_estimates_zero_cost() {
        let registry = Arc::new(ProviderRegistry::with_models(vec![], HashMap::new()));
        let engine = CostEngine::new(registry);
        let set = engine.estimate_all(500);
        assert_eq!(set.fast.cost, 0.0);
        assert_eq!(set.best_quality.cost, 0.0);
    }

    #[test]
    fn test_actual_cost_sums_over_responses() {
        let engine = CostEngine::new(registry());
        let subtask_a = Uuid::new_v4();
        let subtask_b = Uuid::new_v4();
        let responses = vec![
            response(subtask_a, "cheap", 1000, 500),
            response(subtask_b, "premium", 2000, 1000),
        ];

        let breakdown = engine.actual_cost(&responses);
        let expected_cheap = 1000.0 * 1e-6 + 500.0 * 1e-6;
        let expected_premium = 2000.0 * 3e-5 + 1000.0 * 6e-5;
        assert!((breakdown.total_cost - (expected_cheap + expected_premium)).abs() < 1e-12);
        assert_eq!(breakdown.by_subtask.len(), 2);
        assert_eq!(breakdown.by_model.len(), 2);
        assert_eq!(breakdown.total_input_tokens, 3000);
        assert_eq!(breakdown.total_output_tokens, 1500);

        // Total equals the sum of the per-subtask attribution.
        let per_subtask: f64 = breakdown.by_subtask.iter().map(|s| s.cost).sum();
        assert!((breakdown.total_cost - per_subtask).abs() < 1e-12);
    }

    #[test]
    fn test_failed_responses_cost_nothing() {
        let engine = CostEngine::new(registry());
        let mut failed = response(Uuid::new_v4(), "cheap", 1000, 500);
        failed.success = false;
        let breakdown = engine.actual_cost(&[failed]);
        assert_eq!(breakdown.total_cost, 0.0);
        assert!(breakdown.by_subtask.is_empty());
    }

    #[test]
    fn test_discrepancy_over() {
        let engine = CostEngine::new(registry());
        let request_id = Uuid::new_v4();
        let report = engine
            .check_discrepancy(request_id, ExecutionMode::Balanced, 0.005, 0.012)
            .expect("gap above tolerance");
        assert_eq!(report.direction, Direction::Over);
        assert!((report.ratio - 1.4).abs() < 1e-9);
        assert_eq!(report.mode, ExecutionMode::Balanced);
    }

    #[test]
    fn test_no_discrepancy_within_tolerance() {
        let engine = CostEngine::new(registry());
        assert!(engine
            .check_discrepancy(Uuid::new_v4(), ExecutionMode::Fast, 0.010, 0.012)
            .is_none());
    }

    #[test]
    fn test_discrepancy_under() {
        let engine = CostEngine::new(registry());
        let report = engine
            .check_discrepancy(Uuid::new_v4(), ExecutionMode::Fast, 0.010, 0.001)
            .expect("gap above tolerance");
        assert_eq!(report.direction, Direction::Under);
    }
}
