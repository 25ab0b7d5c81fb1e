//! Arbitration over competing agent responses.
//!
//! Invoked when a subtask has several responses (redundant dispatch) or
//! when responses of different subtasks carry contradicting claims.
//! Disagreements are always resolved through an explicit, recorded
//! decision; nothing is merged silently.

use crate::routing::ProviderRegistry;
use crate::types::AgentResponse;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Reliability assumed for models missing from the registry.
const UNKNOWN_RELIABILITY: f64 = 0.5;

/// How an arbitration ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ArbitrationOutcome {
    /// One response won outright.
    Decided {
        /// The winning model.
        model_id: String,
    },
    /// Two surviving responses disagree too closely to call; both must be
    /// presented as alternatives.
    Inconclusive {
        /// Higher-scored model.
        primary: String,
        /// Runner-up model.
        secondary: String,
    },
}

/// An explicit, recorded arbitration decision.
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrationDecision {
    /// The subtask arbitrated.
    pub subtask_id: Uuid,
    /// The outcome.
    pub outcome: ArbitrationOutcome,
    /// Responses dropped before scoring, with reasons.
    pub dropped: Vec<(String, String)>,
    /// Human-readable rationale.
    pub rationale: String,
}

/// A contradicting claim found across two subtasks.
#[derive(Debug, Clone, Serialize)]
pub struct Contradiction {
    /// The claim span, normalized.
    pub claim: String,
    /// Subtask asserting the claim.
    pub asserting_subtask: Uuid,
    /// Subtask negating the claim.
    pub negating_subtask: Uuid,
}

/// Resolves competing responses by confidence and model reliability.
pub struct Arbiter {
    registry: Arc<ProviderRegistry>,
    /// Responses below this confidence are dropped outright.
    min_confidence: f64,
    /// Product delta under which disagreeing survivors stay unresolved.
    inconclusive_delta: f64,
}

impl Arbiter {
    /// Creates an arbiter with the default thresholds (0.3 / 0.1).
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry, min_confidence: 0.3, inconclusive_delta: 0.1 }
    }

    fn reliability(&self, model_id: &str) -> f64 {
        self.registry.get(model_id).map(|r| r.reliability).unwrap_or(UNKNOWN_RELIABILITY)
    }

    /// Arbitrates the responses of one subtask.
    ///
    /// Returns the responses to keep for synthesis plus the decision, when
    /// one was needed. A single response passes through untouched.
    ///
    /// Policy:
    /// 1. Drop responses with confidence below 0.3.
    /// 2. Prefer the highest confidence × reliability product.
    /// 3. Disagreeing survivors within a 0.1 product delta stay
    ///    INCONCLUSIVE and are both kept.
    pub fn arbitrate(
        &self,
        subtask_id: Uuid,
        responses: Vec<AgentResponse>,
    ) -> (Vec<AgentResponse>, Option<ArbitrationDecision>) {
        if responses.len() <= 1 {
            return (responses, None);
        }

        let mut dropped: Vec<(String, String)> = Vec::new();
        let mut survivors: Vec<AgentResponse> = Vec::new();
        let mut below_floor: Vec<AgentResponse> = Vec::new();
        for response in responses {
            if response.assessment.confidence < self.min_confidence {
                dropped.push((
                    response.model_id.clone(),
                    format!("confidence {:.2} below 0.30", response.assessment.confidence),
                ));
                below_floor.push(response);
            } else {
                survivors.push(response);
            }
        }

        // Everything below the floor: keep the least-bad answer rather than
        // losing a completed subtask, and say so in the record.
        if survivors.is_empty() {
            below_floor.sort_by(|a, b| {
                b.assessment
                    .confidence
                    .partial_cmp(&a.assessment.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let winner = below_floor.remove(0);
            let decision = ArbitrationDecision {
                subtask_id,
                outcome: ArbitrationOutcome::Decided { model_id: winner.model_id.clone() },
                dropped,
                rationale:
                    "all responses fell below the confidence floor; kept the least uncertain"
                        .to_string(),
            };
            return (vec![winner], Some(decision));
        }

        survivors.sort_by(|a, b| {
            let product_a = a.assessment.confidence * self.reliability(&a.model_id);
            let product_b = b.assessment.confidence * self.reliability(&b.model_id);
            product_b.partial_cmp(&product_a).unwrap_or(std::cmp::Ordering::Equal)
        });

        if survivors.len() == 1 {
            let winner = survivors[0].model_id.clone();
            let decision = ArbitrationDecision {
                subtask_id,
                outcome: ArbitrationOutcome::Decided { model_id: winner.clone() },
                dropped,
                rationale: "single response above the confidence floor".to_string(),
            };
            return (survivors, Some(decision));
        }

        let top_product =
            survivors[0].assessment.confidence * self.reliability(&survivors[0].model_id);
        let second_product =
            survivors[1].assessment.confidence * self.reliability(&survivors[1].model_id);
        let disagree = responses_disagree(&survivors[0], &survivors[1]);

        if disagree && (top_product - second_product).abs() < self.inconclusive_delta {
            let decision = ArbitrationDecision {
                subtask_id,
                outcome: ArbitrationOutcome::Inconclusive {
                    primary: survivors[0].model_id.clone(),
                    secondary: survivors[1].model_id.clone(),
                },
                dropped,
                rationale: format!(
                    "disagreeing responses within delta ({top_product:.3} vs {second_product:.3})"
                ),
            };
            debug!(subtask_id = %subtask_id, "Arbitration inconclusive");
            let kept = vec![survivors.remove(0), survivors.remove(0)];
            return (kept, Some(decision));
        }

        let winner = survivors.remove(0);
        for loser in &survivors {
            dropped.push((
                loser.model_id.clone(),
                format!(
                    "lower confidence × reliability than {} ({:.3} vs {:.3})",
                    winner.model_id,
                    loser.assessment.confidence * self.reliability(&loser.model_id),
                    top_product,
                ),
            ));
        }
        let decision = ArbitrationDecision {
            subtask_id,
            outcome: ArbitrationOutcome::Decided { model_id: winner.model_id.clone() },
            dropped,
            rationale: format!("highest confidence × reliability product {top_product:.3}"),
        };
        debug!(subtask_id = %subtask_id, winner = %winner.model_id, "Arbitration decided");
        (vec![winner], Some(decision))
    }

    /// Finds contradicting claims across subtasks.
    ///
    /// Detection is claim-string equality after normalization, where one
    /// side carries a leading negator. Each finding is recorded; the
    /// resolution over the owning responses follows the same product rule.
    pub fn detect_contradictions(&self, responses: &[AgentResponse]) -> Vec<Contradiction> {
        let mut contradictions = Vec::new();
        for (i, a) in responses.iter().enumerate() {
            for b in responses.iter().skip(i + 1) {
                if a.subtask_id == b.subtask_id {
                    continue;
                }
                let claims_a = extract_claims(&a.text);
                let claims_b = extract_claims(&b.text);
                for claim in &claims_a {
                    if claims_b.iter().any(|other| negates(claim, other)) {
                        contradictions.push(Contradiction {
                            claim: claim.clone(),
                            asserting_subtask: a.subtask_id,
                            negating_subtask: b.subtask_id,
                        });
                    } else if claims_b.iter().any(|other| negates(other, claim)) {
                        contradictions.push(Contradiction {
                            claim: claim.clone(),
                            asserting_subtask: b.subtask_id,
                            negating_subtask: a.subtask_id,
                        });
                    }
                }
            }
        }
        contradictions
    }
}

/// Whether two responses materially disagree.
///
/// Responses agree when their normalized bodies match or they share at
/// least one normalized claim span.
fn responses_disagree(a: &AgentResponse, b: &AgentResponse) -> bool {
    let norm_a = normalize(&a.text);
    let norm_b = normalize(&b.text);
    if norm_a == norm_b {
        return false;
    }
    let claims_a = extract_claims(&a.text);
    let claims_b = extract_claims(&b.text);
    !claims_a.iter().any(|claim| claims_b.contains(claim))
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Short extractable claim spans: normalized sentences of bounded length.
fn extract_claims(text: &str) -> Vec<String> {
    text.split(['.', '!', '?', '\n'])
        .map(normalize)
        .filter(|s| (10..=80).contains(&s.len()))
        .collect()
}

/// Whether `negated` is `claim` with a leading negator inserted.
fn negates(claim: &str, negated: &str) -> bool {
    for negator in ["not ", "never ", "no "] {
        if let Some(rest) = negated.strip_prefix(negator) {
            if rest == claim {
                return true;
            }
        }
        // "x is not y" vs "x is y"
        if negated.replace(negator, " ").split_whitespace().collect::<Vec<_>>()
            == claim.split_whitespace().collect::<Vec<_>>()
            && negated != claim
        {
            return true;
        }
    }
    false
}
