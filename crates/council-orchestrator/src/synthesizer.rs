//! Synthesis of validated agent responses into one final response.
//!
//! Sections follow the original subtask order regardless of completion
//! order; identical sentences are deduplicated; headings are normalized.
//! Inconclusive arbitration renders both answers as explicit alternatives,
//! and failed subtasks are annotated as gaps with reduced confidence.

use crate::arbiter::{ArbitrationDecision, ArbitrationOutcome};
use crate::routing::ProviderRegistry;
use crate::types::{
    AgentResponse, CostBreakdown, FinalResponse, ProviderSelectionEntry, Subtask, SubtaskOutcome,
    SubtaskStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Builds the final response from kept agent responses.
pub struct Synthesizer {
    registry: Arc<ProviderRegistry>,
}

impl Synthesizer {
    /// Creates a synthesizer.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Combines kept responses into a `FinalResponse`.
    ///
    /// # Arguments
    /// * `subtasks` - All subtasks in original order
    /// * `responses` - Responses kept by the arbiter
    /// * `decisions` - Arbitration decisions, for alternative rendering
    /// * `cost` - Cost breakdown computed by the cost engine
    /// * `selection_log` - Every routing decision made for the request
    #[must_use]
    pub fn synthesize(
        &self,
        subtasks: &[Subtask],
        responses: &[AgentResponse],
        decisions: &[ArbitrationDecision],
        cost: CostBreakdown,
        selection_log: Vec<ProviderSelectionEntry>,
    ) -> FinalResponse {
        let mut by_subtask: HashMap<Uuid, Vec<&AgentResponse>> = HashMap::new();
        for response in responses.iter().filter(|r| r.success) {
            by_subtask.entry(response.subtask_id).or_default().push(response);
        }
        let inconclusive: HashMap<Uuid, (&str, &str)> = decisions
            .iter()
            .filter_map(|d| match &d.outcome {
                ArbitrationOutcome::Inconclusive { primary, secondary } => {
                    Some((d.subtask_id, (primary.as_str(), secondary.as_str())))
                }
                ArbitrationOutcome::Decided { .. } => None,
            })
            .collect();

        let multi_part = subtasks.len() > 1;
        let mut seen_sentences: HashSet<String> = HashSet::new();
        let mut sections: Vec<String> = Vec::new();
        let mut failed_subtasks = 0usize;

        for (index, subtask) in subtasks.iter().enumerate() {
            let Some(subtask_responses) = by_subtask.get(&subtask.id) else {
                failed_subtasks += 1;
                sections.push(format!(
                    "> No result could be produced for: {}",
                    heading_text(&subtask.content)
                ));
                continue;
            };

            let mut section = String::new();
            if multi_part {
                section.push_str(&format!(
                    "## Part {}: {}\n\n",
                    index + 1,
                    heading_text(&subtask.content)
                ));
            }

            if let Some((primary, secondary)) = inconclusive.get(&subtask.id) {
                let primary_text = subtask_responses
                    .iter()
                    .find(|r| r.model_id == *primary)
                    .map(|r| r.text.as_str())
                    .unwrap_or_default();
                let secondary_text = subtask_responses
                    .iter()
                    .find(|r| r.model_id == *secondary)
                    .map(|r| r.text.as_str())
                    .unwrap_or_default();
                section.push_str(&format!(
                    "**Alternative A**\n\n{}\n\n**Alternative B**\n\n{}",
                    dedupe_sentences(&normalize_body(primary_text), &mut seen_sentences),
                    dedupe_sentences(&normalize_body(secondary_text), &mut seen_sentences),
                ));
            } else {
                // Winner first; redundant agreeing responses add nothing.
                let winner = subtask_responses[0];
                section.push_str(&dedupe_sentences(
                    &normalize_body(&winner.text),
                    &mut seen_sentences,
                ));
            }
            sections.push(section.trim_end().to_string());
        }

        let text = sections.join("\n\n");

        // Confidence weighted by content length, discounted for gaps.
        let mut weighted = 0.0;
        let mut weight = 0.0;
        for subtask_responses in by_subtask.values() {
            for response in subtask_responses {
                let w = response.text.len().max(1) as f64;
                weighted += response.assessment.confidence * w;
                weight += w;
            }
        }
        let mut overall_confidence = if weight > 0.0 { weighted / weight } else { 0.0 };
        if !subtasks.is_empty() {
            let success_ratio =
                (subtasks.len() - failed_subtasks) as f64 / subtasks.len() as f64;
            overall_confidence *= success_ratio;
        }

        let mut models_used: Vec<String> = Vec::new();
        for response in responses.iter().filter(|r| r.success) {
            if !models_used.contains(&response.model_id) {
                models_used.push(response.model_id.clone());
            }
        }

        let mut usage_counts: HashMap<String, u32> = HashMap::new();
        for response in responses.iter().filter(|r| r.success) {
            let provider = self
                .registry
                .get(&response.model_id)
                .map(|r| r.provider.as_str().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            *usage_counts.entry(provider).or_default() += 1;
        }
        let mut provider_usage: Vec<(String, u32)> = usage_counts.into_iter().collect();
        provider_usage.sort_by(|a, b| a.0.cmp(&b.0));

        let subtask_outcomes: Vec<SubtaskOutcome> = subtasks
            .iter()
            .map(|s| SubtaskOutcome {
                subtask_id: s.id,
                status: s.status,
                error_code: (s.status == SubtaskStatus::Failed)
                    .then(|| "subtask_failed".to_string()),
            })
            .collect();

        debug!(
            sections = sections.len(),
            failed_subtasks = failed_subtasks,
            overall_confidence = overall_confidence,
            "Synthesis complete"
        );

        FinalResponse {
            text,
            overall_confidence,
            cost,
            models_used,
            provider_usage,
            selection_log,
            subtask_outcomes,
        }
    }
}

/// First line of a subtask's content, bounded, for section headings.
fn heading_text(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or(content).trim();
    let truncated: String = first_line.chars().take(60).collect();
    if first_line.chars().count() > 60 {
        format!("{truncated}…")
    } else {
        truncated
    }
}

/// Normalizes heading style: response-internal markdown headings become
/// bold text so section structure stays uniform.
fn normalize_body(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if let Some(stripped) = trimmed.strip_prefix('#') {
                let title = stripped.trim_start_matches('#').trim();
                if title.is_empty() {
                    String::new()
                } else {
                    format!("**{title}**")
                }
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Removes sentences already emitted earlier in the body.
fn dedupe_sentences(text: &str, seen: &mut HashSet<String>) -> String {
    let mut out = String::new();
    for line in text.lines() {
        let mut kept_any = false;
        let mut line_out = String::new();
        for sentence in line.split_inclusive(['.', '!', '?']) {
            let key = sentence.trim().trim_end_matches(['.', '!', '?']).to_lowercase();
            if key.len() < 12 || seen.insert(key) {
                line_out.push_str(sentence);
                kept_any = true;
            }
        }
        if kept_any || line.trim().is_empty() {
            out.push_str(line_out.trim_end());
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}
