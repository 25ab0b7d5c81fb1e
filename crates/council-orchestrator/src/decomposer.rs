//! Decomposition of analyzed requests into atomic, typed subtasks.

use crate::analysis::Analysis;
use crate::types::{ExecutionMode, Request, RiskLevel, Subtask, TaskType};
use tracing::debug;

/// Keyword sets per task type, most specific first.
///
/// A span is classified as the most specific matching type; among several
/// matches the fixed tie-break order decides.
const KEYWORDS: [(TaskType, &[&str]); 7] = [
    (
        TaskType::CodeGeneration,
        &["write code", "implement", "write a script", "write python", "write rust", "program", "function for", "code for", "script for"],
    ),
    (TaskType::Debugging, &["debug", "fix the bug", "fix this error", "stack trace", "diagnose"]),
    (
        TaskType::FactCheck,
        &["fact check", "fact-check", "verify the claim", "is it true", "confirm whether"],
    ),
    (
        TaskType::Verification,
        &["review the", "check the answer", "validate", "verify the result", "consistency"],
    ),
    (
        TaskType::Research,
        &["research", "find information", "look up", "gather", "list the", "list three", "list 3", "summarize", "background"],
    ),
    (
        TaskType::Creative,
        &["write a story", "write a poem", "brainstorm", "creative", "slogan", "name ideas"],
    ),
    (
        TaskType::Reasoning,
        &["explain", "analyze", "compare", "evaluate", "why", "reason", "decide", "trade-off", "tradeoff"],
    ),
];

/// Classifies a span of prompt text into a task type.
///
/// Falls back to Reasoning when nothing matches.
#[must_use]
pub fn classify(text: &str) -> TaskType {
    let lower = text.to_lowercase();
    let mut matches: Vec<TaskType> = KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(task_type, _)| *task_type)
        .collect();
    matches.sort_by_key(TaskType::tie_break_rank);
    matches.into_iter().next().unwrap_or(TaskType::Reasoning)
}

/// Accuracy required of a subtask, by task type.
fn accuracy_for(task_type: TaskType) -> f64 {
    match task_type {
        TaskType::FactCheck | TaskType::Verification => 0.95,
        TaskType::CodeGeneration | TaskType::Debugging => 0.9,
        TaskType::Reasoning | TaskType::Research => 0.8,
        TaskType::Creative => 0.6,
    }
}

/// Risk implied by an accuracy requirement.
fn risk_for(accuracy: f64) -> RiskLevel {
    if accuracy >= 0.9 {
        RiskLevel::High
    } else if accuracy >= 0.8 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Turns an analyzed request into an ordered list of atomic subtasks.
pub struct Decomposer;

impl Decomposer {
    /// Creates a decomposer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Produces the subtask list for a request.
    ///
    /// TRIVIAL and SIMPLE requests bypass decomposition: one subtask
    /// identical to the input. Otherwise the detected parts become subtasks,
    /// capped at the mode's maximum; when fewer parts exist than the mode's
    /// minimum, supporting fact-check / verification / research subtasks are
    /// appended.
    #[must_use]
    pub fn decompose(&self, request: &Request, analysis: &Analysis) -> Vec<Subtask> {
        if analysis.complexity.bypasses_decomposition() {
            let task_type = classify(&request.prompt);
            let accuracy = accuracy_for(task_type);
            let subtask = Subtask {
                accuracy_requirement: accuracy,
                ..Subtask::new(request.id, request.prompt.clone(), task_type)
            }
            .with_risk(risk_for(accuracy));
            return vec![subtask];
        }

        let mode = request.mode;
        let mut parts: Vec<String> = analysis.parts.clone();
        if parts.is_empty() {
            parts.push(request.prompt.clone());
        }
        parts.truncate(mode.max_subtasks());

        let mut subtasks: Vec<Subtask> = parts
            .iter()
            .map(|part| {
                let task_type = classify(part);
                let accuracy = accuracy_for(task_type);
                Subtask {
                    accuracy_requirement: accuracy,
                    ..Subtask::new(request.id, part.clone(), task_type)
                }
                .with_risk(risk_for(accuracy))
            })
            .collect();

        // Supporting subtasks fill the gap up to the mode minimum.
        let supplements: [(TaskType, String); 3] = [
            (
                TaskType::FactCheck,
                format!("Verify the factual claims in the combined answer to: {}", analysis.intent),
            ),
            (
                TaskType::Verification,
                format!(
                    "Review the combined answer to \"{}\" for consistency and completeness",
                    analysis.intent
                ),
            ),
            (TaskType::Research, format!("Gather background context for: {}", analysis.intent)),
        ];
        let mut supplement_iter = supplements.into_iter();
        while subtasks.len() < mode.min_subtasks().min(mode.max_subtasks()) {
            match supplement_iter.next() {
                Some((task_type, content)) => {
                    let accuracy = accuracy_for(task_type);
                    subtasks.push(
                        Subtask {
                            accuracy_requirement: accuracy,
                            ..Subtask::new(request.id, content, task_type)
                        }
                        .with_risk(risk_for(accuracy)),
                    );
                }
                None => break,
            }
        }

        // Earlier parts run first when the executor has to queue.
        let total = subtasks.len() as u32;
        for (index, subtask) in subtasks.iter_mut().enumerate() {
            subtask.priority = total - index as u32;
        }

        debug!(
            request_id = %request.id,
            mode = %mode,
            subtask_count = subtasks.len(),
            "Request decomposed"
        );

        subtasks
    }
}

impl Default for Decomposer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyzer;
    use crate::types::Complexity;

    fn request(prompt: &str, mode: ExecutionMode) -> Request {
        Request::new("tester".to_string(), prompt.to_string(), mode)
    }

    #[test]
    fn test_classify_prefers_specific_types() {
        assert_eq!(classify("Write Python code for a parser"), TaskType::CodeGeneration);
        assert_eq!(classify("Debug this stack trace"), TaskType::Debugging);
        assert_eq!(classify("Is it true that the moon is shrinking?"), TaskType::FactCheck);
        assert_eq!(classify("List three uses of graphene"), TaskType::Research);
        assert_eq!(classify("Write a poem about rain"), TaskType::Creative);
        assert_eq!(classify("Explain the CAP theorem"), TaskType::Reasoning);
    }

    #[test]
    fn test_classify_tie_break_order() {
        // Matches both code generation ("implement") and reasoning
        // ("explain"): code generation ranks first.
        assert_eq!(classify("Explain and implement quicksort"), TaskType::CodeGeneration);
    }

    #[test]
    fn test_classify_falls_back_to_reasoning() {
        assert_eq!(classify("Hello there"), TaskType::Reasoning);
    }

    #[test]
    fn test_trivial_request_bypasses_decomposition() {
        let request = request("Say hello in one word", ExecutionMode::Fast);
        let analysis = Analyzer::new().analyze(&request.prompt);
        assert_eq!(analysis.complexity, Complexity::Trivial);

        let subtasks = Decomposer::new().decompose(&request, &analysis);
        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].content, request.prompt);
        assert_eq!(subtasks[0].request_id, request.id);
    }

    #[test]
    fn test_fast_mode_caps_at_two_subtasks() {
        let request = request(
            "Explain how TLS works; then write Python code for a TLS client; and finally list three common TLS misconfigurations",
            ExecutionMode::Fast,
        );
        let analysis = Analyzer::new().analyze(&request.prompt);
        let subtasks = Decomposer::new().decompose(&request, &analysis);
        assert!(subtasks.len() <= 2);
    }

    #[test]
    fn test_balanced_mode_produces_three_to_four() {
        let request = request(
            "Summarize this article then translate the summary to French",
            ExecutionMode::Balanced,
        );
        let analysis = Analyzer::new().analyze(&request.prompt);
        let subtasks = Decomposer::new().decompose(&request, &analysis);
        assert!((3..=4).contains(&subtasks.len()), "got {} subtasks", subtasks.len());
    }

    #[test]
    fn test_best_quality_produces_four_to_six() {
        let request = request(
            "Explain X, then write Python for X, then list 3 uses",
            ExecutionMode::BestQuality,
        );
        let analysis = Analyzer::new().analyze(&request.prompt);
        let subtasks = Decomposer::new().decompose(&request, &analysis);
        assert!((4..=6).contains(&subtasks.len()), "got {} subtasks", subtasks.len());
        assert!(subtasks.iter().any(|s| s.task_type == TaskType::CodeGeneration));
        assert!(subtasks.iter().any(|s| s.task_type == TaskType::Research));
    }

    #[test]
    fn test_priorities_preserve_order() {
        let request = request(
            "Explain how TLS works; then write Python code for a TLS client; and finally list three common TLS misconfigurations",
            ExecutionMode::BestQuality,
        );
        let analysis = Analyzer::new().analyze(&request.prompt);
        let subtasks = Decomposer::new().decompose(&request, &analysis);
        for pair in subtasks.windows(2) {
            assert!(pair[0].priority > pair[1].priority);
        }
    }

    #[test]
    fn test_risk_tracks_accuracy() {
        let request = request(
            "Explain X, then write Python for X, then list 3 uses",
            ExecutionMode::BestQuality,
        );
        let analysis = Analyzer::new().analyze(&request.prompt);
        let subtasks = Decomposer::new().decompose(&request, &analysis);
        let code = subtasks.iter().find(|s| s.task_type == TaskType::CodeGeneration).unwrap();
        assert_eq!(code.risk, RiskLevel::High);
        assert!((code.accuracy_requirement - 0.9).abs() < f64::EPSILON);
    }
}
