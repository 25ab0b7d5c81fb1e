//! Request analysis: intent description and complexity labeling.
//!
//! The analysis decides whether a request is worth decomposing at all and
//! is recorded verbatim in the progress log for inspection.

use crate::types::Complexity;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The inspectable outcome of analyzing a raw request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    /// Single-shot description of what the user wants.
    pub intent: String,
    /// Complexity label driving the decomposition decision.
    pub complexity: Complexity,
    /// Separable parts detected in the prompt, in order of appearance.
    pub parts: Vec<String>,
}

/// Heuristic analyzer over raw prompts.
pub struct Analyzer {
    /// Character length above which a single-part prompt counts as compound.
    compound_length: usize,
    /// Character length above which a prompt counts as complex.
    complex_length: usize,
}

impl Analyzer {
    /// Creates an analyzer with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self { compound_length: 400, complex_length: 1200 }
    }

    /// Analyzes a prompt.
    ///
    /// Complexity rules:
    /// - three or more separable parts, or a very long prompt → COMPLEX
    /// - two parts, or a long prompt → COMPOUND
    /// - one short clause without connectives → TRIVIAL
    /// - everything else → SIMPLE
    #[must_use]
    pub fn analyze(&self, input: &str) -> Analysis {
        let parts = split_parts(input);
        let trimmed = input.trim();

        let complexity = if parts.len() >= 3 || trimmed.len() > self.complex_length {
            Complexity::Complex
        } else if parts.len() == 2 || trimmed.len() > self.compound_length {
            Complexity::Compound
        } else if trimmed.len() < 80 && !trimmed.contains('?') {
            Complexity::Trivial
        } else {
            Complexity::Simple
        };

        let intent = describe_intent(trimmed);

        debug!(
            complexity = ?complexity,
            parts = parts.len(),
            prompt_len = trimmed.len(),
            "Request analyzed"
        );

        Analysis { intent, complexity, parts }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Connectives that separate independent parts of a prompt.
const PART_SEPARATORS: [&str; 5] = [" then ", " after that ", " and finally ", " and also ", "; "];

/// Splits a prompt into separable parts on list markers and connectives.
#[must_use]
pub fn split_parts(input: &str) -> Vec<String> {
    // Numbered or bulleted lists take precedence over inline connectives.
    let list_items: Vec<String> = input
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with("- ")
                || line.starts_with("* ")
                || line.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
                    && (line.contains(". ") || line.contains(") "))
        })
        .map(|line| {
            line.trim_start_matches(['-', '*', ' '])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == ' ')
                .to_string()
        })
        .filter(|item| item.len() >= 10)
        .collect();
    if list_items.len() >= 2 {
        return list_items;
    }

    // ASCII lowering keeps byte offsets aligned with the original text.
    let lowered = input.to_ascii_lowercase();
    let mut separators: Vec<(usize, usize)> = Vec::new();
    for separator in PART_SEPARATORS {
        let mut search_from = 0;
        while let Some(found) = lowered[search_from..].find(separator) {
            let at = search_from + found;
            separators.push((at, at + separator.len()));
            search_from = at + separator.len();
        }
    }
    separators.sort_unstable();

    // Adjacent connectives ("; then ") mark a single boundary.
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (start, end) in separators {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let mut parts = Vec::new();
    let mut cursor = 0;
    for (start, end) in merged {
        push_part(&mut parts, &input[cursor..start]);
        cursor = end;
    }
    push_part(&mut parts, &input[cursor..]);

    if parts.is_empty() {
        parts.push(input.trim().to_string());
    }
    parts
}

fn push_part(parts: &mut Vec<String>, raw: &str) {
    let cleaned = raw
        .trim()
        .trim_end_matches(|c: char| c == ';' || c == ',')
        .trim();
    if cleaned.len() >= 8 {
        parts.push(cleaned.to_string());
    }
}

/// Produces the single-shot intent description for the progress log.
fn describe_intent(prompt: &str) -> String {
    let summary: String = prompt.chars().take(120).collect();
    if prompt.len() > 120 {
        format!("{summary}…")
    } else {
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_prompt_is_trivial() {
        let analysis = Analyzer::new().analyze("Say hello in one word");
        assert_eq!(analysis.complexity, Complexity::Trivial);
        assert_eq!(analysis.parts.len(), 1);
    }

    #[test]
    fn test_question_is_simple() {
        let analysis = Analyzer::new().analyze("What is the capital of France?");
        assert_eq!(analysis.complexity, Complexity::Simple);
    }

    #[test]
    fn test_two_part_prompt_is_compound() {
        let analysis =
            Analyzer::new().analyze("Summarize this article then translate the summary to French");
        assert_eq!(analysis.complexity, Complexity::Compound);
        assert_eq!(analysis.parts.len(), 2);
    }

    #[test]
    fn test_multi_part_prompt_is_complex() {
        let analysis = Analyzer::new().analyze(
            "Explain how TLS works; then write Python code for a TLS client; and finally list three common TLS misconfigurations",
        );
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert!(analysis.parts.len() >= 3);
    }

    #[test]
    fn test_numbered_list_splits_into_parts() {
        let analysis = Analyzer::new().analyze(
            "Please do the following:\n1. Describe the architecture of the system\n2. Write a deployment script\n3. List the operational risks",
        );
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert_eq!(analysis.parts.len(), 3);
        assert!(analysis.parts[0].starts_with("Describe"));
    }

    #[test]
    fn test_long_single_part_prompt_is_compound() {
        let prompt = "Explain the history of distributed consensus ".repeat(12);
        let analysis = Analyzer::new().analyze(&prompt);
        assert_eq!(analysis.complexity, Complexity::Compound);
    }

    #[test]
    fn test_intent_is_recorded_and_bounded() {
        let prompt = "word ".repeat(100);
        let analysis = Analyzer::new().analyze(&prompt);
        assert!(analysis.intent.chars().count() <= 121);
        assert!(analysis.intent.ends_with('…'));
    }
}
