//! Fallback Matcher — deterministic keyword rules applied when the main
//! classifier emits `None`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::types::{Classification, NluResult};

/// One row of a language's fallback table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRule {
    pub words: Vec<String>,
    pub domain: String,
    pub skill: String,
    pub action: String,
}

/// First rule whose words all occur in the utterance wins; declaration
/// order breaks ties. Matching is on lowercased whitespace tokens with
/// surrounding punctuation trimmed, multiplicity ignored. Pure: same
/// utterance and table always produce the same result.
pub fn match_fallback(utterance: &str, rules: &[FallbackRule]) -> Option<NluResult> {
    let lowered = utterance.to_lowercase();
    let tokens: HashSet<&str> = lowered
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .collect();

    for rule in rules {
        let all_present = rule
            .words
            .iter()
            .all(|word| tokens.contains(word.to_lowercase().as_str()));
        if all_present {
            return Some(NluResult {
                utterance: utterance.to_string(),
                classification: Classification::certain(
                    rule.domain.clone(),
                    rule.skill.clone(),
                    rule.action.clone(),
                ),
                ..Default::default()
            });
        }
    }
    None
}
