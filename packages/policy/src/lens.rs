//! Shared verdict heuristics: constraint violation, trigger match, and the
//! confidence-map walk. The router's expert-judgment lens and the engine's
//! output validation both build on these.
//!
//! The violation heuristic is keyword overlap and deliberately replaceable:
//! a semantic classifier can take its place without changing any caller.

use std::collections::HashSet;

use steward_types::{ConfidenceAction, ConfidenceRange, Constraint, Trigger};

/// Overlap ratio above which a rule counts as violated.
pub const VIOLATION_OVERLAP_THRESHOLD: f64 = 0.7;

/// Confidence assumed when a provider reports none.
pub const FALLBACK_CONFIDENCE: f64 = 0.75;

/// Tokens of length > 3, lowercased.
fn significant_tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 3)
        .map(str::to_string)
        .collect()
}

/// Keyword-overlap check of a constraint rule against candidate text.
pub fn rule_violated(constraint: &Constraint, text: &str) -> bool {
    let rule_tokens = significant_tokens(&constraint.rule);
    if rule_tokens.is_empty() {
        return false;
    }
    let text_tokens = significant_tokens(text);
    let overlap = rule_tokens.intersection(&text_tokens).count();
    (overlap as f64 / rule_tokens.len() as f64) > VIOLATION_OVERLAP_THRESHOLD
}

/// Case-insensitive substring match of any trigger pattern.
pub fn trigger_matches(trigger: &Trigger, text: &str) -> bool {
    let lower = text.to_lowercase();
    trigger
        .patterns
        .iter()
        .any(|p| lower.contains(&p.to_lowercase()))
}

/// Walk the ordered confidence map. Returns the action plus whether the
/// result requires review. Confidence below every band defaults to review;
/// above every band it is treated as safe to act.
pub fn walk_confidence(map: &[ConfidenceRange], confidence: f64) -> (ConfidenceAction, bool) {
    if let Some(band) = map.iter().find(|b| b.contains(confidence)) {
        let review = band.action != ConfidenceAction::Act;
        return (band.action, review);
    }
    let above_all = map.iter().all(|b| confidence > b.max);
    if !map.is_empty() && above_all {
        (ConfidenceAction::Act, false)
    } else {
        (ConfidenceAction::Escalate, true)
    }
}
