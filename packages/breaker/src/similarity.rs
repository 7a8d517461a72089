//! Near-duplicate detection via Jaccard similarity over word sets.

use std::collections::HashSet;

/// Stop-words removed before comparison. Short function words dominate
/// chat-style output and would inflate similarity between unrelated turns.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "i",
    "in", "is", "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "we", "were",
    "will", "with", "you", "your",
];

/// Lowercase word set with stop-words removed.
pub fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two texts' token sets. Two empty sets are
/// identical by convention.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a = token_set(a);
    let set_b = token_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}
