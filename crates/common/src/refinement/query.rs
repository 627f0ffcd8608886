//! Initial query construction

use super::model::{NormalizedQuery, SearchQuery};

/// Short connectives dropped even when they pass the length filter
const STOP_WORDS: &[&str] = &["with", "from", "that", "than", "versus", "into", "among", "which"];

/// Build the first search query from the normalized question.
///
/// Keeps the first `max_terms` tokens longer than three characters that are
/// not connectives, trimmed of surrounding punctuation. Falls back to the
/// whole normalized query when no token survives, so the result is never
/// empty. Pure function of its inputs.
pub fn build_initial_query(normalized: &NormalizedQuery, max_terms: usize) -> SearchQuery {
    let key_terms: Vec<&str> = normalized
        .as_str()
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|term| term.chars().count() > 3)
        .filter(|term| !STOP_WORDS.contains(&term.to_lowercase().as_str()))
        .take(max_terms)
        .collect();

    let text = if key_terms.is_empty() {
        normalized.as_str().split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        key_terms.join(" ")
    };

    SearchQuery::new(text).unwrap_or_else(|| SearchQuery::from_normalized(normalized))
}
