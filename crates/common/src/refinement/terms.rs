//! Candidate term extraction from sampled abstracts

use crate::literature::Document;
use regex_lite::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// Frequent words per document that are worth suggesting
const FREQUENT_PER_DOCUMENT: usize = 2;

/// Words too common in clinical abstracts to be useful search terms
const STOP_WORDS: &[&str] = &[
    "with", "from", "this", "study", "patients", "that", "were", "have", "been",
    "their", "these", "which", "between", "after", "during", "than", "also",
    "there", "results", "methods", "conclusions", "background", "group", "groups",
];

fn acronym_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b[A-Z]{2,}\b").expect("valid acronym pattern"))
}

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w{4,}\b").expect("valid word pattern"))
}

/// Extract acronyms and repeated words from each document.
///
/// Per document: every upper-case acronym of two or more letters, plus the
/// two most repeated lower-cased words of four or more characters that are
/// not stop words. The union is returned sorted, so the output depends only
/// on the documents given.
pub fn extract_terms(documents: &[Document]) -> Vec<String> {
    let mut terms = BTreeSet::new();

    for document in documents {
        for acronym in acronym_pattern().find_iter(&document.text) {
            terms.insert(acronym.as_str().to_string());
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in word_pattern().find_iter(&document.text) {
            let word = word.as_str().to_lowercase();
            if word.chars().all(|c| c.is_ascii_digit()) || STOP_WORDS.contains(&word.as_str()) {
                continue;
            }
            *counts.entry(word).or_insert(0) += 1;
        }

        let mut frequent: Vec<(String, usize)> =
            counts.into_iter().filter(|(_, count)| *count > 1).collect();
        frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        terms.extend(
            frequent
                .into_iter()
                .take(FREQUENT_PER_DOCUMENT)
                .map(|(word, _)| word),
        );
    }

    terms.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_acronyms_and_repeated_words() {
        let docs = vec![Document::new(
            "1",
            "Tumor treating fields (TTFields) in GBM. Tumor control with fields was durable; \
             tumor volume shrank. Patients patients patients study study.",
        )];
        let terms = extract_terms(&docs);

        assert!(terms.contains(&"GBM".to_string()));
        assert!(terms.contains(&"tumor".to_string()));
        assert!(terms.contains(&"fields".to_string()));
        assert!(!terms.contains(&"patients".to_string()));
        assert!(!terms.contains(&"study".to_string()));
    }

    #[test]
    fn test_limits_frequent_words_per_document() {
        let docs = vec![Document::new(
            "1",
            "alpha alpha alpha beta beta beta gamma gamma delta delta",
        )];
        let terms = extract_terms(&docs);
        assert_eq!(terms, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_empty_input() {
        assert!(extract_terms(&[]).is_empty());
        assert!(extract_terms(&[Document::new("1", "")]).is_empty());
    }

    #[test]
    fn test_output_is_sorted_and_unique() {
        let docs = vec![
            Document::new("1", "SAH and SAH again; vasospasm vasospasm"),
            Document::new("2", "SAH, nimodipine nimodipine"),
        ];
        let terms = extract_terms(&docs);
        let mut sorted = terms.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(terms, sorted);
        assert_eq!(terms.iter().filter(|t| *t == "SAH").count(), 1);
    }
}
