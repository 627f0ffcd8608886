//! Query refiners
//!
//! A refiner looks at the current query and a sample of what it returned
//! and proposes the next query. Returning the current query unchanged
//! signals that no further refinement is suggested.

use super::model::{NormalizedQuery, SearchQuery};
use super::query::build_initial_query;
use super::terms::extract_terms;
use crate::errors::{AppError, Result};
use crate::literature::Document;
use crate::oracle::Oracle;
use async_trait::async_trait;
use regex_lite::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// What the last search produced, as seen by the refiner
#[derive(Debug, Clone, Copy)]
pub struct Evidence<'a> {
    /// Sampled documents, possibly empty
    pub sample: &'a [Document],
    /// Documents fetched by the last search
    pub fetched: usize,
    /// Total hits reported by the database, when known
    pub total_matches: Option<u64>,
}

impl<'a> Evidence<'a> {
    pub fn none() -> Self {
        Self {
            sample: &[],
            fetched: 0,
            total_matches: None,
        }
    }
}

/// Trait for query refiners
#[async_trait]
pub trait QueryRefiner: Send + Sync {
    /// Propose the next query. Must produce a candidate even with no evidence.
    async fn refine(
        &self,
        current: &SearchQuery,
        evidence: &Evidence<'_>,
        original: &NormalizedQuery,
    ) -> Result<SearchQuery>;
}

/// Sample texts included in the prompt
const PROMPT_SAMPLES: usize = 3;

/// Characters kept per sample text
const PROMPT_SAMPLE_CHARS: usize = 600;

/// Oracle-backed refiner
pub struct OracleRefiner {
    oracle: Arc<dyn Oracle>,
    min_results: usize,
    broad_threshold: u64,
    attempts: u32,
}

impl OracleRefiner {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        min_results: usize,
        broad_threshold: u64,
        attempts: u32,
    ) -> Self {
        Self {
            oracle,
            min_results,
            broad_threshold,
            attempts: attempts.max(1),
        }
    }

    fn build_prompt(
        &self,
        current: &SearchQuery,
        evidence: &Evidence<'_>,
        original: &NormalizedQuery,
    ) -> String {
        let mut prompt = format!(
            "You refine PubMed search queries for a clinical question.\n\n\
             Original question: {}\n\
             Current query: {}\n",
            original, current
        );

        if evidence.sample.is_empty() {
            prompt.push_str(
                "\nThe current query returned no articles. Propose a broader query \
                 built only from the original question and the current query.\n",
            );
        } else {
            prompt.push_str(&format!(
                "\nArticles fetched: {}\nTotal matches: {}\n",
                evidence.fetched,
                evidence
                    .total_matches
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ));

            prompt.push_str("\nSample abstracts:\n");
            for (i, document) in evidence.sample.iter().take(PROMPT_SAMPLES).enumerate() {
                let excerpt: String = document.text.chars().take(PROMPT_SAMPLE_CHARS).collect();
                prompt.push_str(&format!("{}. [{}] {}\n", i + 1, document.id, excerpt));
            }

            let terms = extract_terms(evidence.sample);
            if !terms.is_empty() {
                prompt.push_str(&format!("\nFrequent terms: {}\n", terms.join(", ")));
            }
        }

        prompt.push_str(&format!(
            "\nRules:\n\
             - Combine synonyms and acronyms of the same concept with OR inside parentheses\n\
             - Join distinct concepts with AND\n\
             - Add an outcome block only when there are more than {} matches\n\
             - Simplify the query when fewer than {} articles were found\n\
             - Do not use field tags such as [tiab] or [MeSH]\n\
             - If the current query is already good, return it unchanged\n\n\
             Reply with the query only.",
            self.broad_threshold, self.min_results
        ));

        prompt
    }
}

fn field_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[[A-Za-z /]{2,24}\]").expect("valid field tag pattern"))
}

/// Remove one pair of quotes wrapping the whole reply. Quoted terms inside
/// a query (`"a" AND "b"`) are left alone.
fn unwrap_quotes(line: &str) -> &str {
    for quote in ['"', '\'', '`'] {
        let inner = line
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote));
        if let Some(inner) = inner {
            if !inner.contains(quote) {
                return inner.trim();
            }
        }
    }
    line
}

/// Strip formatting an oracle tends to wrap around a query
fn clean_candidate(reply: &str) -> Option<SearchQuery> {
    let line = reply
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("```"))?;

    let line = ["query:", "refined query:", "new query:"]
        .iter()
        .find_map(|label| {
            line.get(..label.len())
                .filter(|prefix| prefix.eq_ignore_ascii_case(label))
                .and_then(|_| line.get(label.len()..))
        })
        .unwrap_or(line);

    let line = unwrap_quotes(line.trim());
    let untagged = field_tag_pattern().replace_all(line, "");
    let collapsed = untagged.split_whitespace().collect::<Vec<_>>().join(" ");

    SearchQuery::new(collapsed)
}

#[async_trait]
impl QueryRefiner for OracleRefiner {
    async fn refine(
        &self,
        current: &SearchQuery,
        evidence: &Evidence<'_>,
        original: &NormalizedQuery,
    ) -> Result<SearchQuery> {
        let prompt = self.build_prompt(current, evidence, original);

        for attempt in 1..=self.attempts {
            let reply = self.oracle.complete(&prompt).await?;
            match clean_candidate(&reply) {
                Some(candidate) => {
                    debug!(attempt, candidate = %candidate, "Refiner proposed query");
                    return Ok(candidate);
                }
                None => warn!(attempt, reply = %reply, "Refiner reply contained no query"),
            }
        }

        Err(AppError::OracleProtocol {
            message: format!("no usable query after {} refinement attempts", self.attempts),
        })
    }
}

/// Deterministic refiner driven only by result counts and extracted terms
pub struct HeuristicRefiner {
    min_results: usize,
    broad_threshold: u64,
}

impl HeuristicRefiner {
    pub fn new(min_results: usize, broad_threshold: u64) -> Self {
        Self {
            min_results,
            broad_threshold,
        }
    }

    fn broaden(current: &SearchQuery, original: &NormalizedQuery) -> SearchQuery {
        let terms = current.terms();
        if terms.len() > 1 {
            let kept = terms[..terms.len() - 1].join(" ");
            if let Some(query) = SearchQuery::new(kept) {
                return query;
            }
        }
        build_initial_query(original, 1)
    }

    fn narrow(current: &SearchQuery, sample: &[Document]) -> SearchQuery {
        let present: Vec<String> = current.terms().iter().map(|t| t.to_lowercase()).collect();
        extract_terms(sample)
            .into_iter()
            .find(|term| !present.contains(&term.to_lowercase()))
            .and_then(|term| SearchQuery::new(format!("{} {}", current, term)))
            .unwrap_or_else(|| current.clone())
    }
}

#[async_trait]
impl QueryRefiner for HeuristicRefiner {
    async fn refine(
        &self,
        current: &SearchQuery,
        evidence: &Evidence<'_>,
        original: &NormalizedQuery,
    ) -> Result<SearchQuery> {
        if evidence.fetched < self.min_results {
            return Ok(Self::broaden(current, original));
        }
        if evidence.total_matches.is_some_and(|n| n > self.broad_threshold) {
            return Ok(Self::narrow(current, evidence.sample));
        }
        Ok(current.clone())
    }
}
