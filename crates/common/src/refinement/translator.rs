//! Question validation and translation
//!
//! A translator decides whether a raw clinical question names a population
//! or an intervention and, if so, produces the normalized English query the
//! rest of the pipeline works from. Translators fail closed: any problem is
//! a rejection, never an error.

use super::model::NormalizedQuery;
use crate::oracle::Oracle;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Translator verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translation {
    Accepted(NormalizedQuery),
    Rejected { reason: String },
}

impl Translation {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Translation::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Translation::Accepted(_))
    }

    pub fn normalized_query(&self) -> Option<&NormalizedQuery> {
        match self {
            Translation::Accepted(query) => Some(query),
            Translation::Rejected { .. } => None,
        }
    }
}

/// Trait for question translators
#[async_trait]
pub trait QueryTranslator: Send + Sync {
    async fn translate(&self, raw: &str) -> Translation;
}

/// Cheap rejection of input that no oracle should see
fn precheck(raw: &str, min_chars: usize) -> Option<Translation> {
    let trimmed = raw.trim();
    if trimmed.chars().count() < min_chars {
        return Some(Translation::rejected(format!(
            "the question is too short (at least {} characters required)",
            min_chars
        )));
    }
    if !trimmed.chars().any(char::is_alphabetic) {
        return Some(Translation::rejected("the question contains no words"));
    }
    None
}

const REJECTION_REASON: &str =
    "the question must name at least a specific population or an intervention";

/// Oracle-backed translator
pub struct OracleTranslator {
    oracle: Arc<dyn Oracle>,
    min_chars: usize,
}

impl OracleTranslator {
    pub fn new(oracle: Arc<dyn Oracle>, min_chars: usize) -> Self {
        Self { oracle, min_chars }
    }

    fn build_prompt(raw: &str) -> String {
        format!(
            "Analyse the following clinical question: \"{}\"\n\
             Check whether it contains at least one of:\n\
             1. A specific population (e.g. \"patients with diabetes\", \"high-grade glioma\")\n\
             2. An intervention (e.g. \"insulin therapy\", \"TTFields\", \"vagus nerve stimulation\")\n\
             The question may be written in any language.\n\
             Answer in exactly this format:\n\
             YES\n\
             Query: <the question in English, using generic terms>\n\
             or answer only NO if neither is present.",
            raw.trim()
        )
    }
}

/// Interpret the oracle's verdict; `None` means the reply had no recognizable shape
fn parse_verdict(reply: &str) -> Option<Translation> {
    let mut lines = reply
        .lines()
        .map(|l| l.trim().trim_matches(|c| c == '"' || c == '*' || c == '`').trim())
        .filter(|l| !l.is_empty());

    let verdict = lines.next()?.to_lowercase();
    let affirmative = ["yes", "sim", "sí", "si"]
        .iter()
        .any(|word| verdict.starts_with(word));

    if affirmative {
        let query = lines.find_map(|line| {
            let lower = line.to_lowercase();
            ["query:", "translation:", "tradução:"]
                .iter()
                .find(|label| lower.starts_with(*label))
                .and_then(|label| line.get(label.len()..))
                .map(|rest| rest.trim().trim_matches('"').to_string())
        })?;
        return NormalizedQuery::new(query).map(Translation::Accepted);
    }

    if verdict.starts_with("no") || verdict.starts_with("não") {
        return Some(Translation::rejected(REJECTION_REASON));
    }

    None
}

#[async_trait]
impl QueryTranslator for OracleTranslator {
    async fn translate(&self, raw: &str) -> Translation {
        if let Some(rejection) = precheck(raw, self.min_chars) {
            return rejection;
        }

        let reply = match self.oracle.complete(&Self::build_prompt(raw)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Translator oracle unavailable; rejecting question");
                return Translation::rejected("the question could not be validated");
            }
        };
        debug!(reply = %reply, "Translator oracle reply");

        parse_verdict(&reply).unwrap_or_else(|| {
            warn!(reply = %reply, "Unparsable translator reply; rejecting question");
            Translation::rejected("the question could not be validated")
        })
    }
}

const POPULATION_TERMS: &[&str] = &[
    "patient", "patients", "adult", "adults", "child", "children", "infant", "infants",
    "neonate", "neonates", "adolescent", "adolescents", "women", "men", "elderly",
    "older", "pregnant", "people", "individuals", "subjects", "survivors",
    "pacientes", "paciente", "adultos", "crianças", "idosos", "mulheres", "gestantes",
];

const INTERVENTION_TERMS: &[&str] = &[
    "treatment", "treated", "therapy", "therapies", "drug", "drugs", "surgery",
    "surgical", "stimulation", "vaccine", "vaccination", "supplementation",
    "intervention", "administration", "dose", "device", "rehabilitation", "training",
    "exercise", "radiotherapy", "chemotherapy", "immunotherapy", "transplant",
    "tratamento", "tratados", "terapia", "cirurgia", "estimulação", "vacina",
];

/// Keyword-membership translator, usable without an oracle
pub struct KeywordTranslator {
    min_chars: usize,
}

impl KeywordTranslator {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

#[async_trait]
impl QueryTranslator for KeywordTranslator {
    async fn translate(&self, raw: &str) -> Translation {
        if let Some(rejection) = precheck(raw, self.min_chars) {
            return rejection;
        }

        let words: Vec<String> = raw
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let has_population = words.iter().any(|w| POPULATION_TERMS.contains(&w.as_str()));
        let has_intervention = words.iter().any(|w| INTERVENTION_TERMS.contains(&w.as_str()));
        debug!(has_population, has_intervention, "Keyword translation");

        if !(has_population || has_intervention) {
            return Translation::rejected(REJECTION_REASON);
        }

        let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        NormalizedQuery::new(normalized)
            .map(Translation::Accepted)
            .unwrap_or_else(|| Translation::rejected("the question contains no words"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AppError, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedOracle {
        reply: Result<String>,
        calls: AtomicUsize,
    }

    impl CannedOracle {
        fn replying(reply: &str) -> Self {
            Self { reply: Ok(reply.to_string()), calls: AtomicUsize::new(0) }
        }

        fn failing() -> Self {
            Self {
                reply: Err(AppError::OracleTimeout { timeout_ms: 10 }),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Oracle for CannedOracle {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(AppError::OracleTimeout { timeout_ms: 10 }),
            }
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_short_input_rejected_without_oracle_call() {
        let oracle = Arc::new(CannedOracle::replying("YES\nQuery: anything"));
        let translator = OracleTranslator::new(oracle.clone(), 10);

        let verdict = translator.translate("xyz").await;
        assert!(!verdict.is_valid());
        assert!(verdict.normalized_query().is_none());

        assert!(!translator.translate("1234567890 42").await.is_valid());
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_accepts_and_normalizes() {
        let oracle = Arc::new(CannedOracle::replying(
            "YES\nQuery: patients with high-grade glioma treated with tumor treating fields",
        ));
        let translator = OracleTranslator::new(oracle, 10);

        let verdict = translator
            .translate("Pacientes com glioma de alto grau tratados com TTFields")
            .await;
        assert!(verdict.is_valid());
        assert_eq!(
            verdict.normalized_query().unwrap().as_str(),
            "patients with high-grade glioma treated with tumor treating fields"
        );
    }

    #[tokio::test]
    async fn test_oracle_failure_fails_closed() {
        let translator = OracleTranslator::new(Arc::new(CannedOracle::failing()), 10);
        let verdict = translator.translate("adults with migraine on erenumab").await;
        assert!(!verdict.is_valid());
    }

    #[tokio::test]
    async fn test_garbled_reply_fails_closed() {
        let translator = OracleTranslator::new(
            Arc::new(CannedOracle::replying("I'm not sure what you mean.")),
            10,
        );
        assert!(!translator.translate("adults with migraine on erenumab").await.is_valid());
    }

    #[test]
    fn test_parse_verdict_shapes() {
        assert_eq!(
            parse_verdict("**Yes**\n\nQuery: \"elderly women with osteoporosis\""),
            Some(Translation::Accepted(NormalizedQuery::new("elderly women with osteoporosis").unwrap()))
        );
        assert_eq!(
            parse_verdict("Sim\nTradução: children with asthma"),
            Some(Translation::Accepted(NormalizedQuery::new("children with asthma").unwrap()))
        );
        assert!(matches!(parse_verdict("NO"), Some(Translation::Rejected { .. })));
        // Affirmative without a query line is unusable
        assert_eq!(parse_verdict("YES"), None);
        assert_eq!(parse_verdict("YES\nQuery:   "), None);
        assert_eq!(parse_verdict(""), None);
        assert_eq!(parse_verdict("maybe"), None);
    }

    #[tokio::test]
    async fn test_keyword_translator() {
        let translator = KeywordTranslator::new(10);

        let verdict = translator
            .translate("Patients with  high-grade glioma treated with TTFields")
            .await;
        assert_eq!(
            verdict.normalized_query().map(|q| q.as_str()),
            Some("Patients with high-grade glioma treated with TTFields")
        );

        assert!(!translator.translate("the history of the printing press").await.is_valid());
        assert!(!translator.translate("ab").await.is_valid());
    }
}
