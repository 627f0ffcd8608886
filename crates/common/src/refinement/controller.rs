//! The refinement loop
//!
//! One call to [`RefinementLoop::run`] validates a question, builds the
//! initial query and then alternates search and refinement until one of
//! the stop conditions fires. The checks run in a fixed order every cycle:
//!
//! 1. converged: the refiner returned the current query and the last search
//!    fetched at least `min_results` documents
//! 2. soft budget: past `max_initial_iterations` with at least
//!    `min_results` documents
//! 3. hard budget: past `max_initial_iterations + max_additional_iterations`
//!
//! so a run performs at most `initial + additional + 1` searches whatever
//! the refiner proposes. All loop state is local to one run.

use super::model::{NormalizedQuery, SearchQuery};
use super::query::build_initial_query;
use super::refiner::{Evidence, QueryRefiner};
use super::sampler::DocumentSampler;
use super::translator::{QueryTranslator, Translation};
use crate::config::RefinementConfig;
use crate::errors::Result;
use crate::literature::{Document, DocumentSet, LiteratureSource};
use crate::metrics::record_refinement;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Largest initial budget a single request may ask for
pub const MAX_REQUEST_INITIAL_ITERATIONS: u32 = 20;

/// A single refinement request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementRequest {
    /// Raw clinical question, in any language
    pub text: String,

    /// Overrides the configured initial budget, capped at
    /// [`MAX_REQUEST_INITIAL_ITERATIONS`]
    pub max_initial_iterations: Option<u32>,
}

impl RefinementRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            max_initial_iterations: None,
        }
    }

    pub fn with_initial_iterations(mut self, iterations: u32) -> Self {
        self.max_initial_iterations = Some(iterations);
        self
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    /// The refiner stopped proposing changes with enough results
    Converged,
    /// Enough results once the initial budget was spent
    SoftBudget,
    /// Hard iteration ceiling reached; best-effort results
    Exhausted,
}

impl LoopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStatus::Converged => "converged",
            LoopStatus::SoftBudget => "soft_budget",
            LoopStatus::Exhausted => "exhausted",
        }
    }
}

/// One search round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based
    pub iteration: u32,
    pub query: SearchQuery,
    pub result_count: usize,
    /// The source call failed and was treated as an empty result
    pub source_failed: bool,
}

/// Final state of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopResult {
    /// The query that produced `documents`
    pub query: SearchQuery,
    pub documents: DocumentSet,
    /// Searches performed
    pub iterations: u32,
    pub status: LoopStatus,
    pub history: Vec<IterationRecord>,
}

impl LoopResult {
    pub fn total_results(&self) -> usize {
        self.documents.len()
    }
}

/// Outcome of a run that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementOutcome {
    /// The question failed validation; nothing was searched
    Rejected { reason: String },
    Completed(LoopResult),
}

/// Drives translator, source and refiner for one request at a time
pub struct RefinementLoop {
    translator: Arc<dyn QueryTranslator>,
    source: Arc<dyn LiteratureSource>,
    refiner: Arc<dyn QueryRefiner>,
    sampler: Arc<dyn DocumentSampler>,
    settings: RefinementConfig,
}

impl RefinementLoop {
    pub fn new(
        translator: Arc<dyn QueryTranslator>,
        source: Arc<dyn LiteratureSource>,
        refiner: Arc<dyn QueryRefiner>,
        sampler: Arc<dyn DocumentSampler>,
        settings: RefinementConfig,
    ) -> Self {
        Self {
            translator,
            source,
            refiner,
            sampler,
            settings,
        }
    }

    pub fn settings(&self) -> &RefinementConfig {
        &self.settings
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Run one request to completion.
    ///
    /// Rejections are an `Ok` outcome. Literature source failures degrade
    /// to an empty result for that iteration. Refiner failures end the run
    /// with `Err`.
    pub async fn run(&self, request: &RefinementRequest) -> Result<RefinementOutcome> {
        let span = info_span!("refinement", request_id = %Uuid::new_v4());

        async {
            let outcome = self.execute(request).await;
            match &outcome {
                Ok(RefinementOutcome::Rejected { .. }) => record_refinement("rejected", 0),
                Ok(RefinementOutcome::Completed(result)) => {
                    record_refinement(result.status.as_str(), result.iterations)
                }
                Err(e) => {
                    warn!(error = %e, "Refinement failed");
                    record_refinement("failed", 0);
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, request: &RefinementRequest) -> Result<RefinementOutcome> {
        let normalized = match self.translator.translate(&request.text).await {
            Translation::Accepted(query) => query,
            Translation::Rejected { reason } => {
                info!(reason = %reason, "Question rejected");
                return Ok(RefinementOutcome::Rejected { reason });
            }
        };
        info!(normalized = %normalized, "Question accepted");

        let initial_budget = match request.max_initial_iterations {
            Some(requested) => requested.min(MAX_REQUEST_INITIAL_ITERATIONS),
            None => self.settings.max_initial_iterations,
        };
        let hard_budget =
            u64::from(initial_budget) + u64::from(self.settings.max_additional_iterations);

        let mut current = build_initial_query(&normalized, self.settings.max_initial_terms);
        let mut history = Vec::new();
        let mut iteration: u32 = 0;

        loop {
            iteration += 1;

            let (documents, source_failed) = self.search(&current).await;
            info!(
                iteration,
                query = %current,
                result_count = documents.len(),
                source_failed,
                "Search round complete"
            );
            history.push(IterationRecord {
                iteration,
                query: current.clone(),
                result_count: documents.len(),
                source_failed,
            });

            let candidate = self.refine(&current, &documents, &normalized).await?;

            let count = documents.len();
            let enough = count >= self.settings.min_results;

            let status = if candidate == current && !documents.is_empty() && enough {
                Some(LoopStatus::Converged)
            } else if iteration > initial_budget && enough {
                Some(LoopStatus::SoftBudget)
            } else if u64::from(iteration) > hard_budget {
                Some(LoopStatus::Exhausted)
            } else {
                None
            };

            if let Some(status) = status {
                info!(
                    iterations = iteration,
                    status = status.as_str(),
                    query = %current,
                    total_results = count,
                    "Refinement finished"
                );
                return Ok(RefinementOutcome::Completed(LoopResult {
                    query: current,
                    documents,
                    iterations: iteration,
                    status,
                    history,
                }));
            }

            current = candidate;
        }
    }

    async fn search(&self, query: &SearchQuery) -> (DocumentSet, bool) {
        match self.source.search(query.as_str()).await {
            Ok(documents) => (documents, false),
            Err(e) => {
                warn!(error = %e, query = %query, "Literature search failed; continuing with no results");
                (DocumentSet::empty(), true)
            }
        }
    }

    async fn refine(
        &self,
        current: &SearchQuery,
        documents: &DocumentSet,
        original: &NormalizedQuery,
    ) -> Result<SearchQuery> {
        let sample: Vec<Document> = self
            .sampler
            .sample(&documents.documents, self.settings.sample_size);
        let evidence = Evidence {
            sample: &sample,
            fetched: documents.len(),
            total_matches: documents.total_matches,
        };
        self.refiner.refine(current, &evidence, original).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::oracle::Oracle;
    use crate::refinement::{KeywordTranslator, LeadingSampler, OracleRefiner};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    fn settings(initial: u32, additional: u32, min_results: usize) -> RefinementConfig {
        RefinementConfig {
            max_initial_iterations: initial,
            max_additional_iterations: additional,
            min_results,
            ..RefinementConfig::default()
        }
    }

    fn docs(n: usize) -> DocumentSet {
        let documents = (0..n)
            .map(|i| Document::new(format!("{}", 1000 + i), format!("abstract number {}", i)))
            .collect();
        DocumentSet::new(documents, Some(n as u64))
    }

    /// Accepts any non-blank question verbatim
    struct AcceptAll;

    #[async_trait]
    impl QueryTranslator for AcceptAll {
        async fn translate(&self, raw: &str) -> Translation {
            NormalizedQuery::new(raw)
                .map(Translation::Accepted)
                .unwrap_or_else(|| Translation::rejected("blank"))
        }
    }

    /// Plays back result sizes; the last one repeats. `None` is a failure.
    struct ScriptedSource {
        script: Mutex<VecDeque<Option<usize>>>,
        queries: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(script: &[Option<usize>]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn sizes(sizes: &[usize]) -> Self {
            let script: Vec<Option<usize>> = sizes.iter().map(|n| Some(*n)).collect();
            Self::new(&script)
        }

        fn calls(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LiteratureSource for ScriptedSource {
        async fn search(&self, query: &str) -> Result<DocumentSet> {
            self.queries.lock().unwrap().push(query.to_string());
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front().flatten()
            } else {
                script.front().copied().flatten()
            };
            match next {
                Some(n) => Ok(docs(n)),
                None => Err(AppError::SourceTimeout { timeout_ms: 10_000 }),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    enum Behavior {
        /// Return the current query unchanged
        Echo,
        /// Append the call number, never converging
        Drift,
        /// Follow the script, then echo
        Script(Mutex<VecDeque<String>>),
        Fail,
    }

    struct FakeRefiner {
        behavior: Behavior,
        calls: AtomicUsize,
        saw_empty_sample: AtomicUsize,
    }

    impl FakeRefiner {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
                saw_empty_sample: AtomicUsize::new(0),
            }
        }

        fn scripted(candidates: &[&str]) -> Self {
            Self::new(Behavior::Script(Mutex::new(
                candidates.iter().map(|c| c.to_string()).collect(),
            )))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryRefiner for FakeRefiner {
        async fn refine(
            &self,
            current: &SearchQuery,
            evidence: &Evidence<'_>,
            _original: &NormalizedQuery,
        ) -> Result<SearchQuery> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if evidence.sample.is_empty() {
                self.saw_empty_sample.fetch_add(1, Ordering::SeqCst);
            }
            match &self.behavior {
                Behavior::Echo => Ok(current.clone()),
                Behavior::Drift => Ok(SearchQuery::new(format!("{} v{}", current, call)).unwrap()),
                Behavior::Script(candidates) => Ok(candidates
                    .lock()
                    .unwrap()
                    .pop_front()
                    .and_then(SearchQuery::new)
                    .unwrap_or_else(|| current.clone())),
                Behavior::Fail => Err(AppError::OracleProtocol {
                    message: "unusable reply".to_string(),
                }),
            }
        }
    }

    fn build(
        source: Arc<ScriptedSource>,
        refiner: Arc<FakeRefiner>,
        settings: RefinementConfig,
    ) -> RefinementLoop {
        RefinementLoop::new(
            Arc::new(AcceptAll),
            source,
            refiner,
            Arc::new(LeadingSampler),
            settings,
        )
    }

    fn completed(outcome: RefinementOutcome) -> LoopResult {
        match outcome {
            RefinementOutcome::Completed(result) => result,
            RefinementOutcome::Rejected { reason } => panic!("unexpected rejection: {}", reason),
        }
    }

    #[tokio::test]
    async fn test_converges_after_one_search() {
        let source = Arc::new(ScriptedSource::sizes(&[30]));
        let refiner = Arc::new(FakeRefiner::new(Behavior::Echo));
        let engine = build(source.clone(), refiner.clone(), settings(3, 5, 20));

        let result = completed(
            engine
                .run(&RefinementRequest::new("adults with migraine on erenumab"))
                .await
                .unwrap(),
        );

        assert_eq!(result.status, LoopStatus::Converged);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.total_results(), 30);
        assert_eq!(source.calls(), 1);
        assert_eq!(refiner.calls(), 1);
    }

    #[tokio::test]
    async fn test_terminates_within_budget_for_any_refiner() {
        for initial in 0..4u32 {
            for additional in 0..4u32 {
                for sizes in [vec![0usize], vec![5], vec![25], vec![0, 30, 5]] {
                    let source = Arc::new(ScriptedSource::sizes(&sizes));
                    let refiner = Arc::new(FakeRefiner::new(Behavior::Drift));
                    let engine =
                        build(source.clone(), refiner, settings(initial, additional, 20));

                    let result = completed(
                        engine.run(&RefinementRequest::new("children with asthma")).await.unwrap(),
                    );

                    let ceiling = (initial + additional + 1) as usize;
                    assert!(source.calls() <= ceiling);
                    assert_eq!(result.iterations as usize, source.calls());
                    assert_eq!(result.history.len(), source.calls());
                }
            }
        }
    }

    #[tokio::test]
    async fn test_zero_evidence_runs_to_exhaustion() {
        let source = Arc::new(ScriptedSource::sizes(&[0]));
        let refiner = Arc::new(FakeRefiner::new(Behavior::Echo));
        let engine = build(source.clone(), refiner.clone(), settings(3, 5, 20));

        let result = completed(
            engine.run(&RefinementRequest::new("children with asthma")).await.unwrap(),
        );

        assert_eq!(result.status, LoopStatus::Exhausted);
        assert_eq!(result.iterations, 9);
        assert_eq!(source.calls(), 9);
        assert!(result.documents.is_empty());
        assert_eq!(refiner.saw_empty_sample.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_soft_budget_accepts_enough_results() {
        let source = Arc::new(ScriptedSource::sizes(&[25]));
        let refiner = Arc::new(FakeRefiner::new(Behavior::Drift));
        let engine = build(source.clone(), refiner, settings(3, 5, 20));

        let result = completed(
            engine.run(&RefinementRequest::new("children with asthma")).await.unwrap(),
        );

        assert_eq!(result.status, LoopStatus::SoftBudget);
        assert_eq!(result.iterations, 4);
    }

    #[tokio::test]
    async fn test_request_overrides_initial_budget() {
        let source = Arc::new(ScriptedSource::sizes(&[25]));
        let refiner = Arc::new(FakeRefiner::new(Behavior::Drift));
        let engine = build(source.clone(), refiner, settings(3, 5, 20));

        let request = RefinementRequest::new("children with asthma").with_initial_iterations(0);
        let result = completed(engine.run(&request).await.unwrap());

        assert_eq!(result.status, LoopStatus::SoftBudget);
        assert_eq!(result.iterations, 1);
    }

    #[tokio::test]
    async fn test_convergence_below_threshold_keeps_going() {
        let source = Arc::new(ScriptedSource::sizes(&[5]));
        let refiner = Arc::new(FakeRefiner::new(Behavior::Echo));
        let engine = build(source.clone(), refiner, settings(1, 1, 20));

        let result = completed(
            engine.run(&RefinementRequest::new("children with asthma")).await.unwrap(),
        );

        assert_eq!(result.status, LoopStatus::Exhausted);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.total_results(), 5);
    }

    #[tokio::test]
    async fn test_glioma_scenario() {
        let source = Arc::new(ScriptedSource::sizes(&[5, 25]));
        let refiner = Arc::new(FakeRefiner::scripted(&["glioma TTFields"]));
        let engine = RefinementLoop::new(
            Arc::new(KeywordTranslator::new(10)),
            source.clone(),
            refiner.clone(),
            Arc::new(LeadingSampler),
            settings(3, 5, 20),
        );

        let result = completed(
            engine
                .run(&RefinementRequest::new(
                    "Patients with high-grade glioma treated with TTFields",
                ))
                .await
                .unwrap(),
        );

        assert_eq!(result.status, LoopStatus::Converged);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.total_results(), 25);
        assert_eq!(result.query.as_str(), "glioma TTFields");
        assert_eq!(
            *source.queries.lock().unwrap(),
            vec!["Patients high-grade glioma".to_string(), "glioma TTFields".to_string()]
        );
        assert_eq!(result.history[0].result_count, 5);
        assert_eq!(result.history[1].result_count, 25);
    }

    #[tokio::test]
    async fn test_rejection_makes_no_external_calls() {
        let source = Arc::new(ScriptedSource::sizes(&[30]));
        let refiner = Arc::new(FakeRefiner::new(Behavior::Echo));
        let engine = RefinementLoop::new(
            Arc::new(KeywordTranslator::new(10)),
            source.clone(),
            refiner.clone(),
            Arc::new(LeadingSampler),
            settings(3, 5, 20),
        );

        for raw in ["ab", "xyz"] {
            let outcome = assert_ok!(engine.run(&RefinementRequest::new(raw)).await);
            assert!(matches!(outcome, RefinementOutcome::Rejected { .. }));
        }
        assert_eq!(source.calls(), 0);
        assert_eq!(refiner.calls(), 0);
    }

    #[tokio::test]
    async fn test_source_failure_degrades_to_empty() {
        let source = Arc::new(ScriptedSource::new(&[None, Some(30)]));
        let refiner = Arc::new(FakeRefiner::new(Behavior::Echo));
        let engine = build(source.clone(), refiner, settings(3, 5, 20));

        let result = completed(
            engine.run(&RefinementRequest::new("children with asthma")).await.unwrap(),
        );

        assert_eq!(result.status, LoopStatus::Converged);
        assert_eq!(result.iterations, 2);
        assert!(result.history[0].source_failed);
        assert_eq!(result.history[0].result_count, 0);
        assert!(!result.history[1].source_failed);
    }

    #[tokio::test]
    async fn test_refiner_failure_is_terminal() {
        let source = Arc::new(ScriptedSource::sizes(&[30]));
        let refiner = Arc::new(FakeRefiner::new(Behavior::Fail));
        let engine = build(source.clone(), refiner, settings(3, 5, 20));

        let err = assert_err!(engine.run(&RefinementRequest::new("children with asthma")).await);
        assert!(matches!(err, AppError::OracleProtocol { .. }));
        assert_eq!(source.calls(), 1);
    }

    /// Always answers with the same reply
    struct FixedOracle(&'static str);

    #[async_trait]
    impl Oracle for FixedOracle {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_oracle_refiner_converges_on_quoted_query() {
        let source = Arc::new(ScriptedSource::sizes(&[30]));
        let oracle = Arc::new(FixedOracle("\"glioma\" AND \"TTFields\""));
        let engine = RefinementLoop::new(
            Arc::new(AcceptAll),
            source.clone(),
            Arc::new(OracleRefiner::new(oracle, 20, 500, 1)),
            Arc::new(LeadingSampler),
            settings(3, 5, 20),
        );

        let result = completed(
            engine
                .run(&RefinementRequest::new("high-grade glioma treated with TTFields"))
                .await
                .unwrap(),
        );

        assert_eq!(result.status, LoopStatus::Converged);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.query.as_str(), "\"glioma\" AND \"TTFields\"");
        assert_eq!(source.queries.lock().unwrap()[1], "\"glioma\" AND \"TTFields\"");
    }

    #[tokio::test]
    async fn test_oversized_budget_override_is_capped() {
        let source = Arc::new(ScriptedSource::sizes(&[5]));
        let refiner = Arc::new(FakeRefiner::new(Behavior::Drift));
        let engine = build(source.clone(), refiner, settings(3, 5, 20));

        let request =
            RefinementRequest::new("children with asthma").with_initial_iterations(u32::MAX);
        let result = completed(engine.run(&request).await.unwrap());

        assert_eq!(result.status, LoopStatus::Exhausted);
        assert_eq!(result.iterations, MAX_REQUEST_INITIAL_ITERATIONS + 5 + 1);
        assert_eq!(source.calls(), 26);
    }

    #[tokio::test]
    async fn test_iterations_are_numbered_in_order() {
        let source = Arc::new(ScriptedSource::sizes(&[1, 2, 3, 4]));
        let refiner = Arc::new(FakeRefiner::new(Behavior::Drift));
        let engine = build(source.clone(), refiner, settings(2, 2, 50));

        let result = completed(
            engine.run(&RefinementRequest::new("children with asthma")).await.unwrap(),
        );

        let numbers: Vec<u32> = result.history.iter().map(|r| r.iteration).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        // The returned query is the one whose documents are returned
        assert_eq!(result.history.last().unwrap().query, result.query);
    }
}
