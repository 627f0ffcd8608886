//! Query refinement engine
//!
//! Turns a free-text clinical question into a PubMed query and improves it
//! over several search rounds:
//! - Translation and validation of the raw question
//! - Deterministic initial query construction
//! - Evidence sampling and term extraction
//! - Oracle-backed or heuristic refinement
//! - The bounded refinement loop itself

mod controller;
mod model;
mod query;
mod refiner;
mod sampler;
mod terms;
mod translator;

pub use controller::{
    IterationRecord, LoopResult, LoopStatus, RefinementLoop, RefinementOutcome,
    RefinementRequest, MAX_REQUEST_INITIAL_ITERATIONS,
};
pub use model::{NormalizedQuery, SearchQuery};
pub use query::build_initial_query;
pub use refiner::{Evidence, HeuristicRefiner, OracleRefiner, QueryRefiner};
pub use sampler::{DocumentSampler, LeadingSampler, RandomSampler};
pub use terms::extract_terms;
pub use translator::{KeywordTranslator, OracleTranslator, QueryTranslator, Translation};

use crate::config::AppConfig;
use crate::errors::Result;
use crate::literature::{LiteratureSource, PubMedSource};
use crate::oracle::{create_oracle, Oracle};
use std::sync::Arc;
use tracing::info;

/// Build the production loop: PubMed plus the configured oracle, if any
pub fn create_refinement_loop(config: &AppConfig) -> Result<RefinementLoop> {
    let source: Arc<dyn LiteratureSource> = Arc::new(PubMedSource::new(&config.pubmed)?);
    let oracle = if config.uses_oracle() {
        let oracle = create_oracle(&config.oracle)?;
        info!(model = oracle.model_name(), "Oracle client ready");
        Some(oracle)
    } else {
        None
    };

    build_refinement_loop(config, source, oracle)
}

/// Assemble a refinement loop from configuration.
///
/// `oracle` is only consulted when the configured translator or refiner
/// is oracle-backed.
pub fn build_refinement_loop(
    config: &AppConfig,
    source: Arc<dyn LiteratureSource>,
    oracle: Option<Arc<dyn Oracle>>,
) -> Result<RefinementLoop> {
    let settings = &config.refinement;
    let missing_oracle = || crate::errors::AppError::Configuration {
        message: "an oracle is required for the configured translator/refiner".to_string(),
    };

    let translator: Arc<dyn QueryTranslator> = match settings.translator.as_str() {
        "keyword" => Arc::new(KeywordTranslator::new(settings.min_query_chars)),
        _ => Arc::new(OracleTranslator::new(
            oracle.clone().ok_or_else(missing_oracle)?,
            settings.min_query_chars,
        )),
    };

    let refiner: Arc<dyn QueryRefiner> = match settings.refiner.as_str() {
        "heuristic" => Arc::new(HeuristicRefiner::new(
            settings.min_results,
            settings.broad_result_threshold,
        )),
        _ => Arc::new(OracleRefiner::new(
            oracle.ok_or_else(missing_oracle)?,
            settings.min_results,
            settings.broad_result_threshold,
            settings.refine_attempts,
        )),
    };

    let sampler: Arc<dyn DocumentSampler> = match settings.sampler_seed {
        Some(seed) => Arc::new(RandomSampler::seeded(seed)),
        None => Arc::new(RandomSampler::from_entropy()),
    };

    Ok(RefinementLoop::new(
        translator,
        source,
        refiner,
        sampler,
        settings.clone(),
    ))
}
