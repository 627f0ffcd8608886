//! Search handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;
use validator::Validate;

use crate::AppState;
use medsearch_common::{
    errors::{AppError, Result},
    LoopResult, RefinementOutcome, RefinementRequest,
};

/// Search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    /// Clinical question in free text
    #[serde(alias = "picott_text")]
    #[validate(length(min = 1, max = 2000))]
    pub text: String,

    /// Overrides the configured initial iteration budget
    #[serde(default, alias = "max_iterations")]
    #[validate(range(min = 0, max = 20))]
    pub max_initial_iterations: Option<u32>,
}

/// Search response
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResultItem>,
    pub total_results: usize,
    pub iterations: u32,
    pub status: String,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    pub id: String,
    pub text: String,
}

impl SearchResponse {
    fn from_result(result: LoopResult, processing_time_ms: u64) -> Self {
        let total_results = result.total_results();
        Self {
            query: result.query.into_string(),
            results: result
                .documents
                .documents
                .into_iter()
                .map(|d| SearchResultItem {
                    id: d.id,
                    text: d.text,
                })
                .collect(),
            total_results,
            iterations: result.iterations,
            status: result.status.as_str().to_string(),
            processing_time_ms,
        }
    }
}

/// Refine a clinical question into a PubMed query and return its results
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let refinement = RefinementRequest {
        text: request.text,
        max_initial_iterations: request.max_initial_iterations,
    };

    // Each source and oracle call carries its own timeout; the run itself
    // is bounded by the iteration budgets.
    let outcome = state.engine.run(&refinement).await?;

    let result = match outcome {
        RefinementOutcome::Rejected { reason } => {
            return Err(AppError::QueryRejected { reason });
        }
        RefinementOutcome::Completed(result) => result,
    };

    let elapsed = start.elapsed().as_millis() as u64;
    info!(
        query = %result.query,
        total_results = result.total_results(),
        iterations = result.iterations,
        status = result.status.as_str(),
        processing_time_ms = elapsed,
        "Search completed"
    );

    Ok(Json(SearchResponse::from_result(result, elapsed)))
}
