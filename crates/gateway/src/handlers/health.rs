//! Health check handlers

use crate::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub source: String,
    pub translator: String,
    pub refiner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_model: Option<String>,
    pub budgets: BudgetSummary,
}

#[derive(Serialize)]
pub struct BudgetSummary {
    pub max_initial_iterations: u32,
    pub max_additional_iterations: u32,
    pub min_results: usize,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: medsearch_common::VERSION.to_string(),
    })
}

/// Readiness probe - summarizes the wired pipeline
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let settings = state.engine.settings();

    Json(ReadyResponse {
        status: "ready".to_string(),
        source: state.engine.source_name().to_string(),
        translator: settings.translator.clone(),
        refiner: settings.refiner.clone(),
        oracle_model: state
            .config
            .uses_oracle()
            .then(|| state.config.oracle.model.clone()),
        budgets: BudgetSummary {
            max_initial_iterations: settings.max_initial_iterations,
            max_additional_iterations: settings.max_additional_iterations,
            min_results: settings.min_results,
        },
    })
}
