//! MedSearch API Gateway
//!
//! HTTP entry point for query refinement.
//! Handles:
//! - Request validation and routing
//! - Rate limiting and concurrency limits
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use medsearch_common::{
    config::{AppConfig, ObservabilityConfig},
    create_refinement_loop, metrics, RefinementLoop,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Arc<RefinementLoop>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting MedSearch API Gateway v{}",
        medsearch_common::VERSION
    );

    config.validate().map_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        e
    })?;
    let config = Arc::new(config);

    // Initialize metrics
    init_metrics(&config.observability)?;

    let engine = Arc::new(create_refinement_loop(&config)?);
    info!(
        source = engine.source_name(),
        translator = %config.refinement.translator,
        refiner = %config.refinement.refiner,
        "Refinement engine ready"
    );

    let state = AppState {
        config: config.clone(),
        engine,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Structured logging; `RUST_LOG` takes precedence over the configured level
fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Prometheus scrape endpoint on its own port
fn init_metrics(config: &ObservabilityConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.metrics_port == 0 {
        warn!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.metrics_port)))
        .set_buckets_for_metric(
            Matcher::Suffix("request_duration_seconds".to_string()),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("search_duration_seconds".to_string()),
            metrics::UPSTREAM_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("oracle_duration_seconds".to_string()),
            metrics::UPSTREAM_BUCKETS,
        )?
        .install()?;

    metrics::register_metrics();
    info!(port = config.metrics_port, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut api_routes = Router::new()
        .route("/search", post(handlers::search::search))
        .route_layer(from_fn(middleware::metrics::track_metrics));

    let rate_limit = &state.config.rate_limit;
    if rate_limit.enabled {
        let limiter = middleware::rate_limit::RateLimit::new(
            rate_limit.requests_per_second,
            rate_limit.burst,
        );
        api_routes = api_routes.layer(from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    let max_concurrent = state.config.server.max_concurrent_requests;

    // Compose the app
    Router::new()
        // Health endpoints (not rate limited)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api", api_routes)
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrent))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use medsearch_common::config::RefinementConfig;
    use medsearch_common::refinement::{
        Evidence, HeuristicRefiner, KeywordTranslator, LeadingSampler, NormalizedQuery,
        QueryRefiner, SearchQuery,
    };
    use medsearch_common::{AppError, Document, DocumentSet, LiteratureSource};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    /// Returns `size` documents for every query
    struct FixedSource {
        size: usize,
    }

    #[async_trait]
    impl LiteratureSource for FixedSource {
        async fn search(&self, _query: &str) -> medsearch_common::Result<DocumentSet> {
            let documents = (0..self.size)
                .map(|i| Document::new(format!("{}", 30_000_000 + i), format!("abstract {}", i)))
                .collect();
            Ok(DocumentSet::new(documents, Some(self.size as u64)))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    /// Sleeps before every search, then finds nothing
    struct SlowEmptySource {
        delay: Duration,
    }

    #[async_trait]
    impl LiteratureSource for SlowEmptySource {
        async fn search(&self, _query: &str) -> medsearch_common::Result<DocumentSet> {
            tokio::time::sleep(self.delay).await;
            Ok(DocumentSet::empty())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// Fails the way an oracle refiner does when no reply is usable
    struct BrokenRefiner;

    #[async_trait]
    impl QueryRefiner for BrokenRefiner {
        async fn refine(
            &self,
            _current: &SearchQuery,
            _evidence: &Evidence<'_>,
            _original: &NormalizedQuery,
        ) -> medsearch_common::Result<SearchQuery> {
            Err(AppError::OracleProtocol {
                message: "reply had no query line: 'I cannot help with that'".to_string(),
            })
        }
    }

    fn test_app(size: usize) -> Router {
        app_with(Arc::new(FixedSource { size }), None)
    }

    fn app_with(
        source: Arc<dyn LiteratureSource>,
        refiner: Option<Arc<dyn QueryRefiner>>,
    ) -> Router {
        let mut config = AppConfig::default();
        config.refinement.translator = "keyword".to_string();
        config.refinement.refiner = "heuristic".to_string();
        config.rate_limit.enabled = false;

        let settings = RefinementConfig {
            min_results: 20,
            ..config.refinement.clone()
        };
        let refiner: Arc<dyn QueryRefiner> = match refiner {
            Some(refiner) => refiner,
            None => Arc::new(HeuristicRefiner::new(
                settings.min_results,
                settings.broad_result_threshold,
            )),
        };
        let engine = RefinementLoop::new(
            Arc::new(KeywordTranslator::new(settings.min_query_chars)),
            source,
            refiner,
            Arc::new(LeadingSampler),
            settings,
        );

        create_router(AppState {
            config: Arc::new(config),
            engine: Arc::new(engine),
        })
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_search_converges() {
        let (status, body) = post_json(
            test_app(25),
            "/api/search",
            json!({ "text": "Patients with high-grade glioma treated with TTFields" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "converged");
        assert_eq!(body["total_results"], 25);
        assert_eq!(body["iterations"], 1);
        assert_eq!(body["query"], "Patients high-grade glioma");
        assert_eq!(body["results"][0]["id"], "30000000");
    }

    #[tokio::test]
    async fn test_search_accepts_legacy_field_names() {
        let (status, body) = post_json(
            test_app(25),
            "/api/search",
            json!({ "picott_text": "children with asthma on inhaled steroids", "max_iterations": 1 }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "converged");
    }

    #[tokio::test]
    async fn test_rejected_question_is_unprocessable() {
        let (status, body) =
            post_json(test_app(25), "/api/search", json!({ "text": "ab" })).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "QUERY_REJECTED");
    }

    #[tokio::test]
    async fn test_no_evidence_is_exhausted_not_rejected() {
        let (status, body) = post_json(
            test_app(0),
            "/api/search",
            json!({ "text": "children with asthma on inhaled steroids" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "exhausted");
        assert_eq!(body["total_results"], 0);
        assert_eq!(body["results"], json!([]));
        assert_eq!(body["iterations"], 9);
        assert!(body.get("error").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_searches_run_to_completion() {
        let source = Arc::new(SlowEmptySource {
            delay: Duration::from_secs(15),
        });
        let (status, body) = post_json(
            app_with(source, None),
            "/api/search",
            json!({ "text": "children with asthma on inhaled steroids" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "exhausted");
        assert_eq!(body["iterations"], 9);
    }

    #[tokio::test]
    async fn test_refiner_failure_hides_cause() {
        let (status, body) = post_json(
            app_with(Arc::new(FixedSource { size: 0 }), Some(Arc::new(BrokenRefiner))),
            "/api/search",
            json!({ "text": "children with asthma on inhaled steroids" }),
        )
        .await;

        assert!(status.is_server_error());
        assert_eq!(body["error"]["code"], "ORACLE_PROTOCOL_ERROR");
        let message = body["error"]["message"].as_str().unwrap();
        assert!(!message.contains("cannot help"));
        assert!(!message.contains("query line"));
    }

    #[tokio::test]
    async fn test_invalid_budget_is_bad_request() {
        let (status, body) = post_json(
            test_app(25),
            "/api/search",
            json!({ "text": "children with asthma", "max_initial_iterations": 99 }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_app(0)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_reports_configuration() {
        let response = test_app(0)
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["source"], "fixed");
        assert_eq!(body["translator"], "keyword");
    }
}
