//! Configuration management for MedSearch services
//!
//! Supports loading configuration from:
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Environment variables (prefixed with APP__)
//! - Conventional credential variables (PUBMED_EMAIL, ANTHROPIC_API_KEY, ...)
//! - Default values

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

pub use config::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// PubMed E-utilities configuration
    #[serde(default)]
    pub pubmed: PubMedConfig,

    /// Text-generation oracle configuration
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Refinement loop tuning
    #[serde(default)]
    pub refinement: RefinementConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PubMedConfig {
    /// E-utilities base URL
    #[serde(default = "default_pubmed_base_url")]
    pub base_url: String,

    /// Contact email sent with every request (required by NCBI)
    #[serde(default)]
    pub email: String,

    /// Optional NCBI API key (raises the rate limit)
    pub api_key: Option<String>,

    /// Tool name reported to NCBI
    #[serde(default = "default_pubmed_tool")]
    pub tool: String,

    /// Maximum identifiers fetched per search
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_pubmed_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OracleConfig {
    /// Oracle provider: anthropic, openai
    #[serde(default = "default_oracle_provider")]
    pub provider: String,

    /// API key for the oracle service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_oracle_model")]
    pub model: String,

    /// Maximum output tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,

    /// Extra attempts after a retryable failure
    #[serde(default = "default_oracle_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefinementConfig {
    /// Iterations before the soft budget check applies
    #[serde(default = "default_initial_iterations")]
    pub max_initial_iterations: u32,

    /// Extra iterations allowed while results stay below `min_results`
    #[serde(default = "default_additional_iterations")]
    pub max_additional_iterations: u32,

    /// Minimum fetched documents for an acceptable result
    #[serde(default = "default_min_results")]
    pub min_results: usize,

    /// Total matches above which the query is considered too broad
    #[serde(default = "default_broad_threshold")]
    pub broad_result_threshold: u64,

    /// Maximum documents handed to the refiner per iteration
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Terms kept when building the initial query
    #[serde(default = "default_initial_terms")]
    pub max_initial_terms: usize,

    /// Shortest raw question accepted before any oracle call
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,

    /// Translator implementation: oracle, keyword
    #[serde(default = "default_oracle_kind")]
    pub translator: String,

    /// Refiner implementation: oracle, heuristic
    #[serde(default = "default_oracle_kind")]
    pub refiner: String,

    /// Oracle round trips per refinement before giving up on an empty reply
    #[serde(default = "default_refine_attempts")]
    pub refine_attempts: u32,

    /// Fixed seed for document sampling (random when unset)
    pub sampler_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or filter directive (debug, info, medsearch_common=debug)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_max_concurrent() -> usize { 32 }
fn default_pubmed_base_url() -> String { "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string() }
fn default_pubmed_tool() -> String { "medsearch".to_string() }
fn default_page_size() -> usize { 50 }
fn default_pubmed_timeout() -> u64 { 10 }
fn default_oracle_provider() -> String { "anthropic".to_string() }
fn default_oracle_model() -> String { "claude-3-7-sonnet-20250219".to_string() }
fn default_max_tokens() -> u32 { 4000 }
fn default_temperature() -> f32 { 0.8 }
fn default_oracle_timeout() -> u64 { 60 }
fn default_oracle_retries() -> u32 { 2 }
fn default_initial_iterations() -> u32 { 3 }
fn default_additional_iterations() -> u32 { 5 }
fn default_min_results() -> usize { 20 }
fn default_broad_threshold() -> u64 { 500 }
fn default_sample_size() -> usize { 5 }
fn default_initial_terms() -> usize { 3 }
fn default_min_query_chars() -> usize { 10 }
fn default_oracle_kind() -> String { "oracle".to_string() }
fn default_refine_attempts() -> u32 { 2 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "medsearch".to_string() }
fn default_rate_limit() -> u32 { 5 }
fn default_burst() -> u32 { 10 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for PubMedConfig {
    fn default() -> Self {
        Self {
            base_url: default_pubmed_base_url(),
            email: String::new(),
            api_key: None,
            tool: default_pubmed_tool(),
            page_size: default_page_size(),
            timeout_secs: default_pubmed_timeout(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: default_oracle_provider(),
            api_key: None,
            api_base: None,
            model: default_oracle_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_oracle_timeout(),
            max_retries: default_oracle_retries(),
        }
    }
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_initial_iterations: default_initial_iterations(),
            max_additional_iterations: default_additional_iterations(),
            min_results: default_min_results(),
            broad_result_threshold: default_broad_threshold(),
            sample_size: default_sample_size(),
            max_initial_terms: default_initial_terms(),
            min_query_chars: default_min_query_chars(),
            translator: default_oracle_kind(),
            refiner: default_oracle_kind(),
            refine_attempts: default_refine_attempts(),
            sampler_seed: None,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            pubmed: PubMedConfig::default(),
            oracle: OracleConfig::default(),
            refinement: RefinementConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false));

        with_environment(builder)?.build()?.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let builder = Config::builder().add_source(File::with_name(path));

        with_environment(builder)?.build()?.try_deserialize()
    }

    /// Check cross-field requirements that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.pubmed.email.trim().is_empty() {
            return Err(configuration("pubmed.email is required (set PUBMED_EMAIL)"));
        }
        if self.pubmed.page_size == 0 {
            return Err(configuration("pubmed.page_size must be positive"));
        }
        if self.refinement.sample_size == 0 {
            return Err(configuration("refinement.sample_size must be positive"));
        }

        match self.refinement.translator.as_str() {
            "oracle" | "keyword" => {}
            other => return Err(configuration(&format!("unknown translator: {}", other))),
        }
        match self.refinement.refiner.as_str() {
            "oracle" | "heuristic" => {}
            other => return Err(configuration(&format!("unknown refiner: {}", other))),
        }

        if self.uses_oracle() {
            match self.oracle.provider.as_str() {
                "anthropic" | "openai" => {}
                other => return Err(configuration(&format!("unknown oracle provider: {}", other))),
            }
            let has_key = self
                .oracle
                .api_key
                .as_deref()
                .map_or(false, |k| !k.trim().is_empty());
            if !has_key {
                return Err(configuration("oracle.api_key is required for oracle-backed translation or refinement"));
            }
        }

        Ok(())
    }

    /// Whether any refinement stage talks to the oracle
    pub fn uses_oracle(&self) -> bool {
        self.refinement.translator == "oracle" || self.refinement.refiner == "oracle"
    }
}

/// Environment layers shared by every loader
fn with_environment(
    builder: ConfigBuilder<DefaultState>,
) -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
    let oracle_key = match std::env::var("APP__ORACLE__PROVIDER").as_deref() {
        Ok("openai") => std::env::var("OPENAI_API_KEY").ok(),
        _ => std::env::var("ANTHROPIC_API_KEY").ok(),
    };

    builder
        // Load from environment variables with APP__ prefix
        // e.g., APP__REFINEMENT__MIN_RESULTS=30
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
        )

        // Conventional credential variables win over everything else
        .set_override_option("pubmed.email", std::env::var("PUBMED_EMAIL").ok())?
        .set_override_option("pubmed.api_key", std::env::var("NCBI_API_KEY").ok())?
        .set_override_option("oracle.api_key", oracle_key)?
        .set_override_option("observability.log_level", std::env::var("LOG_LEVEL").ok())
}

fn configuration(message: &str) -> AppError {
    AppError::Configuration {
        message: message.to_string(),
    }
}
