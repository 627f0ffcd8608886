//! Text-generation oracle abstraction
//!
//! The translator and refiner both consult a hosted language model. This
//! module hides the provider behind one narrow trait:
//! - Anthropic Messages API
//! - OpenAI-compatible chat completions (OpenAI, vLLM, LM Studio, ...)
//!
//! Providers apply a per-call timeout and retry transport failures with
//! exponential backoff. Interpreting the returned text is left to the
//! call sites in [`crate::refinement`].

mod anthropic;
mod openai;

pub use anthropic::AnthropicOracle;
pub use openai::OpenAiOracle;

use crate::config::OracleConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::{future::retry_notify, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A natural-language completion service
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send a single user prompt and return the model's text reply
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an oracle based on configuration
pub fn create_oracle(config: &OracleConfig) -> Result<Arc<dyn Oracle>> {
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AppError::Configuration {
            message: format!("API key required for oracle provider {}", config.provider),
        })?;

    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicOracle::new(api_key, config)?)),
        "openai" => Ok(Arc::new(OpenAiOracle::new(api_key, config)?)),
        other => Err(AppError::Configuration {
            message: format!("Unknown oracle provider: {}", other),
        }),
    }
}

/// Build the HTTP client shared by the providers
fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

/// Classify a failed send
fn send_error(err: reqwest::Error, timeout: Duration) -> AppError {
    if err.is_timeout() {
        AppError::OracleTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        AppError::Oracle {
            message: format!("Request failed: {}", err),
            status: None,
        }
    }
}

/// Run `call`, retrying retryable failures at most `max_retries` times
async fn with_retries<F, Fut>(model: &str, max_retries: u32, mut call: F) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let attempts = AtomicU32::new(0);
    let attempts = &attempts;

    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(250))
        .with_max_interval(Duration::from_secs(4))
        .with_max_elapsed_time(None)
        .build();

    retry_notify(
        policy,
        || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let fut = call();
            async move {
                match fut.await {
                    Ok(text) => Ok(text),
                    Err(e) if e.is_retryable() && attempt <= max_retries => {
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        },
        |err: AppError, wait: Duration| {
            tracing::warn!(
                model = model,
                attempt = attempts.load(Ordering::Relaxed),
                max_retries = max_retries,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "Oracle request failed, retrying"
            );
        },
    )
    .await
}
