//! Anthropic Messages API client

use super::{http_client, send_error, with_retries, Oracle};
use crate::config::OracleConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic oracle client
pub struct AnthropicOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    max_retries: u32,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<MessageParam<'a>>,
}

#[derive(Serialize)]
struct MessageParam<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicOracle {
    /// Create a new Anthropic oracle
    pub fn new(api_key: String, config: &OracleConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);

        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model: config.model.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout,
            max_retries: config.max_retries,
        })
    }

    /// Resolve the messages endpoint from the base URL
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/messages") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/messages", base)
        } else {
            format!("{}/v1/messages", base)
        }
    }

    async fn make_request(&self, prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![MessageParam {
                role: "user",
                content: prompt,
            }],
        };

        let response = self.client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Oracle {
                message: format!("API error {}: {}", status, body),
                status: Some(status.as_u16()),
            });
        }

        let body = response.text().await.map_err(|e| send_error(e, self.timeout))?;
        extract_text(&body)
    }
}

/// Pull the first text block out of a Messages API response body
fn extract_text(body: &str) -> Result<String> {
    let parsed: MessagesResponse = serde_json::from_str(body).map_err(|e| {
        AppError::OracleProtocol {
            message: format!("Failed to parse response: {}", e),
        }
    })?;

    parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .find_map(|block| block.text)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| AppError::OracleProtocol {
            message: "Response contained no text block".to_string(),
        })
}

#[async_trait]
impl Oracle for AnthropicOracle {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let start = Instant::now();
        let result = with_retries(&self.model, self.max_retries, || self.make_request(prompt)).await;

        metrics::record_oracle(start.elapsed().as_secs_f64(), &self.model, result.is_ok());
        tracing::debug!(model = %self.model, ok = result.is_ok(), "Anthropic completion finished");

        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
