//! OpenAI-compatible chat completions client

use super::{http_client, send_error, with_retries, Oracle};
use crate::config::OracleConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat completions oracle client
pub struct OpenAiOracle {
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
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl OpenAiOracle {
    /// Create a new chat completions oracle
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

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    async fn make_request(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self.client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
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
        extract_content(&body)
    }
}

/// Extract `choices[0].message.content`, treating null content as a protocol failure
fn extract_content(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        AppError::OracleProtocol {
            message: format!("Failed to parse response: {}", e),
        }
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| AppError::OracleProtocol {
            message: "Empty response from oracle".to_string(),
        })
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let start = Instant::now();
        let result = with_retries(&self.model, self.max_retries, || self.make_request(prompt)).await;

        metrics::record_oracle(start.elapsed().as_secs_f64(), &self.model, result.is_ok());
        tracing::debug!(model = %self.model, ok = result.is_ok(), "Chat completion finished");

        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
