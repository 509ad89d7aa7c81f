//! OpenAI-compatible chat completions client (Groq, OpenAI, OpenRouter, Ollama...).

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{CompletionOptions, CompletionService};
use crate::config::LlmConfig;
use crate::error::ServiceError;

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    rate_limit_retries: u32,
    backoff_base: Duration,
    request_timeout_secs: u64,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        let endpoint = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );

        tracing::info!(
            endpoint = %endpoint,
            model = %config.model,
            "Creating OpenAI-compatible completion client"
        );

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            rate_limit_retries: config.rate_limit_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            request_timeout_secs: config.request_timeout_secs.max(1),
        })
    }

    async fn send_once(
        &self,
        instruction: &str,
        input: &str,
        options: &CompletionOptions,
    ) -> Result<reqwest::Response, ServiceError> {
        let request = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": instruction},
                {"role": "user", "content": input}
            ],
            "max_tokens": options.max_tokens.unwrap_or(self.max_tokens),
            "temperature": options.temperature.unwrap_or(self.temperature),
            "stream": false
        });

        self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    tracing::error!(endpoint = %self.endpoint, "Completion request timed out");
                    ServiceError::Timeout {
                        operation: "completion".to_string(),
                        seconds: self.request_timeout_secs,
                    }
                } else if e.is_connect() {
                    tracing::error!(endpoint = %self.endpoint, error = %e, "Connection failed");
                    ServiceError::Transport(format!("failed to connect to {}: {}", self.endpoint, e))
                } else {
                    tracing::error!(endpoint = %self.endpoint, error = %e, "Request failed");
                    ServiceError::Transport(format!("request to {} failed: {}", self.endpoint, e))
                }
            })
    }
}

/// Linear backoff: the n-th retry (1-based) waits n * base.
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base * retry
}

/// Pull the first choice's text out of a response body, rejecting HTML error
/// pages and anything that is not a chat completion.
fn extract_content(body: &str) -> Result<String, ServiceError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(ServiceError::Malformed(format!(
            "endpoint returned HTML instead of JSON: {}",
            preview
        )));
    }

    let parsed: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        ServiceError::Malformed(format!("invalid completion JSON ({}): {}", e, preview))
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ServiceError::Malformed("no choices returned from API".to_string()))
}

#[async_trait]
impl CompletionService for OpenAiCompatibleClient {
    async fn complete(
        &self,
        instruction: &str,
        input: &str,
        options: &CompletionOptions,
    ) -> Result<String, ServiceError> {
        if self.api_key.trim().is_empty() {
            return Err(ServiceError::Transport(
                "no API key configured (set RAG_LLM_API_KEY)".to_string(),
            ));
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            input_len = input.len(),
            "Sending completion request"
        );

        let mut retry = 0u32;
        loop {
            let response = self.send_once(instruction, input, options).await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if retry >= self.rate_limit_retries {
                    tracing::error!(attempts = retry + 1, "Completion rate limit budget exhausted");
                    return Err(ServiceError::RateLimited { attempts: retry + 1 });
                }
                retry += 1;
                let delay = backoff_delay(self.backoff_base, retry);
                tracing::warn!(retry, delay_ms = delay.as_millis() as u64, "Rate limited, backing off");
                tokio::time::sleep(delay).await;
                continue;
            }

            let body = response
                .text()
                .await
                .map_err(|e| ServiceError::Transport(format!("failed to read body: {}", e)))?;

            if !status.is_success() {
                tracing::error!(status = %status, "Completion API returned error");
                let preview: String = body.chars().take(300).collect();
                return Err(ServiceError::Transport(format!(
                    "API error ({}): {}",
                    status, preview
                )));
            }

            let content = extract_content(&body)?;
            tracing::debug!(chars = content.len(), "Completion received");
            return Ok(content);
        }
    }

    fn name(&self) -> String {
        format!("openai-compatible:{}", self.model)
    }
}
