//! Text-generation provider abstraction and implementations.
//!
//! Defines the [`CompletionProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: always fails; used when no LLM is configured.
//! - **[`OpenAIChatProvider`]**: calls an OpenAI-compatible chat completions endpoint.
//! - **[`OllamaChatProvider`]**: calls a local Ollama instance's `/api/chat` endpoint.
//!
//! Providers make exactly one request per call. Retrying is the job of
//! [`complete_with_retry`], which drives any provider through a
//! [`RetryPolicy`].
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: `base_delay * 2^(n-1)` before retry `n`, capped at `max_delay`

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;

/// Why a single completion request failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompletionError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    #[error("request rejected {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("completion provider is disabled")]
    Disabled,
}

impl CompletionError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::RateLimited(_)
                | CompletionError::Server { .. }
                | CompletionError::Network(_)
        )
    }

    fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 {
            CompletionError::RateLimited(body)
        } else if status.is_server_error() {
            CompletionError::Server {
                status: status.as_u16(),
                body,
            }
        } else {
            CompletionError::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }
}

/// A chat-style text generation backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Send one system + user message pair and return the assistant text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, CompletionError>;
}

// ============ Retry ============

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay to wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}

/// Final result of a retried completion along with how many requests were sent.
#[derive(Debug)]
pub struct CompletionOutcome {
    pub attempts: u32,
    pub result: Result<String, CompletionError>,
}

/// Call `provider` until it succeeds, returns a non-retryable error, or the
/// policy's retry budget is spent. Attempts are strictly sequential.
pub async fn complete_with_retry(
    provider: &dyn CompletionProvider,
    policy: &RetryPolicy,
    system: &str,
    prompt: &str,
) -> CompletionOutcome {
    let mut attempts = 0;
    let mut last_err = CompletionError::Disabled;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            tracing::debug!(
                model = provider.model_name(),
                retry = attempt,
                delay_ms = delay.as_millis() as u64,
                "backing off before retry"
            );
            tokio::time::sleep(delay).await;
        }

        attempts += 1;
        match provider.complete(system, prompt).await {
            Ok(text) => {
                return CompletionOutcome {
                    attempts,
                    result: Ok(text),
                }
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    model = provider.model_name(),
                    attempt = attempts,
                    error = %e,
                    "completion attempt failed"
                );
                last_err = e;
            }
            Err(e) => {
                tracing::warn!(
                    model = provider.model_name(),
                    attempt = attempts,
                    error = %e,
                    "completion failed, not retrying"
                );
                return CompletionOutcome {
                    attempts,
                    result: Err(e),
                };
            }
        }
    }

    CompletionOutcome {
        attempts,
        result: Err(last_err),
    }
}

// ============ Disabled Provider ============

/// A provider that refuses every request.
///
/// Used when `llm.provider = "disabled"`, or when a configured provider
/// cannot be built. Callers of the tag generator then receive fallback tags.
pub struct DisabledProvider;

#[async_trait]
impl CompletionProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, CompletionError> {
        Err(CompletionError::Disabled)
    }
}

// ============ OpenAI Provider ============

/// Chat completions against the OpenAI API or any compatible server.
///
/// Calls `POST {url}/v1/chat/completions`. The bearer key is read from the
/// environment variable named by `llm.api_key_env` when the provider is built.
pub struct OpenAIChatProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    temperature: f32,
}

impl OpenAIChatProvider {
    /// # Errors
    ///
    /// Returns an error if `model` is not set, the API key variable is not
    /// in the environment, or the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;

        let api_key = match std::env::var(&config.api_key_env) {
            Ok(k) if !k.trim().is_empty() => k,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            api_key,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAIChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status, body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;
        parse_openai_response(&json)
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn parse_openai_response(json: &serde_json::Value) -> Result<String, CompletionError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            CompletionError::InvalidResponse("missing choices[0].message.content".to_string())
        })
}

// ============ Ollama Provider ============

/// Chat against a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaChatProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
}

impl OllamaChatProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            model,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionProvider for OllamaChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt },
            ],
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                CompletionError::Network(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status, body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| CompletionError::InvalidResponse("missing message.content".to_string()))
    }
}

/// Create the appropriate [`CompletionProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIChatProvider`] |
/// | `"ollama"` | [`OllamaChatProvider`] |
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIChatProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaChatProvider::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
