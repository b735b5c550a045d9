//! LLM client - HTTP client for OpenAI-compatible chat completion APIs
//!
//! A single operation, `complete_json`, takes a `{messages: [...]}` prompt and
//! returns the model's reply parsed as JSON. The real transport retries
//! transient failures with bounded exponential backoff; the echo client is a
//! deterministic offline stand-in that builds a valid reasoner or synthesizer
//! reply from its own input.

use crate::config::{LlmConfig, RetryConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// LLM transport errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM response parsing error: {0}")]
    Parse(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("Unsupported LLM provider: {0}")]
    UnsupportedProvider(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_) | Self::Api(_))
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete_json(&self, prompt: &Value) -> Result<Value, LlmError>;
}

/// Select the transport: a configured API key picks the real client, an empty
/// key the offline echo client.
pub fn build_llm_client(cfg: &LlmConfig, api_key: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
    if cfg.provider.to_lowercase() != "openai" {
        return Err(LlmError::UnsupportedProvider(cfg.provider.clone()));
    }
    if api_key.is_empty() {
        tracing::warn!("LLM_API_KEY not set, using offline echo client");
        return Ok(Arc::new(EchoLlmClient));
    }
    Ok(Arc::new(OpenAiClient::new(cfg.clone(), api_key.to_string())))
}

// ============================================================================
// OpenAI transport
// ============================================================================

pub struct OpenAiClient {
    cfg: LlmConfig,
    api_key: String,
    retry: RetryConfig,
    http_client: Client,
}

impl OpenAiClient {
    pub fn new(cfg: LlmConfig, api_key: String) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        let retry = cfg.reasoner_retry_config;
        Self { cfg, api_key, retry, http_client }
    }

    async fn try_complete(&self, prompt: &Value) -> Result<Value, LlmError> {
        let mut body = json!({
            "model": self.cfg.model,
            "response_format": {"type": "json_object"},
            "temperature": self.cfg.temperature,
            "max_tokens": self.cfg.max_tokens,
        });
        if let (Value::Object(dst), Value::Object(src)) = (&mut body, prompt) {
            for (key, value) in src {
                dst.insert(key.clone(), value.clone());
            }
        }

        let response = self
            .http_client
            .post(CHAT_COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() { LlmError::Timeout(30) } else { LlmError::Api(e.to_string()) }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }
        if !status.is_success() {
            let error_text =
                response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Api(format!("LLM HTTP {status}: {error_text}")));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let content = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_ref())
            .ok_or_else(|| LlmError::Parse("Empty response from LLM".to_string()))?;

        serde_json::from_str(content)
            .map_err(|_| LlmError::Parse("LLM did not return valid JSON".to_string()))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.retry.backoff_seconds * 2f64.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(exp.clamp(1.0, 5.0))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete_json(&self, prompt: &Value) -> Result<Value, LlmError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_complete(prompt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.attempts && e.is_retryable() => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_s = delay.as_secs_f64(),
                        "LLM call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// ============================================================================
// Echo transport (offline)
// ============================================================================

/// Deterministic offline collaborator. Given a reasoner prompt it answers
/// with the slice tables and the first five columns of each; given a
/// synthesizer prompt it reports the row count.
pub struct EchoLlmClient;

#[async_trait]
impl LlmClient for EchoLlmClient {
    async fn complete_json(&self, prompt: &Value) -> Result<Value, LlmError> {
        let Some(messages) = prompt.get("messages").and_then(Value::as_array) else {
            return Ok(json!({}));
        };
        let Some(content) = messages.last().and_then(|m| m.get("content")).and_then(Value::as_str)
        else {
            return Ok(json!({}));
        };
        let Ok(payload) = serde_json::from_str::<Value>(content) else {
            return Ok(json!({}));
        };

        if let Some(slice) = payload.get("schema_slice") {
            let tables = slice.get("tables").and_then(Value::as_object);
            let mut relevant_tables = Vec::new();
            let mut schema_context = serde_json::Map::new();
            if let Some(tables) = tables {
                for (table_name, meta) in tables {
                    relevant_tables.push(Value::String(table_name.clone()));
                    let columns: Vec<Value> = meta
                        .get("columns")
                        .and_then(Value::as_object)
                        .map(|cols| {
                            cols.keys().take(5).map(|c| Value::String(c.clone())).collect()
                        })
                        .unwrap_or_default();
                    schema_context
                        .insert(table_name.clone(), json!({"columns": columns}));
                }
            }
            return Ok(json!({
                "query_intent": payload.get("query").and_then(Value::as_str).unwrap_or(""),
                "relevant_tables": relevant_tables,
                "schema_context": schema_context,
                "foreign_keys_map": slice.get("foreign_keys").cloned().unwrap_or(json!([])),
                "performance_hints": [],
            }));
        }

        if let Some(rows) = payload.get("rows").and_then(Value::as_array) {
            return Ok(json!({
                "response": format!("Returned {} rows.", rows.len()),
                "highlights": [],
            }));
        }

        Ok(payload)
    }
}
