//! Response synthesizer
//!
//! Mirrors the reasoner's prompt shape: the model is asked to summarize the
//! executed SQL and its rows, and the reply is held to the synthesizer JSON
//! schema before the `response` text is extracted.

use crate::models::query::ExecutionMetadata;
use crate::services::llm::client::{LlmClient, LlmError};
use crate::services::llm::prompts::PromptResources;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SynthesizerError {
    #[error("synthesizer returned invalid JSON: {0}")]
    InvalidSchema(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

pub struct ResponseSynthesizer {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptResources>,
}

impl ResponseSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptResources>) -> Self {
        Self { llm, prompts }
    }

    pub async fn synthesize(
        &self,
        query: &str,
        sql: &str,
        rows: &[Value],
        metadata: &ExecutionMetadata,
    ) -> Result<String, SynthesizerError> {
        let messages = self.build_messages(query, sql, rows, metadata);
        let payload = json!({ "messages": messages });
        tracing::info!(rows = rows.len(), "response synthesizer request");

        let result = self.llm.complete_json(&payload).await?;

        let errors: Vec<String> = self
            .prompts
            .synthesizer_validator
            .iter_errors(&result)
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(SynthesizerError::InvalidSchema(errors.join("; ")));
        }

        Ok(result.get("response").and_then(Value::as_str).unwrap_or_default().to_string())
    }

    fn build_messages(
        &self,
        query: &str,
        sql: &str,
        rows: &[Value],
        metadata: &ExecutionMetadata,
    ) -> Vec<Value> {
        let mut messages = vec![json!({
            "role": "system",
            "content": "You produce human friendly summaries using only provided rows. Output JSON only."
        })];
        for example in self.prompts.synthesizer_examples() {
            let user = json!({
                "query": example.get("user_query").cloned().unwrap_or(Value::Null),
                "sql": example.get("sql").cloned().unwrap_or(Value::Null),
                "rows": example.get("rows").cloned().unwrap_or(Value::Null),
                "metadata": example.get("metadata").cloned().unwrap_or(Value::Null),
            });
            messages.push(json!({"role": "user", "content": user.to_string()}));
            let assistant = json!({
                "response": example.get("expected_output").cloned().unwrap_or(Value::Null),
                "highlights": [],
            });
            messages.push(json!({"role": "assistant", "content": assistant.to_string()}));
        }
        let user = json!({ "query": query, "sql": sql, "rows": rows, "metadata": metadata });
        messages.push(json!({"role": "user", "content": user.to_string()}));
        messages
    }
}
