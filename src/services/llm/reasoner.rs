//! Schema reasoner
//!
//! Sends the question and the schema slice to the LLM and validates the reply
//! twice: structurally against the reasoner JSON schema, then against the
//! slice itself so the model can only talk about tables and columns it was
//! shown.

use crate::models::schema::SchemaSlice;
use crate::services::llm::client::{LlmClient, LlmError};
use crate::services::llm::prompts::PromptResources;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ReasonerError {
    #[error("reasoner returned invalid schema: {0}")]
    InvalidSchema(String),

    #[error("reasoner referenced out-of-slice identifier: {0}")]
    OutOfBounds(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasonerOutput {
    #[serde(default)]
    pub query_intent: String,
    #[serde(default)]
    pub relevant_tables: Vec<String>,
    #[serde(default)]
    pub schema_context: BTreeMap<String, TableContext>,
    #[serde(default)]
    pub foreign_keys_map: Vec<[String; 4]>,
    #[serde(default)]
    pub performance_hints: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableContext {
    #[serde(default)]
    pub columns: Vec<String>,
}

pub struct LlmReasoner {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<PromptResources>,
}

impl LlmReasoner {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<PromptResources>) -> Self {
        Self { llm, prompts }
    }

    pub async fn reason(
        &self,
        query: &str,
        schema_slice: &SchemaSlice,
    ) -> Result<ReasonerOutput, ReasonerError> {
        let messages = self.build_messages(query, schema_slice);
        let payload = json!({ "messages": messages });
        tracing::info!(query, tables = schema_slice.tables.len(), "llm reasoner request");

        let result = self.llm.complete_json(&payload).await?;

        let errors: Vec<String> = self
            .prompts
            .reasoner_validator
            .iter_errors(&result)
            .map(|e| e.to_string())
            .collect();
        if !errors.is_empty() {
            let details = errors.join("; ");
            tracing::warn!(details = %details, "llm reasoner returned invalid JSON");
            return Err(ReasonerError::InvalidSchema(details));
        }

        let output: ReasonerOutput = serde_json::from_value(result)
            .map_err(|e| ReasonerError::InvalidSchema(e.to_string()))?;
        Self::enforce_schema_bounds(&output, schema_slice)?;
        Ok(output)
    }

    fn build_messages(&self, query: &str, schema_slice: &SchemaSlice) -> Vec<Value> {
        let mut messages = vec![json!({
            "role": "system",
            "content": "You are a schema reasoning engine. Respond with strict JSON only."
        })];
        for example in self.prompts.reasoner_examples() {
            let user = json!({
                "query": example.get("user_query").cloned().unwrap_or(Value::Null),
                "schema_slice": example.get("schema_slice").cloned().unwrap_or(Value::Null),
            });
            messages.push(json!({"role": "user", "content": user.to_string()}));
            let assistant =
                example.get("expected_output").cloned().unwrap_or(Value::Null).to_string();
            messages.push(json!({"role": "assistant", "content": assistant}));
        }
        let user = json!({ "query": query, "schema_slice": schema_slice });
        messages.push(json!({"role": "user", "content": user.to_string()}));
        messages
    }

    /// After structural validation: every table and column the model named
    /// must exist in the slice.
    fn enforce_schema_bounds(
        output: &ReasonerOutput,
        schema_slice: &SchemaSlice,
    ) -> Result<(), ReasonerError> {
        for table in &output.relevant_tables {
            if !schema_slice.tables.contains_key(table) {
                return Err(ReasonerError::OutOfBounds(format!("unknown table {table}")));
            }
        }
        for (table, context) in &output.schema_context {
            let Some(meta) = schema_slice.tables.get(table) else {
                return Err(ReasonerError::OutOfBounds(format!("unknown context table {table}")));
            };
            for column in &context.columns {
                if !meta.columns.contains_key(column) {
                    return Err(ReasonerError::OutOfBounds(format!(
                        "unknown column {table}.{column}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PromptsConfig;
    use crate::models::schema::{ColumnMeta, TableMeta};
    use crate::services::llm::client::EchoLlmClient;
    use async_trait::async_trait;

    struct StaticClient(Value);

    #[async_trait]
    impl LlmClient for StaticClient {
        async fn complete_json(&self, _prompt: &Value) -> Result<Value, LlmError> {
            Ok(self.0.clone())
        }
    }

    fn slice() -> SchemaSlice {
        let mut slice = SchemaSlice::default();
        let mut meta = TableMeta {
            schema: "public".to_string(),
            name: "claims".to_string(),
            ..Default::default()
        };
        for col in ["claim_id", "customer_id", "status"] {
            meta.columns.insert(col.to_string(), ColumnMeta::default());
        }
        slice.tables.insert("public.claims".to_string(), meta);
        slice
    }

    fn prompts() -> Arc<PromptResources> {
        Arc::new(PromptResources::load(&PromptsConfig::default()).expect("load prompts"))
    }

    #[tokio::test]
    async fn echo_round_trip_stays_in_bounds() {
        let reasoner = LlmReasoner::new(Arc::new(EchoLlmClient), prompts());
        let output = reasoner.reason("claims for customers", &slice()).await.expect("reason");
        assert_eq!(output.query_intent, "claims for customers");
        assert_eq!(output.relevant_tables, vec!["public.claims".to_string()]);
        let context = output.schema_context.get("public.claims").expect("context");
        assert_eq!(context.columns.len(), 3);
    }

    #[tokio::test]
    async fn rejects_structurally_invalid_reply() {
        let client = StaticClient(json!({"relevant_tables": "nope"}));
        let reasoner = LlmReasoner::new(Arc::new(client), prompts());
        let err = reasoner.reason("q", &slice()).await.expect_err("must fail");
        assert!(matches!(err, ReasonerError::InvalidSchema(_)));
    }

    #[tokio::test]
    async fn rejects_unknown_table() {
        let client = StaticClient(json!({
            "query_intent": "q",
            "relevant_tables": ["public.orders"],
            "schema_context": {},
            "foreign_keys_map": [],
            "performance_hints": []
        }));
        let reasoner = LlmReasoner::new(Arc::new(client), prompts());
        let err = reasoner.reason("q", &slice()).await.expect_err("must fail");
        assert!(matches!(err, ReasonerError::OutOfBounds(_)));
    }

    #[tokio::test]
    async fn rejects_unknown_column() {
        let client = StaticClient(json!({
            "query_intent": "q",
            "relevant_tables": ["public.claims"],
            "schema_context": {"public.claims": {"columns": ["not_a_column"]}},
            "foreign_keys_map": [],
            "performance_hints": []
        }));
        let reasoner = LlmReasoner::new(Arc::new(client), prompts());
        let err = reasoner.reason("q", &slice()).await.expect_err("must fail");
        assert!(matches!(err, ReasonerError::OutOfBounds(_)));
    }
}
