//! Query API request/response types

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Body of `POST /query`
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct QueryRequest {
    /// Natural-language question
    #[validate(length(min = 1, message = "query must not be empty"))]
    pub query: String,
    /// Rate-limit key; "anonymous" when absent
    #[serde(default)]
    pub user_id: Option<String>,
    /// Force a fresh schema snapshot before answering
    #[serde(default)]
    pub refresh_schema: bool,
}

impl QueryRequest {
    pub fn user_key(&self) -> &str {
        self.user_id.as_deref().unwrap_or("anonymous")
    }
}

/// Successful answer for `POST /query`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryResponse {
    pub answer: String,
    /// Sanitized SQL that was actually executed
    pub sql: String,
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<serde_json::Value>,
    pub metadata: ExecutionMetadata,
}

/// Execution summary attached to the response and the audit trail
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct ExecutionMetadata {
    pub rows_returned: usize,
    /// True when the result set was cut at the sample limit
    pub truncated: bool,
}
