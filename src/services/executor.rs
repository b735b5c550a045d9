//! Query executor
//!
//! Runs the sanitized SELECT under the statement timeout, fetching the result
//! set as JSON rows through an aggregating CTE, and truncates the sample to
//! the configured limit.

use crate::config::PostgresConfig;
use crate::models::query::ExecutionMetadata;
use serde_json::Value;
use sqlx::PgConnection;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: &'static str,
    pub data: Vec<Value>,
    pub metadata: ExecutionMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("query execution timed out")]
    Timeout,

    #[error("query execution failed: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct QueryExecutor {
    cfg: PostgresConfig,
}

impl QueryExecutor {
    pub fn new(cfg: PostgresConfig) -> Self {
        Self { cfg }
    }

    pub async fn execute_sql(
        &self,
        conn: &mut PgConnection,
        sql: &str,
    ) -> Result<ExecutionResult, ExecutionError> {
        let timeout = Duration::from_millis(self.cfg.statement_timeout_ms);
        let wrapped = format!(
            "WITH q AS ({}) SELECT COALESCE(JSON_AGG(q.*), '[]'::json) AS data FROM q",
            sql.trim_end_matches(';')
        );
        tracing::info!(sql, "execute_sql");

        let fetched: Value = tokio::time::timeout(
            timeout,
            sqlx::query_scalar(&wrapped).fetch_one(&mut *conn),
        )
        .await
        .map_err(|_| ExecutionError::Timeout)??;

        let rows = match fetched {
            Value::Array(rows) => rows,
            _ => Vec::new(),
        };
        Ok(Self::truncate(rows, self.cfg.sample_limit))
    }

    fn truncate(rows: Vec<Value>, sample_limit: usize) -> ExecutionResult {
        let total = rows.len();
        let data: Vec<Value> = rows.into_iter().take(sample_limit).collect();
        let metadata =
            ExecutionMetadata { rows_returned: data.len(), truncated: total > data.len() };
        ExecutionResult { status: "success", data, metadata }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truncates_to_sample_limit() {
        let rows: Vec<Value> = (0..10).map(|i| json!({"id": i})).collect();
        let result = QueryExecutor::truncate(rows, 3);
        assert_eq!(result.status, "success");
        assert_eq!(result.data.len(), 3);
        assert_eq!(result.metadata.rows_returned, 3);
        assert!(result.metadata.truncated);
    }

    #[test]
    fn small_result_is_not_truncated() {
        let rows: Vec<Value> = (0..2).map(|i| json!({"id": i})).collect();
        let result = QueryExecutor::truncate(rows, 3);
        assert_eq!(result.metadata.rows_returned, 2);
        assert!(!result.metadata.truncated);
    }

    #[test]
    fn empty_result_is_well_formed() {
        let result = QueryExecutor::truncate(Vec::new(), 3);
        assert!(result.data.is_empty());
        assert_eq!(result.metadata.rows_returned, 0);
        assert!(!result.metadata.truncated);
    }
}
