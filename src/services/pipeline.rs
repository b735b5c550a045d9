//! Query pipeline orchestrator
//!
//! Sequences the full request lifecycle: admission, schema snapshot (cache or
//! extractor under the schema lock), ranking, slicing, reasoning, SQL
//! generation, validation, guardrails, execution, synthesis, audit. Each
//! stage's latency lands in the stage histogram and every outcome in the
//! request counter.

use crate::config::SchemaConfig;
use crate::models::query::{QueryRequest, QueryResponse};
use crate::models::schema::SchemaSnapshot;
use crate::observability::{StageTimer, record_request};
use crate::services::audit::AuditLogger;
use crate::services::cache::CacheClient;
use crate::services::executor::{ExecutionError, QueryExecutor};
use crate::services::guardrails::GuardrailEngine;
use crate::services::llm::reasoner::{LlmReasoner, ReasonerError};
use crate::services::llm::synthesizer::{ResponseSynthesizer, SynthesizerError};
use crate::services::rate_limiter::RateLimiter;
use crate::services::schema_extractor::SchemaExtractor;
use crate::services::schema_ranker::SchemaRanker;
use crate::services::schema_slicer::select_schema_slice;
use crate::services::sql_generator::SqlGenerator;
use crate::services::sql_validator::{SqlValidationError, SqlValidator};
use serde_json::json;
use sqlx::PgConnection;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA_CACHE_KEY: &str = "schema_snapshot";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("schema snapshot unavailable: {0}")]
    SchemaUnavailable(#[source] sqlx::Error),

    #[error("SQL generator returned no plans")]
    GenerationEmpty,

    #[error(transparent)]
    Validation(#[from] SqlValidationError),

    #[error("guardrails rejected query")]
    GuardrailRejected,

    #[error("EXPLAIN failed: {0}")]
    Explain(#[source] sqlx::Error),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Reasoner(#[from] ReasonerError),

    #[error(transparent)]
    Synthesizer(#[from] SynthesizerError),
}

impl PipelineError {
    /// Pipeline stage to attach to structured logs.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "rate_limit",
            Self::SchemaUnavailable(_) => "schema",
            Self::Reasoner(_) => "reasoner",
            Self::GenerationEmpty => "sql_generation",
            Self::Validation(_) => "validation",
            Self::GuardrailRejected | Self::Explain(_) => "guardrails",
            Self::Execution(_) => "execution",
            Self::Synthesizer(_) => "synthesis",
        }
    }
}

pub struct PipelineComponents {
    pub schema_extractor: Arc<SchemaExtractor>,
    pub schema_ranker: Arc<SchemaRanker>,
    pub reasoner: Arc<LlmReasoner>,
    pub sql_generator: Arc<SqlGenerator>,
    pub sql_validator: Arc<SqlValidator>,
    pub guardrail_engine: Arc<GuardrailEngine>,
    pub executor: Arc<QueryExecutor>,
    pub synthesizer: Arc<ResponseSynthesizer>,
    pub cache: Arc<CacheClient>,
    pub audit: Arc<AuditLogger>,
    pub rate_limiter: Arc<RateLimiter>,
}

pub struct QueryPipeline {
    schema_cfg: SchemaConfig,
    parts: PipelineComponents,
    /// Serializes extractor calls across concurrent cache misses; the
    /// extractor's own lock already single-flights, both are kept.
    schema_lock: Mutex<()>,
}

impl QueryPipeline {
    pub fn new(schema_cfg: SchemaConfig, parts: PipelineComponents) -> Self {
        Self { schema_cfg, parts, schema_lock: Mutex::new(()) }
    }

    pub async fn handle(
        &self,
        conn: &mut PgConnection,
        request: &QueryRequest,
    ) -> Result<QueryResponse, PipelineError> {
        let user_key = request.user_key();
        if !self.parts.rate_limiter.allow(user_key).await {
            record_request("rate_limited");
            return Err(PipelineError::RateLimitExceeded);
        }

        match self.process(conn, request, user_key).await {
            Ok(response) => Ok(response),
            Err(err) => {
                match err {
                    PipelineError::GuardrailRejected => record_request("rejected"),
                    _ => record_request("failed"),
                }
                Err(err)
            },
        }
    }

    async fn process(
        &self,
        conn: &mut PgConnection,
        request: &QueryRequest,
        user_key: &str,
    ) -> Result<QueryResponse, PipelineError> {
        let _total = StageTimer::start("total");

        let snapshot = self.get_schema_snapshot(conn, request.refresh_schema).await?;

        let ranked_tables = {
            let _timer = StageTimer::start("ranking");
            self.parts.schema_ranker.rank_tables(
                &request.query,
                &snapshot,
                Some(self.schema_cfg.ranker_top_n),
            )
        };

        let schema_slice = select_schema_slice(&snapshot, &ranked_tables, &self.schema_cfg);

        let reasoner_output = {
            let _timer = StageTimer::start("reasoner");
            self.parts.reasoner.reason(&request.query, &schema_slice).await?
        };

        let query_intent = if reasoner_output.query_intent.is_empty() {
            request.query.clone()
        } else {
            reasoner_output.query_intent.clone()
        };

        let plans = {
            let _timer = StageTimer::start("sql_generation");
            self.parts.sql_generator.generate(&query_intent, &reasoner_output)?
        };
        let primary = plans.into_iter().next().ok_or(PipelineError::GenerationEmpty)?;

        let sanitized_sql = {
            let _timer = StageTimer::start("validation");
            self.parts.sql_validator.validate_and_sanitize(&primary.sql)?
        };

        let guard_metrics = {
            let _timer = StageTimer::start("guardrails");
            let (allowed, metrics) = self
                .parts
                .guardrail_engine
                .check(conn, &sanitized_sql, &snapshot.table_stats)
                .await
                .map_err(PipelineError::Explain)?;
            if !allowed {
                return Err(PipelineError::GuardrailRejected);
            }
            metrics
        };

        let execution = {
            let _timer = StageTimer::start("execution");
            self.parts.executor.execute_sql(conn, &sanitized_sql).await?
        };

        let answer = {
            let _timer = StageTimer::start("synthesis");
            self.parts
                .synthesizer
                .synthesize(&request.query, &sanitized_sql, &execution.data, &execution.metadata)
                .await?
        };

        drop(_total);

        record_request("success");
        let entry = json!({
            "user_id": user_key,
            "query": &request.query,
            "sql": &sanitized_sql,
            "metadata": execution.metadata,
            "guard_metrics": guard_metrics,
        });
        if let Err(e) = self.parts.audit.write(entry) {
            tracing::error!("audit write failed: {}", e);
        }

        Ok(QueryResponse {
            answer,
            sql: sanitized_sql,
            rows: execution.data,
            metadata: execution.metadata,
        })
    }

    /// Non-blocking cache lookup first; on miss or forced refresh, one
    /// extraction under the pipeline schema lock, then write-back with the
    /// refresh interval as TTL.
    async fn get_schema_snapshot(
        &self,
        conn: &mut PgConnection,
        refresh: bool,
    ) -> Result<Arc<SchemaSnapshot>, PipelineError> {
        if !refresh
            && let Some(cached) = self.parts.cache.get_json(SCHEMA_CACHE_KEY).await
            && let Ok(snapshot) = serde_json::from_value::<SchemaSnapshot>(cached)
        {
            return Ok(Arc::new(snapshot));
        }

        let _guard = self.schema_lock.lock().await;
        let snapshot = self
            .parts
            .schema_extractor
            .get_schema_snapshot(conn, refresh)
            .await
            .map_err(PipelineError::SchemaUnavailable)?;
        match serde_json::to_value(snapshot.as_ref()) {
            Ok(value) => {
                self.parts
                    .cache
                    .set_json(SCHEMA_CACHE_KEY, value, self.schema_cfg.refresh_interval_s)
                    .await;
            },
            Err(e) => tracing::warn!("snapshot not cacheable: {}", e),
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Config, ObservabilityConfig, PromptsConfig, RedisConfig, SecurityConfig,
    };
    use crate::services::llm::client::EchoLlmClient;
    use crate::services::llm::prompts::PromptResources;
    use sqlx::Connection;

    fn build_pipeline(audit_path: &std::path::Path) -> QueryPipeline {
        let mut config = Config::default();
        // Keep the slice to the two fixture tables even in a shared scratch DB.
        config.schema.ranker_top_n = 2;
        let prompts =
            Arc::new(PromptResources::load(&PromptsConfig::default()).expect("load prompts"));
        let llm: Arc<dyn crate::services::llm::client::LlmClient> = Arc::new(EchoLlmClient);

        let observability = ObservabilityConfig {
            audit_log_path: audit_path.to_string_lossy().into_owned(),
        };
        let cache_cfg =
            RedisConfig { url: "redis://127.0.0.1:1".to_string(), ..RedisConfig::default() };

        let parts = PipelineComponents {
            schema_extractor: Arc::new(SchemaExtractor::new(config.schema.clone())),
            schema_ranker: Arc::new(SchemaRanker::new(config.schema.clone())),
            reasoner: Arc::new(LlmReasoner::new(Arc::clone(&llm), Arc::clone(&prompts))),
            sql_generator: Arc::new(SqlGenerator::new(config.postgres.clone())),
            sql_validator: Arc::new(SqlValidator::new(&config.postgres, &config.sql_guardrails)),
            guardrail_engine: Arc::new(GuardrailEngine::new(config.sql_guardrails.clone())),
            executor: Arc::new(QueryExecutor::new(config.postgres.clone())),
            synthesizer: Arc::new(ResponseSynthesizer::new(llm, prompts)),
            cache: Arc::new(CacheClient::new(cache_cfg)),
            audit: Arc::new(AuditLogger::new(&observability).expect("audit logger")),
            rate_limiter: Arc::new(RateLimiter::new(SecurityConfig::default())),
        };
        QueryPipeline::new(config.schema, parts)
    }

    /// End-to-end run with the echo collaborator against a scratch database.
    ///
    /// Expects DATABASE_URL to point at a database this test may create
    /// tables in. Run with:
    /// DATABASE_URL=postgres://... cargo test end_to_end_with_echo -- --ignored
    #[tokio::test]
    #[ignore]
    async fn end_to_end_with_echo() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let mut conn = sqlx::PgConnection::connect(&url).await.expect("connect");

        // A schema outside search_path keeps regclass output qualified, so
        // snapshot keys and foreign-key references line up.
        for statement in [
            "DROP SCHEMA IF EXISTS isaqe_e2e CASCADE",
            "CREATE SCHEMA isaqe_e2e",
            "CREATE TABLE isaqe_e2e.customers (customer_id int PRIMARY KEY, name text, email text)",
            "CREATE TABLE isaqe_e2e.claims (claim_id int PRIMARY KEY, customer_id int REFERENCES isaqe_e2e.customers(customer_id), status text, created_at date DEFAULT CURRENT_DATE)",
            "INSERT INTO isaqe_e2e.customers VALUES (1, 'Ada', 'ada@example.com'), (2, 'Grace', 'grace@example.com')",
            "INSERT INTO isaqe_e2e.claims VALUES (10, 1, 'active', CURRENT_DATE), (11, 2, 'closed', CURRENT_DATE)",
        ] {
            sqlx::query(statement).execute(&mut conn).await.expect(statement);
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = build_pipeline(&dir.path().join("audit.log"));

        let request = QueryRequest {
            query: "Show claims from active customers in last 30 days".to_string(),
            user_id: Some("u1".to_string()),
            refresh_schema: true,
        };

        let response = pipeline.handle(&mut conn, &request).await.expect("pipeline success");
        assert!(!response.answer.is_empty());
        assert!(response.sql.starts_with("SELECT"));
        assert!(response.sql.contains("LIMIT"));
        assert!(response.sql.contains("status = 'active'"));
        assert!(response.sql.contains("30 days"));

        let audit = std::fs::read_to_string(dir.path().join("audit.log")).expect("audit file");
        assert_eq!(audit.lines().count(), 1);
        let entry: serde_json::Value =
            serde_json::from_str(audit.lines().next().expect("line")).expect("json line");
        assert_eq!(entry["user_id"], "u1");
    }

    #[test]
    fn error_kinds_map_to_stages() {
        assert_eq!(PipelineError::RateLimitExceeded.stage(), "rate_limit");
        assert_eq!(PipelineError::GenerationEmpty.stage(), "sql_generation");
        assert_eq!(PipelineError::GuardrailRejected.stage(), "guardrails");
        assert_eq!(
            PipelineError::Validation(SqlValidationError::NotSelect).stage(),
            "validation"
        );
        assert_eq!(PipelineError::Execution(ExecutionError::Timeout).stage(), "execution");
    }
}
