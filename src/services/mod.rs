//! Pipeline services

pub mod audit;
pub mod cache;
pub mod executor;
pub mod guardrails;
pub mod llm;
pub mod pipeline;
pub mod rate_limiter;
pub mod schema_extractor;
pub mod schema_ranker;
pub mod schema_slicer;
pub mod sql_generator;
pub mod sql_validator;

pub use audit::AuditLogger;
pub use cache::CacheClient;
pub use executor::{ExecutionError, ExecutionResult, QueryExecutor};
pub use guardrails::{GuardMetrics, GuardrailEngine};
pub use pipeline::{PipelineComponents, PipelineError, QueryPipeline};
pub use rate_limiter::RateLimiter;
pub use schema_extractor::SchemaExtractor;
pub use schema_ranker::{EmbeddingStore, SchemaRanker, TfidfModel};
pub use schema_slicer::select_schema_slice;
pub use sql_generator::{SqlGenerator, SqlPlan};
pub use sql_validator::{SqlValidationError, SqlValidator};
