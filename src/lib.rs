//! ISAQE Library
//!
//! Intelligent Schema-Aware Query Engine: answers natural-language questions
//! over Postgres with a single guarded read-only SELECT.

use sqlx::PgPool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod services;

// Re-export commonly used types
pub use config::Config;
pub use models::{QueryRequest, QueryResponse};
pub use services::{PipelineError, QueryPipeline};

/// Application shared state
///
/// Rust's type system is the DI container: the pipeline owns its components
/// behind Arcs, handlers reach everything through this one struct.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub pipeline: Arc<QueryPipeline>,
}
