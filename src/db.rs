//! Target database pool

use crate::config::PostgresConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Create the shared Postgres pool. Acquisition is bounded by the statement
/// timeout.
pub async fn create_pool(cfg: &PostgresConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .min_connections(cfg.min_pool_size)
        .max_connections(cfg.max_pool_size)
        .acquire_timeout(Duration::from_millis(cfg.statement_timeout_ms))
        .connect(&cfg.dsn)
        .await
}
