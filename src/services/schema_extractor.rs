//! Schema extractor
//!
//! Collects tables, columns, foreign keys and indexes from the target
//! database's catalogs and assembles an immutable snapshot. A process-local
//! copy is memoized; refresh is single-flight, so concurrent requests share
//! one collection and waiters receive the same snapshot.

use crate::config::SchemaConfig;
use crate::models::schema::{
    ColumnMeta, ForeignKey, IndexMeta, SchemaSnapshot, TableMeta, TableStats,
};
use chrono::Utc;
use sqlx::PgConnection;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const TABLES_SQL: &str = r#"
SELECT
    n.nspname AS schema_name,
    c.relname AS table_name,
    d.description AS table_description,
    c.reltuples::bigint AS row_estimate,
    pg_total_relation_size(c.oid) AS size_bytes
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_description d ON d.objoid = c.oid AND d.objsubid = 0
WHERE c.relkind = 'r' AND n.nspname NOT IN ('pg_catalog', 'information_schema')
"#;

const COLUMNS_SQL: &str = r#"
SELECT
    n.nspname AS schema_name,
    c.relname AS table_name,
    a.attname AS column_name,
    format_type(a.atttypid, a.atttypmod) AS data_type,
    pg_get_expr(ad.adbin, ad.adrelid) AS default_value,
    a.attnotnull AS is_not_null,
    col_description(a.attrelid, a.attnum) AS column_description
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attrdef ad ON ad.adrelid = a.attrelid AND ad.adnum = a.attnum
WHERE a.attnum > 0 AND NOT a.attisdropped AND c.relkind = 'r'
  AND n.nspname NOT IN ('pg_catalog', 'information_schema')
"#;

const FOREIGN_KEYS_SQL: &str = r#"
SELECT
    conrelid::regclass::text AS table_name,
    confrelid::regclass::text AS foreign_table_name,
    pg_get_constraintdef(oid) AS definition,
    conname AS constraint_name
FROM pg_constraint
WHERE contype = 'f'
"#;

const INDEXES_SQL: &str = r#"
SELECT
    t.relname AS table_name,
    i.relname AS index_name,
    pg_get_indexdef(i.oid) AS index_definition,
    ix.indisunique AS is_unique
FROM pg_index ix
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
WHERE n.nspname NOT IN ('pg_catalog', 'information_schema')
"#;

#[derive(sqlx::FromRow)]
struct TableRow {
    schema_name: String,
    table_name: String,
    table_description: Option<String>,
    row_estimate: i64,
    size_bytes: i64,
}

#[derive(sqlx::FromRow)]
struct ColumnRow {
    schema_name: String,
    table_name: String,
    column_name: String,
    data_type: String,
    default_value: Option<String>,
    is_not_null: bool,
    column_description: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ForeignKeyRow {
    table_name: String,
    foreign_table_name: String,
    definition: String,
    constraint_name: String,
}

#[derive(sqlx::FromRow)]
struct IndexRow {
    table_name: String,
    index_name: String,
    index_definition: String,
    is_unique: bool,
}

#[derive(Default)]
struct SnapshotState {
    snapshot: Option<Arc<SchemaSnapshot>>,
    taken_at: Option<Instant>,
}

impl SnapshotState {
    fn is_fresh(&self, interval: Duration) -> bool {
        match (&self.snapshot, self.taken_at) {
            (Some(_), Some(at)) => at.elapsed() <= interval,
            _ => false,
        }
    }
}

pub struct SchemaExtractor {
    cfg: SchemaConfig,
    state: Mutex<SnapshotState>,
}

impl SchemaExtractor {
    pub fn new(cfg: SchemaConfig) -> Self {
        Self { cfg, state: Mutex::new(SnapshotState::default()) }
    }

    /// Returns the memoized snapshot, collecting a new one when forced or
    /// stale. Collection happens under the state lock: at most one in-flight
    /// collect per process.
    pub async fn get_schema_snapshot(
        &self,
        conn: &mut PgConnection,
        refresh: bool,
    ) -> Result<Arc<SchemaSnapshot>, sqlx::Error> {
        let interval = Duration::from_secs(self.cfg.refresh_interval_s);
        let mut state = self.state.lock().await;
        if !refresh && state.is_fresh(interval) {
            if let Some(snapshot) = &state.snapshot {
                return Ok(Arc::clone(snapshot));
            }
        }
        let snapshot = Arc::new(Self::collect(conn).await?);
        state.snapshot = Some(Arc::clone(&snapshot));
        state.taken_at = Some(Instant::now());
        tracing::info!(tables = snapshot.tables.len(), "schema snapshot refreshed");
        Ok(snapshot)
    }

    async fn collect(conn: &mut PgConnection) -> Result<SchemaSnapshot, sqlx::Error> {
        let tables = sqlx::query_as::<_, TableRow>(TABLES_SQL).fetch_all(&mut *conn).await?;
        let columns = sqlx::query_as::<_, ColumnRow>(COLUMNS_SQL).fetch_all(&mut *conn).await?;
        let foreign_keys =
            sqlx::query_as::<_, ForeignKeyRow>(FOREIGN_KEYS_SQL).fetch_all(&mut *conn).await?;
        let indexes = sqlx::query_as::<_, IndexRow>(INDEXES_SQL).fetch_all(&mut *conn).await?;

        let mut snapshot = SchemaSnapshot { generated_at: Some(Utc::now()), ..Default::default() };

        for row in tables {
            let key = format!("{}.{}", row.schema_name, row.table_name);
            snapshot.table_stats.insert(
                key.clone(),
                TableStats { row_estimate: row.row_estimate, size_bytes: row.size_bytes },
            );
            snapshot.tables.insert(
                key,
                TableMeta {
                    schema: row.schema_name,
                    name: row.table_name,
                    description: row.table_description,
                    row_estimate: row.row_estimate,
                    size_bytes: row.size_bytes,
                    columns: Default::default(),
                },
            );
        }

        for col in columns {
            let key = format!("{}.{}", col.schema_name, col.table_name);
            let table = snapshot.tables.entry(key).or_insert_with(|| TableMeta {
                schema: col.schema_name.clone(),
                name: col.table_name.clone(),
                ..Default::default()
            });
            table.columns.insert(
                col.column_name,
                ColumnMeta {
                    data_type: col.data_type,
                    default_value: col.default_value,
                    is_not_null: col.is_not_null,
                    description: col.column_description,
                },
            );
        }

        for fk in foreign_keys {
            snapshot.foreign_keys.push(ForeignKey {
                constraint: fk.constraint_name,
                definition: fk.definition,
                table: fk.table_name,
                foreign_table: fk.foreign_table_name,
            });
        }

        for ix in indexes {
            snapshot.indexes.entry(ix.table_name).or_default().push(IndexMeta {
                index: ix.index_name,
                definition: ix.index_definition,
                is_unique: ix.is_unique,
            });
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;

    /// Needs a live database. Run with:
    /// DATABASE_URL=postgres://... cargo test extractor_collects_catalog -- --ignored
    #[tokio::test]
    #[ignore]
    async fn extractor_collects_catalog() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let mut conn = sqlx::PgConnection::connect(&url).await.expect("connect");
        let extractor = SchemaExtractor::new(SchemaConfig::default());

        let snapshot = extractor.get_schema_snapshot(&mut conn, true).await.expect("snapshot");
        assert!(snapshot.generated_at.is_some());
        // table_stats keys are a subset of tables keys
        for key in snapshot.table_stats.keys() {
            assert!(snapshot.tables.contains_key(key));
        }

        // Second call without refresh serves the memoized value.
        let again = extractor.get_schema_snapshot(&mut conn, false).await.expect("snapshot");
        assert!(Arc::ptr_eq(&snapshot, &again));
    }
}
