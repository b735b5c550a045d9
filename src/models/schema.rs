//! Schema metadata model
//!
//! A `SchemaSnapshot` is a point-in-time view of database metadata collected by
//! the schema extractor. Snapshots are immutable once published; a refresh
//! produces a new value. A `SchemaSlice` is the request-scoped, byte-budgeted
//! subset handed to the reasoner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time view of tables, columns, foreign keys, indexes and stats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub generated_at: Option<DateTime<Utc>>,
    /// Keyed by `"schema.table"`.
    pub tables: BTreeMap<String, TableMeta>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Keyed by table name as reported by the index catalog.
    pub indexes: BTreeMap<String, Vec<IndexMeta>>,
    /// Keyed by `"schema.table"`; always a subset of `tables`.
    pub table_stats: BTreeMap<String, TableStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableMeta {
    pub schema: String,
    pub name: String,
    pub description: Option<String>,
    pub row_estimate: i64,
    pub size_bytes: i64,
    pub columns: BTreeMap<String, ColumnMeta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub data_type: String,
    pub default_value: Option<String>,
    pub is_not_null: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub constraint: String,
    /// Raw `pg_get_constraintdef` output.
    pub definition: String,
    pub table: String,
    pub foreign_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub index: String,
    pub definition: String,
    pub is_unique: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TableStats {
    pub row_estimate: i64,
    pub size_bytes: i64,
}

/// Byte-budgeted subset of a snapshot passed to the LLM.
///
/// Every table referenced by `foreign_keys` is present in `tables`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSlice {
    pub tables: BTreeMap<String, TableMeta>,
    /// Flattened `[left_table, left_col, right_table, right_col]` tuples.
    pub foreign_keys: Vec<[String; 4]>,
}
