//! Data models for the query pipeline

pub mod query;
pub mod schema;

pub use query::{ExecutionMetadata, QueryRequest, QueryResponse};
pub use schema::{
    ColumnMeta, ForeignKey, IndexMeta, SchemaSlice, SchemaSnapshot, TableMeta, TableStats,
};
