//! Schema slicer
//!
//! Walks the ranked table ids and keeps tables while their cumulative JSON
//! size stays under the byte budget; the first table that would exceed it
//! stops inclusion. Foreign keys are projected onto the included tables and
//! flattened to `[left_table, left_col, right_table, right_col]`.

use crate::config::SchemaConfig;
use crate::models::schema::{SchemaSlice, SchemaSnapshot};

pub fn select_schema_slice(
    snapshot: &SchemaSnapshot,
    table_ids: &[String],
    cfg: &SchemaConfig,
) -> SchemaSlice {
    let mut slice = SchemaSlice::default();
    let mut total_bytes = 0usize;

    for table_id in table_ids {
        let Some(meta) = snapshot.tables.get(table_id) else {
            continue;
        };
        let serialized = serde_json::to_string(meta).unwrap_or_default();
        total_bytes += serialized.len();
        if total_bytes > cfg.max_schema_slice_bytes {
            break;
        }
        slice.tables.insert(table_id.clone(), meta.clone());
    }

    for fk in &snapshot.foreign_keys {
        if slice.tables.contains_key(&fk.table) && slice.tables.contains_key(&fk.foreign_table) {
            slice.foreign_keys.push([
                fk.table.clone(),
                extract_fk_column(&fk.definition, 1),
                fk.foreign_table.clone(),
                extract_fk_column(&fk.definition, 2),
            ]);
        }
    }

    slice
}

/// Pulls a column name out of a constraint definition like
/// `FOREIGN KEY (col) REFERENCES schema.table(col)`.
///
/// Multi-column and quoted identifiers are not handled; anything that does
/// not match the simple shape yields an empty string.
fn extract_fk_column(definition: &str, index: usize) -> String {
    definition
        .split('(')
        .nth(index)
        .and_then(|part| part.split(')').next())
        .map(|col| col.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema::{ColumnMeta, ForeignKey, TableMeta};

    fn snapshot_with_tables(count: usize) -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::default();
        for i in 0..count {
            let mut meta = TableMeta {
                schema: "public".to_string(),
                name: format!("table{i}"),
                ..Default::default()
            };
            meta.columns.insert("col".to_string(), ColumnMeta::default());
            snapshot.tables.insert(format!("public.table{i}"), meta);
        }
        snapshot
    }

    #[test]
    fn limits_cumulative_bytes() {
        let mut snapshot = snapshot_with_tables(3);
        snapshot.foreign_keys.push(ForeignKey {
            constraint: "fk_t0_t1".to_string(),
            definition: "FOREIGN KEY (col) REFERENCES public.table1(col)".to_string(),
            table: "public.table0".to_string(),
            foreign_table: "public.table1".to_string(),
        });
        let cfg = SchemaConfig { max_schema_slice_bytes: 200, ..SchemaConfig::default() };
        let ids: Vec<String> = (0..3).map(|i| format!("public.table{i}")).collect();

        let slice = select_schema_slice(&snapshot, &ids, &cfg);
        assert!(slice.tables.contains_key("public.table0"));
        assert!(!slice.tables.is_empty());
        assert!(slice.tables.len() < 3);
        for fk in &slice.foreign_keys {
            assert!(slice.tables.contains_key(&fk[0]));
            assert!(slice.tables.contains_key(&fk[2]));
        }
    }

    #[test]
    fn projects_foreign_keys_onto_included_tables() {
        let mut snapshot = snapshot_with_tables(2);
        snapshot.foreign_keys.push(ForeignKey {
            constraint: "fk_orders_customers".to_string(),
            definition: "FOREIGN KEY (customer_id) REFERENCES public.table1(id)".to_string(),
            table: "public.table0".to_string(),
            foreign_table: "public.table1".to_string(),
        });
        snapshot.foreign_keys.push(ForeignKey {
            constraint: "fk_dangling".to_string(),
            definition: "FOREIGN KEY (x) REFERENCES public.absent(y)".to_string(),
            table: "public.table0".to_string(),
            foreign_table: "public.absent".to_string(),
        });
        let cfg = SchemaConfig::default();
        let ids = vec!["public.table0".to_string(), "public.table1".to_string()];

        let slice = select_schema_slice(&snapshot, &ids, &cfg);
        assert_eq!(slice.foreign_keys.len(), 1);
        assert_eq!(
            slice.foreign_keys[0],
            [
                "public.table0".to_string(),
                "customer_id".to_string(),
                "public.table1".to_string(),
                "id".to_string()
            ]
        );
    }

    #[test]
    fn skips_unknown_table_ids() {
        let snapshot = snapshot_with_tables(1);
        let cfg = SchemaConfig::default();
        let ids = vec!["public.missing".to_string(), "public.table0".to_string()];
        let slice = select_schema_slice(&snapshot, &ids, &cfg);
        assert_eq!(slice.tables.len(), 1);
    }

    #[test]
    fn fk_column_parser_tolerates_garbage() {
        assert_eq!(extract_fk_column("FOREIGN KEY (a) REFERENCES t(b)", 1), "a");
        assert_eq!(extract_fk_column("FOREIGN KEY (a) REFERENCES t(b)", 2), "b");
        assert_eq!(extract_fk_column("no parens at all", 1), "");
        assert_eq!(extract_fk_column("", 2), "");
    }
}
