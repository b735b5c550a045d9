//! SQL generator
//!
//! Pure assembly of a candidate SELECT from reasoner output: aliased columns
//! (first five per table), the first relevant table as join base, intent
//! heuristics for WHERE, and a trailing sample LIMIT. The candidate is always
//! re-validated by the SQL validator before anything touches the database.

use crate::config::PostgresConfig;
use crate::services::llm::reasoner::ReasonerOutput;
use crate::services::pipeline::PipelineError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static LAST_DAYS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"last (\d+) day").expect("valid regex"));
static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})").expect("valid regex"));

#[derive(Debug, Clone, Serialize)]
pub struct SqlPlan {
    pub sql: String,
    pub purpose: String,
    pub expected_rows: String,
}

pub struct SqlGenerator {
    cfg: PostgresConfig,
}

impl SqlGenerator {
    pub fn new(cfg: PostgresConfig) -> Self {
        Self { cfg }
    }

    pub fn generate(
        &self,
        query_intent: &str,
        output: &ReasonerOutput,
    ) -> Result<Vec<SqlPlan>, PipelineError> {
        let select_cols = Self::build_select_columns(output);
        let from_clause = Self::build_from_clause(output)?;
        let where_clauses = Self::build_where_clauses(query_intent);
        let sql = self.compose_sql(&select_cols, &from_clause, &where_clauses);
        Ok(vec![SqlPlan {
            sql,
            purpose: query_intent.to_string(),
            expected_rows: "unknown".to_string(),
        }])
    }

    fn build_select_columns(output: &ReasonerOutput) -> Vec<String> {
        let mut columns = Vec::new();
        for table in &output.relevant_tables {
            let table_columns = output
                .schema_context
                .get(table)
                .map(|ctx| ctx.columns.as_slice())
                .unwrap_or_default();
            for column in table_columns.iter().take(5) {
                let alias = format!("{}_{}", table.replace('.', "_"), column);
                columns.push(format!("{table}.{column} AS {alias}"));
            }
        }
        if columns.is_empty() {
            columns.push("*".to_string());
        }
        columns
    }

    fn build_from_clause(output: &ReasonerOutput) -> Result<String, PipelineError> {
        let base = output.relevant_tables.first().ok_or(PipelineError::GenerationEmpty)?;
        let mut parts = vec![base.clone()];
        for fk in &output.foreign_keys_map {
            let [left_table, left_col, right_table, right_col] = fk;
            if output.relevant_tables.contains(left_table)
                && output.relevant_tables.contains(right_table)
            {
                parts.push(format!(
                    "LEFT JOIN {right_table} ON {left_table}.{left_col} = {right_table}.{right_col}"
                ));
            }
        }
        Ok(parts.join(" "))
    }

    fn build_where_clauses(query_intent: &str) -> Vec<String> {
        let mut clauses = Vec::new();
        let lowered = query_intent.to_lowercase();
        if lowered.contains("last") && lowered.contains("day") {
            let days = LAST_DAYS_RE
                .captures(&lowered)
                .and_then(|caps| caps[1].parse::<u32>().ok())
                .unwrap_or(30);
            clauses.push(format!("created_at >= CURRENT_DATE - INTERVAL '{days} days'"));
        }
        if lowered.contains("active") {
            clauses.push("status = 'active'".to_string());
        }
        if let Some(caps) = ISO_DATE_RE.captures(&lowered) {
            // Ill-formed dates (e.g. 2024-13-45) are silently skipped.
            if let Ok(date) = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") {
                clauses.push(format!("created_at >= DATE '{}'", date.format("%Y-%m-%d")));
            }
        }
        clauses
    }

    fn compose_sql(&self, select_cols: &[String], from_clause: &str, where_clauses: &[String]) -> String {
        let select_clause = select_cols.join(",\n       ");
        let where_clause = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("\nWHERE {}", where_clauses.join(" AND "))
        };
        format!(
            "SELECT\n       {select_clause}\nFROM {from_clause}{where_clause}\nLIMIT {};",
            self.cfg.sample_limit
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::reasoner::TableContext;

    fn reasoner_output() -> ReasonerOutput {
        let mut output = ReasonerOutput {
            query_intent: "claims".to_string(),
            relevant_tables: vec!["public.claims".to_string(), "public.customers".to_string()],
            ..Default::default()
        };
        output.schema_context.insert(
            "public.claims".to_string(),
            TableContext {
                columns: vec![
                    "claim_id".to_string(),
                    "customer_id".to_string(),
                    "status".to_string(),
                    "amount".to_string(),
                    "created_at".to_string(),
                    "sixth_column".to_string(),
                ],
            },
        );
        output.foreign_keys_map.push([
            "public.claims".to_string(),
            "customer_id".to_string(),
            "public.customers".to_string(),
            "customer_id".to_string(),
        ]);
        output
    }

    fn generator() -> SqlGenerator {
        SqlGenerator::new(PostgresConfig::default())
    }

    #[test]
    fn selects_at_most_five_columns_per_table() {
        let plans = generator().generate("claims", &reasoner_output()).expect("plans");
        let sql = &plans[0].sql;
        assert!(sql.contains("public.claims.claim_id AS public_claims_claim_id"));
        assert!(sql.contains("public.claims.created_at AS public_claims_created_at"));
        assert!(!sql.contains("sixth_column"));
    }

    #[test]
    fn joins_tables_linked_by_foreign_keys() {
        let plans = generator().generate("claims", &reasoner_output()).expect("plans");
        assert!(plans[0].sql.contains(
            "LEFT JOIN public.customers ON public.claims.customer_id = public.customers.customer_id"
        ));
    }

    #[test]
    fn empty_tables_is_an_error() {
        let output = ReasonerOutput::default();
        assert!(matches!(
            generator().generate("anything", &output),
            Err(PipelineError::GenerationEmpty)
        ));
    }

    #[test]
    fn falls_back_to_star_without_schema_context() {
        let output = ReasonerOutput {
            relevant_tables: vec!["public.claims".to_string()],
            ..Default::default()
        };
        let plans = generator().generate("claims", &output).expect("plans");
        assert!(plans[0].sql.contains("SELECT\n       *"));
    }

    #[test]
    fn intent_heuristics_emit_literal_clauses() {
        let plans = generator()
            .generate("Show claims from active customers in last 30 days", &reasoner_output())
            .expect("plans");
        let sql = &plans[0].sql;
        assert!(sql.contains("created_at >= CURRENT_DATE - INTERVAL '30 days'"));
        assert!(sql.contains("status = 'active'"));
    }

    #[test]
    fn defaults_to_thirty_days_without_a_count() {
        let plans = generator()
            .generate("claims from the last few days", &reasoner_output())
            .expect("plans");
        assert!(plans[0].sql.contains("INTERVAL '30 days'"));
    }

    #[test]
    fn iso_date_clause_requires_a_real_date() {
        let plans =
            generator().generate("claims since 2024-02-30", &reasoner_output()).expect("plans");
        assert!(!plans[0].sql.contains("DATE '2024-02-30'"));

        let plans =
            generator().generate("claims since 2024-02-29", &reasoner_output()).expect("plans");
        assert!(plans[0].sql.contains("created_at >= DATE '2024-02-29'"));
    }

    #[test]
    fn always_appends_sample_limit() {
        let cfg = PostgresConfig { sample_limit: 50, ..PostgresConfig::default() };
        let plans = SqlGenerator::new(cfg)
            .generate("claims", &reasoner_output())
            .expect("plans");
        assert!(plans[0].sql.trim_end().ends_with("LIMIT 50;"));
        assert_eq!(plans[0].expected_rows, "unknown");
    }
}
