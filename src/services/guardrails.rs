//! Guardrail engine
//!
//! Runs the sanitized SELECT through the live planner and rejects it when the
//! root plan node estimates too many rows, too much cost, or a large
//! sequential scan. Only the first EXPLAIN row and the root node are
//! consulted.

use crate::config::SqlGuardrailConfig;
use crate::models::schema::TableStats;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgConnection;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct GuardMetrics {
    pub plan_rows: f64,
    pub plan_width: i64,
    pub total_cost: f64,
    pub node_type: String,
}

pub struct GuardrailEngine {
    cfg: SqlGuardrailConfig,
}

impl GuardrailEngine {
    pub fn new(cfg: SqlGuardrailConfig) -> Self {
        Self { cfg }
    }

    /// Returns the verdict together with the extracted metrics; metrics are
    /// reported even for rejected plans. EXPLAIN errors propagate.
    pub async fn check(
        &self,
        conn: &mut PgConnection,
        sql: &str,
        _table_stats: &BTreeMap<String, TableStats>,
    ) -> Result<(bool, GuardMetrics), sqlx::Error> {
        let explain = format!("EXPLAIN (FORMAT JSON) {sql}");
        let plan_json: Value = sqlx::query_scalar(&explain).fetch_one(&mut *conn).await?;
        let metrics = Self::extract_metrics(&first_plan(plan_json));
        let allowed = self.apply_rules(&metrics);
        tracing::info!(
            allowed,
            plan_rows = metrics.plan_rows,
            total_cost = metrics.total_cost,
            node_type = %metrics.node_type,
            "guardrail decision"
        );
        Ok((allowed, metrics))
    }

    pub fn extract_metrics(plan: &Value) -> GuardMetrics {
        let root = plan.get("Plan").cloned().unwrap_or(Value::Null);
        GuardMetrics {
            plan_rows: root.get("Plan Rows").and_then(Value::as_f64).unwrap_or(0.0),
            plan_width: root.get("Plan Width").and_then(Value::as_i64).unwrap_or(0),
            total_cost: root.get("Total Cost").and_then(Value::as_f64).unwrap_or(0.0),
            node_type: root
                .get("Node Type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    pub fn apply_rules(&self, metrics: &GuardMetrics) -> bool {
        if metrics.plan_rows > self.cfg.row_threshold {
            return false;
        }
        if metrics.total_cost > self.cfg.cost_threshold {
            return false;
        }
        if metrics.node_type.to_lowercase() == "seq scan"
            && metrics.plan_rows > self.cfg.row_threshold / 10.0
        {
            return false;
        }
        true
    }
}

/// EXPLAIN (FORMAT JSON) yields a one-element array of plan objects; older
/// drivers hand it over as an encoded string.
fn first_plan(value: Value) -> Value {
    let decoded = match value {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::Null),
        other => other,
    };
    match decoded {
        Value::Array(mut plans) if !plans.is_empty() => plans.remove(0),
        other => other,
    }
}
