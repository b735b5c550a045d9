//! SQL validator
//!
//! Parses the candidate SQL with the Postgres dialect, enforces the structural
//! contract (single SELECT with FROM, bounded numeric LIMIT, no denylisted
//! functions anywhere in the tree) and re-emits canonical text. This is the
//! only component allowed to mutate candidate SQL.

use crate::config::{PostgresConfig, SqlGuardrailConfig};
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, JoinConstraint,
    JoinOperator, LimitClause, ObjectNamePart, OrderByKind, Query, Select, SelectItem,
    SelectItemQualifiedWildcardKind, SetExpr, Statement, TableFactor, Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum SqlValidationError {
    #[error("invalid SQL: {0}")]
    Parse(String),

    #[error("only SELECT statements are allowed")]
    NotSelect,

    #[error("SELECT must include FROM clause")]
    MissingFrom,

    #[error("LIMIT must be a numeric literal")]
    NonLiteralLimit,

    #[error("function {0} is not allowed")]
    DisallowedFunction(String),
}

pub struct SqlValidator {
    max_limit: u64,
    disallowed: HashSet<String>,
}

impl SqlValidator {
    pub fn new(pg_cfg: &PostgresConfig, guard_cfg: &SqlGuardrailConfig) -> Self {
        Self {
            max_limit: pg_cfg.max_limit,
            disallowed: guard_cfg
                .disallowed_functions
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
        }
    }

    /// Validate the candidate and return its canonical rendering.
    pub fn validate_and_sanitize(&self, sql: &str) -> Result<String, SqlValidationError> {
        let dialect = PostgreSqlDialect {};
        let mut statements = Parser::parse_sql(&dialect, sql)
            .map_err(|e| SqlValidationError::Parse(e.to_string()))?;
        if statements.len() != 1 {
            return Err(SqlValidationError::Parse("expected a single statement".to_string()));
        }
        let mut statement = statements.remove(0);

        {
            let Statement::Query(query) = &mut statement else {
                return Err(SqlValidationError::NotSelect);
            };
            self.walk_query(query)?;
            let SetExpr::Select(select) = query.body.as_mut() else {
                return Err(SqlValidationError::NotSelect);
            };
            if select.from.is_empty() {
                return Err(SqlValidationError::MissingFrom);
            }
            self.enforce_limit(query)?;
        }

        Ok(statement.to_string())
    }

    fn limit_expr(&self) -> Expr {
        Expr::Value(Value::Number(self.max_limit.to_string(), false).into())
    }

    /// Inject a LIMIT when absent, clamp numeric literals above the ceiling,
    /// reject anything non-literal.
    fn enforce_limit(&self, query: &mut Query) -> Result<(), SqlValidationError> {
        if query.limit_clause.is_none() {
            query.limit_clause = Some(LimitClause::LimitOffset {
                limit: Some(self.limit_expr()),
                offset: None,
                limit_by: Vec::new(),
            });
            return Ok(());
        }
        match query.limit_clause.as_mut() {
            Some(LimitClause::LimitOffset { limit, .. }) => match limit {
                None => {
                    *limit = Some(self.limit_expr());
                    Ok(())
                },
                Some(expr) => self.clamp_limit(expr),
            },
            Some(LimitClause::OffsetCommaLimit { limit, .. }) => self.clamp_limit(limit),
            None => Ok(()),
        }
    }

    fn clamp_limit(&self, expr: &mut Expr) -> Result<(), SqlValidationError> {
        let Expr::Value(value) = &*expr else {
            return Err(SqlValidationError::NonLiteralLimit);
        };
        let Value::Number(number, _) = &value.value else {
            return Err(SqlValidationError::NonLiteralLimit);
        };
        let parsed: u64 =
            number.parse().map_err(|_| SqlValidationError::NonLiteralLimit)?;
        if parsed > self.max_limit {
            *expr = self.limit_expr();
        }
        Ok(())
    }

    fn check_function_name(
        &self,
        name: &sqlparser::ast::ObjectName,
    ) -> Result<(), SqlValidationError> {
        if let Some(ObjectNamePart::Identifier(ident)) = name.0.last() {
            let lowered = ident.value.to_lowercase();
            if self.disallowed.contains(&lowered) {
                return Err(SqlValidationError::DisallowedFunction(lowered));
            }
        }
        Ok(())
    }

    fn walk_query(&self, query: &Query) -> Result<(), SqlValidationError> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.walk_query(&cte.query)?;
            }
        }
        self.walk_set_expr(&query.body)?;
        if let Some(order_by) = &query.order_by
            && let OrderByKind::Expressions(exprs) = &order_by.kind
        {
            for ob in exprs {
                self.walk_expr(&ob.expr)?;
            }
        }
        if let Some(limit_clause) = &query.limit_clause {
            match limit_clause {
                LimitClause::LimitOffset { limit, offset, limit_by } => {
                    if let Some(l) = limit {
                        self.walk_expr(l)?;
                    }
                    if let Some(o) = offset {
                        self.walk_expr(&o.value)?;
                    }
                    for e in limit_by {
                        self.walk_expr(e)?;
                    }
                },
                LimitClause::OffsetCommaLimit { offset, limit } => {
                    self.walk_expr(offset)?;
                    self.walk_expr(limit)?;
                },
            }
        }
        Ok(())
    }

    fn walk_set_expr(&self, set_expr: &SetExpr) -> Result<(), SqlValidationError> {
        match set_expr {
            SetExpr::Select(select) => self.walk_select(select),
            SetExpr::SetOperation { left, right, .. } => {
                self.walk_set_expr(left)?;
                self.walk_set_expr(right)
            },
            SetExpr::Query(subquery) => self.walk_query(subquery),
            _ => Ok(()),
        }
    }

    fn walk_select(&self, select: &Select) -> Result<(), SqlValidationError> {
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.walk_expr(expr)?;
                },
                SelectItem::QualifiedWildcard(kind, _) => {
                    if let SelectItemQualifiedWildcardKind::Expr(expr) = kind {
                        self.walk_expr(expr)?;
                    }
                },
                _ => {},
            }
        }

        for table in &select.from {
            self.walk_table_factor(&table.relation)?;
            for join in &table.joins {
                self.walk_table_factor(&join.relation)?;
                self.walk_join_operator(&join.join_operator)?;
            }
        }

        if let Some(selection) = &select.selection {
            self.walk_expr(selection)?;
        }
        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                self.walk_expr(expr)?;
            }
        }
        if let Some(having) = &select.having {
            self.walk_expr(having)?;
        }
        if let Some(qualify) = &select.qualify {
            self.walk_expr(qualify)?;
        }
        Ok(())
    }

    fn walk_table_factor(&self, tf: &TableFactor) -> Result<(), SqlValidationError> {
        match tf {
            TableFactor::Derived { subquery, .. } => self.walk_query(subquery),
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.walk_table_factor(&table_with_joins.relation)?;
                for join in &table_with_joins.joins {
                    self.walk_table_factor(&join.relation)?;
                    self.walk_join_operator(&join.join_operator)?;
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }

    fn walk_join_operator(&self, op: &JoinOperator) -> Result<(), SqlValidationError> {
        match op {
            JoinOperator::Join(constraint)
            | JoinOperator::Inner(constraint)
            | JoinOperator::Left(constraint)
            | JoinOperator::LeftOuter(constraint)
            | JoinOperator::Right(constraint)
            | JoinOperator::RightOuter(constraint)
            | JoinOperator::FullOuter(constraint)
            | JoinOperator::CrossJoin(constraint)
            | JoinOperator::Semi(constraint)
            | JoinOperator::LeftSemi(constraint)
            | JoinOperator::RightSemi(constraint)
            | JoinOperator::Anti(constraint)
            | JoinOperator::LeftAnti(constraint)
            | JoinOperator::RightAnti(constraint)
            | JoinOperator::StraightJoin(constraint) => self.walk_join_constraint(constraint),
            JoinOperator::AsOf { match_condition, constraint } => {
                self.walk_expr(match_condition)?;
                self.walk_join_constraint(constraint)
            },
            _ => Ok(()),
        }
    }

    fn walk_join_constraint(&self, constraint: &JoinConstraint) -> Result<(), SqlValidationError> {
        if let JoinConstraint::On(expr) = constraint {
            self.walk_expr(expr)?;
        }
        Ok(())
    }

    fn walk_expr(&self, expr: &Expr) -> Result<(), SqlValidationError> {
        match expr {
            Expr::Function(func) => {
                self.check_function_name(&func.name)?;
                self.walk_function_arguments(&func.args)?;
                self.walk_function_arguments(&func.parameters)?;
                if let Some(filter) = &func.filter {
                    self.walk_expr(filter)?;
                }
                for ob in &func.within_group {
                    self.walk_expr(&ob.expr)?;
                }
                Ok(())
            },
            Expr::BinaryOp { left, right, .. } => {
                self.walk_expr(left)?;
                self.walk_expr(right)
            },
            Expr::UnaryOp { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Nested(expr)
            | Expr::IsNull(expr)
            | Expr::IsNotNull(expr)
            | Expr::IsTrue(expr)
            | Expr::IsNotTrue(expr)
            | Expr::IsFalse(expr)
            | Expr::IsNotFalse(expr)
            | Expr::IsUnknown(expr)
            | Expr::IsNotUnknown(expr) => self.walk_expr(expr),
            Expr::IsDistinctFrom(left, right) | Expr::IsNotDistinctFrom(left, right) => {
                self.walk_expr(left)?;
                self.walk_expr(right)
            },
            Expr::InList { expr, list, .. } => {
                self.walk_expr(expr)?;
                for item in list {
                    self.walk_expr(item)?;
                }
                Ok(())
            },
            Expr::InSubquery { expr, subquery, .. } => {
                self.walk_expr(expr)?;
                self.walk_query(subquery)
            },
            Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => self.walk_query(subquery),
            Expr::Between { expr, low, high, .. } => {
                self.walk_expr(expr)?;
                self.walk_expr(low)?;
                self.walk_expr(high)
            },
            Expr::Like { expr, pattern, .. }
            | Expr::ILike { expr, pattern, .. }
            | Expr::RLike { expr, pattern, .. }
            | Expr::SimilarTo { expr, pattern, .. } => {
                self.walk_expr(expr)?;
                self.walk_expr(pattern)
            },
            Expr::Case { operand, conditions, else_result, .. } => {
                if let Some(op) = operand {
                    self.walk_expr(op)?;
                }
                for cw in conditions {
                    self.walk_expr(&cw.condition)?;
                    self.walk_expr(&cw.result)?;
                }
                if let Some(el) = else_result {
                    self.walk_expr(el)?;
                }
                Ok(())
            },
            Expr::Tuple(exprs) => {
                for e in exprs {
                    self.walk_expr(e)?;
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }

    fn walk_function_arguments(&self, args: &FunctionArguments) -> Result<(), SqlValidationError> {
        match args {
            FunctionArguments::List(list) => {
                for arg in &list.args {
                    match arg {
                        FunctionArg::Named { arg, .. } | FunctionArg::Unnamed(arg) => {
                            if let FunctionArgExpr::Expr(e) = arg {
                                self.walk_expr(e)?;
                            }
                        },
                        FunctionArg::ExprNamed { name, arg, .. } => {
                            self.walk_expr(name)?;
                            if let FunctionArgExpr::Expr(e) = arg {
                                self.walk_expr(e)?;
                            }
                        },
                    }
                }
                Ok(())
            },
            FunctionArguments::Subquery(query) => self.walk_query(query),
            FunctionArguments::None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SqlValidator {
        let pg_cfg =
            PostgresConfig { max_limit: 100, sample_limit: 50, ..PostgresConfig::default() };
        let guard_cfg = SqlGuardrailConfig {
            disallowed_functions: vec!["pg_sleep".to_string()],
            ..SqlGuardrailConfig::default()
        };
        SqlValidator::new(&pg_cfg, &guard_cfg)
    }

    #[test]
    fn enforces_select_only() {
        assert!(matches!(
            validator().validate_and_sanitize("DELETE FROM users"),
            Err(SqlValidationError::NotSelect)
        ));
    }

    #[test]
    fn rejects_insert() {
        assert!(matches!(
            validator().validate_and_sanitize("INSERT INTO users (id) VALUES (1)"),
            Err(SqlValidationError::NotSelect)
        ));
    }

    #[test]
    fn requires_from_clause() {
        assert!(matches!(
            validator().validate_and_sanitize("SELECT 1"),
            Err(SqlValidationError::MissingFrom)
        ));
    }

    #[test]
    fn adds_limit_when_missing() {
        let sanitized = validator().validate_and_sanitize("SELECT id FROM users").expect("valid");
        assert!(sanitized.contains("LIMIT 100"));
    }

    #[test]
    fn clamps_limit() {
        let sanitized = validator()
            .validate_and_sanitize("SELECT id FROM users LIMIT 1000")
            .expect("valid");
        assert!(sanitized.contains("LIMIT 100"));
        assert!(!sanitized.contains("LIMIT 1000"));
    }

    #[test]
    fn keeps_limit_under_ceiling() {
        let sanitized =
            validator().validate_and_sanitize("SELECT id FROM users LIMIT 10").expect("valid");
        assert!(sanitized.contains("LIMIT 10"));
    }

    #[test]
    fn rejects_non_literal_limit() {
        assert!(matches!(
            validator().validate_and_sanitize("SELECT id FROM users LIMIT id"),
            Err(SqlValidationError::NonLiteralLimit)
        ));
    }

    #[test]
    fn rejects_disallowed_function() {
        assert!(matches!(
            validator().validate_and_sanitize("SELECT pg_sleep(1)"),
            Err(SqlValidationError::DisallowedFunction(_))
        ));
    }

    #[test]
    fn rejects_disallowed_function_in_where() {
        assert!(matches!(
            validator().validate_and_sanitize("SELECT id FROM users WHERE pg_sleep(1) IS NULL"),
            Err(SqlValidationError::DisallowedFunction(_))
        ));
    }

    #[test]
    fn rejects_disallowed_function_in_subquery() {
        let sql = "SELECT id FROM (SELECT pg_sleep(1) AS id) t";
        assert!(matches!(
            validator().validate_and_sanitize(sql),
            Err(SqlValidationError::DisallowedFunction(_))
        ));
    }

    #[test]
    fn allows_other_functions() {
        let sanitized = validator()
            .validate_and_sanitize("SELECT count(*) FROM users GROUP BY status")
            .expect("valid");
        assert!(sanitized.to_lowercase().contains("count"));
    }

    #[test]
    fn rejects_multiple_statements() {
        assert!(matches!(
            validator().validate_and_sanitize("SELECT id FROM users; SELECT id FROM users"),
            Err(SqlValidationError::Parse(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            validator().validate_and_sanitize("not sql at all"),
            Err(SqlValidationError::Parse(_))
        ));
    }

    #[test]
    fn sanitized_sql_reparses_with_bounds() {
        let sanitized = validator()
            .validate_and_sanitize("SELECT id, name FROM users WHERE status = 'active'")
            .expect("valid");
        let reparsed = validator().validate_and_sanitize(&sanitized).expect("still valid");
        assert!(reparsed.starts_with("SELECT"));
        assert!(reparsed.contains("FROM"));
        assert!(reparsed.contains("LIMIT 100"));
    }
}
