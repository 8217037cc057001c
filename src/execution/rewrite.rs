//! Query Rewrite - adjusts an accepted query before polars plans it
//!
//! Two changes are made on the parsed AST and the query is printed back to
//! text:
//!
//! * Row counts (`COUNT(*)`, `COUNT()`, `COUNT(<literal>)`) count a marker
//!   column that is never null. polars evaluates a bare row count after the
//!   aggregation, which yields the number of groups instead of the group size.
//! * A grouped or de-duplicated SELECT without ORDER BY is ordered on its named
//!   output columns, at every depth, so LIMIT and enclosing queries always see
//!   the same rows.

use crate::error::{DataExpError, Result};
use sqlparser::ast::{
    Distinct, Expr, Function, FunctionArg, FunctionArgExpr, GroupByExpr, Ident, JoinConstraint,
    JoinOperator, OrderByExpr, Query, Select, SelectItem, SetExpr, Statement, TableFactor,
    TableWithJoins, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Constant column added to the relation when a query counts rows
pub const ROW_MARKER: &str = "__dataexp_row";

/// Output name given to an unaliased `COUNT(*)`
const COUNT_ALIAS: &str = "count";

#[derive(Debug, Clone)]
pub struct RewrittenQuery {
    pub sql: String,
    /// The relation must carry [`ROW_MARKER`]
    pub counts_rows: bool,
    /// SELECTs that received an ORDER BY
    pub ordered_selects: usize,
}

/// Rewrite a query that has already passed the allow-list.
pub fn rewrite(sql: &str) -> Result<RewrittenQuery> {
    let dialect = GenericDialect {};
    let mut statements = Parser::parse_sql(&dialect, sql)
        .map_err(|e| DataExpError::QuerySyntax(e.to_string()))?;

    let mut rewriter = Rewriter::default();
    match statements.as_mut_slice() {
        [Statement::Query(query)] => rewriter.query(query),
        _ => {
            return Err(DataExpError::QuerySyntax(
                "Expected a single SELECT query".to_string(),
            ))
        }
    }

    Ok(RewrittenQuery {
        sql: statements[0].to_string(),
        counts_rows: rewriter.counts_rows,
        ordered_selects: rewriter.ordered_selects,
    })
}

/// Projection expression that held a row count, and the name it is output under
type Counted = Vec<(Expr, Ident)>;

#[derive(Default)]
struct Rewriter {
    counts_rows: bool,
    ordered_selects: usize,
}

impl Rewriter {
    fn query(&mut self, query: &mut Query) {
        if let Some(with) = &mut query.with {
            for cte in &mut with.cte_tables {
                self.query(&mut cte.query);
            }
        }

        let mut counted = Counted::new();
        let mut order_keys = Vec::new();
        match query.body.as_mut() {
            SetExpr::Select(select) => {
                counted = self.select(select);
                if query.order_by.is_empty() {
                    order_keys = stable_order_keys(select);
                }
            }
            other => self.set_expr(other),
        }

        for order in &mut query.order_by {
            self.expr(&mut order.expr, &counted);
        }

        if !order_keys.is_empty() {
            query.order_by = order_keys
                .into_iter()
                .map(|name| OrderByExpr {
                    expr: Expr::Identifier(Ident::with_quote('"', name)),
                    asc: None,
                    nulls_first: None,
                })
                .collect();
            self.ordered_selects += 1;
        }
    }

    fn set_expr(&mut self, body: &mut SetExpr) {
        match body {
            SetExpr::Select(select) => {
                self.select(select);
            }
            SetExpr::Query(query) => self.query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left);
                self.set_expr(right);
            }
            _ => {}
        }
    }

    fn select(&mut self, select: &mut Select) -> Counted {
        let mut counted = Counted::new();

        for item in &mut select.projection {
            if let SelectItem::UnnamedExpr(expr) = item {
                if contains_row_count(expr) {
                    let original = expr.clone();
                    let alias = if is_row_count_expr(&original) {
                        Ident::with_quote('"', COUNT_ALIAS)
                    } else {
                        Ident::with_quote('"', original.to_string())
                    };
                    let mut rewritten = original.clone();
                    self.expr(&mut rewritten, &[]);
                    counted.push((original, alias.clone()));
                    *item = SelectItem::ExprWithAlias {
                        expr: rewritten,
                        alias,
                    };
                    continue;
                }
            }
            match item {
                SelectItem::UnnamedExpr(expr) => self.expr(expr, &[]),
                SelectItem::ExprWithAlias { expr, alias } => {
                    if contains_row_count(expr) {
                        counted.push((expr.clone(), alias.clone()));
                    }
                    self.expr(expr, &[]);
                }
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {}
            }
        }

        for table in &mut select.from {
            self.table_with_joins(table);
        }
        if let Some(selection) = &mut select.selection {
            self.expr(selection, &[]);
        }
        if let GroupByExpr::Expressions(exprs) = &mut select.group_by {
            for expr in exprs {
                self.expr(expr, &[]);
            }
        }
        if let Some(having) = &mut select.having {
            self.expr(having, &counted);
        }

        counted
    }

    fn table_with_joins(&mut self, table: &mut TableWithJoins) {
        self.table_factor(&mut table.relation);
        for join in &mut table.joins {
            self.table_factor(&mut join.relation);
            match &mut join.join_operator {
                JoinOperator::Inner(JoinConstraint::On(expr))
                | JoinOperator::LeftOuter(JoinConstraint::On(expr))
                | JoinOperator::RightOuter(JoinConstraint::On(expr))
                | JoinOperator::FullOuter(JoinConstraint::On(expr)) => self.expr(expr, &[]),
                _ => {}
            }
        }
    }

    fn table_factor(&mut self, factor: &mut TableFactor) {
        match factor {
            TableFactor::Derived { subquery, .. } => self.query(subquery),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.table_with_joins(table_with_joins),
            _ => {}
        }
    }

    /// Rewrite row counts in `expr`; sub-expressions equal to a counted
    /// projection are replaced by that projection's output name.
    fn expr(&mut self, expr: &mut Expr, counted: &[(Expr, Ident)]) {
        if let Some((_, alias)) = counted.iter().find(|(original, _)| *original == *expr) {
            *expr = Expr::Identifier(alias.clone());
            return;
        }

        match expr {
            Expr::Function(func) => {
                if is_row_count(func) {
                    func.args = vec![FunctionArg::Unnamed(FunctionArgExpr::Expr(
                        Expr::Identifier(Ident::new(ROW_MARKER)),
                    ))];
                    self.counts_rows = true;
                    return;
                }
                for arg in &mut func.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                        | FunctionArg::Named {
                            arg: FunctionArgExpr::Expr(e),
                            ..
                        } => self.expr(e, counted),
                        _ => {}
                    }
                }
            }
            Expr::BinaryOp { left, right, .. }
            | Expr::IsDistinctFrom(left, right)
            | Expr::IsNotDistinctFrom(left, right) => {
                self.expr(left, counted);
                self.expr(right, counted);
            }
            Expr::UnaryOp { expr, .. }
            | Expr::Nested(expr)
            | Expr::IsNull(expr)
            | Expr::IsNotNull(expr)
            | Expr::IsTrue(expr)
            | Expr::IsNotTrue(expr)
            | Expr::IsFalse(expr)
            | Expr::IsNotFalse(expr)
            | Expr::Cast { expr, .. }
            | Expr::TryCast { expr, .. }
            | Expr::Extract { expr, .. }
            | Expr::Ceil { expr, .. }
            | Expr::Floor { expr, .. } => self.expr(expr, counted),
            Expr::Between {
                expr, low, high, ..
            } => {
                self.expr(expr, counted);
                self.expr(low, counted);
                self.expr(high, counted);
            }
            Expr::InList { expr, list, .. } => {
                self.expr(expr, counted);
                for item in list {
                    self.expr(item, counted);
                }
            }
            Expr::InSubquery { expr, subquery, .. } => {
                self.expr(expr, counted);
                self.query(subquery);
            }
            Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
                self.expr(expr, counted);
                self.expr(pattern, counted);
            }
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
                ..
            } => {
                if let Some(operand) = operand {
                    self.expr(operand, counted);
                }
                for e in conditions.iter_mut().chain(results.iter_mut()) {
                    self.expr(e, counted);
                }
                if let Some(else_result) = else_result {
                    self.expr(else_result, counted);
                }
            }
            Expr::Tuple(exprs) => {
                for e in exprs {
                    self.expr(e, counted);
                }
            }
            Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => self.query(subquery),
            _ => {}
        }
    }
}

fn is_row_count(func: &Function) -> bool {
    let is_count = func
        .name
        .0
        .last()
        .map(|ident| ident.value.eq_ignore_ascii_case("count"))
        .unwrap_or(false);
    if !is_count || func.distinct {
        return false;
    }
    match func.args.as_slice() {
        [] | [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => true,
        [FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::Value(value)))] => {
            !matches!(value, SqlValue::Null)
        }
        _ => false,
    }
}

fn is_row_count_expr(expr: &Expr) -> bool {
    matches!(expr, Expr::Function(func) if is_row_count(func))
}

fn contains_row_count(expr: &Expr) -> bool {
    let mut scratch = Rewriter::default();
    scratch.expr(&mut expr.clone(), &[]);
    scratch.counts_rows
}

/// Output names to order a grouped or DISTINCT select by.
///
/// DISTINCT without GROUP BY is only ordered when every output has a name:
/// polars drops unnamed computed columns from an ordered DISTINCT projection.
fn stable_order_keys(select: &Select) -> Vec<String> {
    let grouped = match &select.group_by {
        GroupByExpr::All => true,
        GroupByExpr::Expressions(exprs) => !exprs.is_empty(),
    };
    let distinct = matches!(select.distinct, Some(Distinct::Distinct));
    if !grouped && !distinct {
        return Vec::new();
    }

    let names: Vec<Option<String>> = select.projection.iter().map(output_name).collect();
    if names.is_empty() || (!grouped && names.iter().any(Option::is_none)) {
        return Vec::new();
    }
    names.into_iter().flatten().collect()
}

fn output_name(item: &SelectItem) -> Option<String> {
    match item {
        SelectItem::ExprWithAlias { alias, .. } => Some(alias.value.clone()),
        SelectItem::UnnamedExpr(Expr::Identifier(ident)) => Some(ident.value.clone()),
        SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts)) => {
            parts.last().map(|ident| ident.value.clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql(text: &str) -> String {
        rewrite(text).unwrap().sql
    }

    #[test]
    fn test_grouped_count_counts_marker_and_is_ordered() {
        let out = rewrite("SELECT Sex, COUNT(*) as count FROM df GROUP BY Sex").unwrap();
        assert!(out.counts_rows);
        assert_eq!(out.ordered_selects, 1);
        assert_eq!(
            out.sql,
            "SELECT Sex, COUNT(__dataexp_row) AS count FROM df GROUP BY Sex ORDER BY \"Sex\", \"count\""
        );
    }

    #[test]
    fn test_unaliased_count_gets_a_name() {
        assert_eq!(
            sql("SELECT COUNT(*) FROM df"),
            "SELECT COUNT(__dataexp_row) AS \"count\" FROM df"
        );
        assert_eq!(
            sql("SELECT COUNT(1) * 2 FROM df"),
            "SELECT COUNT(__dataexp_row) * 2 AS \"COUNT(1) * 2\" FROM df"
        );
    }

    #[test]
    fn test_order_by_and_having_use_the_count_name() {
        assert_eq!(
            sql("SELECT Pclass, COUNT(*) AS n FROM df GROUP BY Pclass HAVING COUNT(*) > 3 ORDER BY COUNT(*) DESC"),
            "SELECT Pclass, COUNT(__dataexp_row) AS n FROM df GROUP BY Pclass HAVING n > 3 ORDER BY n DESC"
        );
    }

    #[test]
    fn test_column_counts_are_left_alone() {
        let out = rewrite("SELECT COUNT(Age), COUNT(DISTINCT Sex) FROM df").unwrap();
        assert!(!out.counts_rows);
        assert_eq!(out.sql, "SELECT COUNT(Age), COUNT(DISTINCT Sex) FROM df");
    }

    #[test]
    fn test_nested_grouping_is_ordered_before_limit() {
        let out = rewrite(
            "WITH s AS (SELECT g, COUNT(*) AS n FROM df GROUP BY g) \
             SELECT * FROM (SELECT DISTINCT g FROM s) AS t LIMIT 3",
        )
        .unwrap();
        assert_eq!(out.ordered_selects, 2);
        assert_eq!(
            out.sql,
            "WITH s AS (SELECT g, COUNT(__dataexp_row) AS n FROM df GROUP BY g ORDER BY \"g\", \"n\") \
             SELECT * FROM (SELECT DISTINCT g FROM s ORDER BY \"g\") AS t LIMIT 3"
        );
    }

    #[test]
    fn test_explicit_order_is_kept() {
        let out = rewrite("SELECT Sex, AVG(Age) AS a FROM df GROUP BY Sex ORDER BY a DESC LIMIT 1").unwrap();
        assert_eq!(out.ordered_selects, 0);
        assert_eq!(out.sql, "SELECT Sex, AVG(Age) AS a FROM df GROUP BY Sex ORDER BY a DESC LIMIT 1");
    }

    #[test]
    fn test_distinct_with_unnamed_output_is_not_ordered() {
        let out = rewrite("SELECT DISTINCT Pclass, UPPER(Sex) FROM df").unwrap();
        assert_eq!(out.ordered_selects, 0);
    }

    #[test]
    fn test_plain_select_is_unchanged() {
        let text = "SELECT Name, Age FROM df WHERE Age > 30 LIMIT 5";
        let out = rewrite(text).unwrap();
        assert!(!out.counts_rows);
        assert_eq!(out.ordered_selects, 0);
        assert_eq!(out.sql, text);
    }
}
