//! Query Profile - allow-listed analysis of the SQL AST
//!
//! Every query is parsed with `sqlparser` and walked before execution. Only a
//! read-only relational subset is accepted: one `SELECT` statement (optionally
//! with CTEs, subqueries, joins and set operations) reading from the bound
//! relation. Anything the walker does not recognise is rejected, so new syntax
//! is closed by default.

use crate::error::{DataExpError, Result};
use serde::Serialize;
use sqlparser::ast::{
    Expr, Function, FunctionArg, FunctionArgExpr, GroupByExpr, JoinConstraint, JoinOperator,
    Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

const AGGREGATE_FUNCTIONS: &[&str] = &[
    "count", "sum", "avg", "mean", "min", "max", "median", "stddev", "stddev_samp", "variance",
    "var_samp", "first", "last",
];

/// Aggregates that only make sense over numbers
const NUMERIC_AGGREGATES: &[&str] = &[
    "sum", "avg", "mean", "median", "stddev", "stddev_samp", "variance", "var_samp",
];

const SCALAR_FUNCTIONS: &[&str] = &[
    "round", "abs", "ceil", "ceiling", "floor", "sqrt", "ln", "log", "log2", "log10", "exp",
    "pow", "power", "mod", "sign", "lower", "upper", "length", "char_length", "octet_length",
    "trim", "ltrim", "rtrim", "substr", "substring", "left", "right", "concat", "concat_ws",
    "replace", "reverse", "starts_with", "ends_with", "strpos", "coalesce", "nullif", "ifnull",
    "greatest", "least", "date_part", "date", "strftime", "row_number", "rank", "dense_rank",
];

/// Characteristics of an accepted query
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryProfile {
    /// Relations named in FROM/JOIN clauses
    pub relations: Vec<String>,

    /// Names declared by WITH clauses
    pub ctes: Vec<String>,

    /// Lower-cased function names
    pub functions: Vec<String>,

    /// Column identifiers referenced anywhere in the query
    pub column_refs: Vec<String>,

    /// Output aliases declared in projections
    pub aliases: Vec<String>,

    /// (function, column) pairs where a numeric aggregate reads a bare column
    pub numeric_inputs: Vec<(String, String)>,

    /// Outermost SELECT has GROUP BY
    pub has_group_by: bool,

    /// Outermost SELECT is DISTINCT or the body is a set operation
    pub has_distinct: bool,

    /// Outermost query has ORDER BY
    pub has_order_by: bool,

    pub has_aggregate: bool,

    #[serde(skip)]
    depth: usize,
}

impl QueryProfile {
    /// Parse and validate `sql`, which may only read from `relation`.
    pub fn analyze(sql: &str, relation: &str) -> Result<Self> {
        let dialect = GenericDialect {};
        let statements = Parser::parse_sql(&dialect, sql)
            .map_err(|e| DataExpError::QuerySyntax(e.to_string()))?;

        let statement = match statements.as_slice() {
            [] => return Err(DataExpError::QuerySyntax("Empty query".to_string())),
            [single] => single,
            many => {
                return Err(DataExpError::QuerySyntax(format!(
                    "Expected a single statement, found {}",
                    many.len()
                )))
            }
        };

        let mut profile = Self::default();
        match statement {
            Statement::Query(query) => profile.visit_query(query)?,
            other => {
                let keyword = other
                    .to_string()
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_uppercase();
                return Err(DataExpError::QuerySyntax(format!(
                    "Only read-only SELECT queries are allowed, found {}",
                    keyword
                )));
            }
        }

        for name in &profile.relations {
            let is_bound = name.eq_ignore_ascii_case(relation);
            let is_cte = profile.ctes.iter().any(|c| c.eq_ignore_ascii_case(name));
            if !is_bound && !is_cte {
                return Err(DataExpError::QuerySyntax(format!(
                    "Unknown relation '{}'; queries may only read from '{}'",
                    name, relation
                )));
            }
        }

        profile.column_refs.sort();
        profile.column_refs.dedup();
        profile.functions.sort();
        profile.functions.dedup();

        Ok(profile)
    }

    /// Grouped or de-duplicated output without ORDER BY has no inherent order.
    pub fn needs_stable_order(&self) -> bool {
        !self.has_order_by && (self.has_group_by || self.has_distinct)
    }

    fn visit_query(&mut self, query: &Query) -> Result<()> {
        self.depth += 1;
        let top_level = self.depth == 1;

        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.push(cte.alias.name.value.clone());
                self.visit_query(&cte.query)?;
            }
        }

        self.visit_set_expr(&query.body, top_level)?;

        if top_level && !query.order_by.is_empty() {
            self.has_order_by = true;
        }
        for order in &query.order_by {
            self.visit_expr(&order.expr)?;
        }
        if let Some(limit) = &query.limit {
            self.visit_expr(limit)?;
        }
        if let Some(offset) = &query.offset {
            self.visit_expr(&offset.value)?;
        }

        self.depth -= 1;
        Ok(())
    }

    fn visit_set_expr(&mut self, body: &SetExpr, top_level: bool) -> Result<()> {
        match body {
            SetExpr::Select(select) => self.visit_select(select, top_level),
            SetExpr::Query(query) => self.visit_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                if top_level {
                    self.has_distinct = true;
                }
                self.visit_set_expr(left, false)?;
                self.visit_set_expr(right, false)
            }
            other => Err(DataExpError::QuerySyntax(format!(
                "Unsupported query body: {}",
                other
            ))),
        }
    }

    fn visit_select(&mut self, select: &Select, top_level: bool) -> Result<()> {
        if select.into.is_some() {
            return Err(DataExpError::QuerySyntax(
                "SELECT INTO is not allowed".to_string(),
            ));
        }
        if top_level && select.distinct.is_some() {
            self.has_distinct = true;
        }

        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => self.visit_expr(expr)?,
                SelectItem::ExprWithAlias { expr, alias } => {
                    self.aliases.push(alias.value.clone());
                    self.visit_expr(expr)?;
                }
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {}
            }
        }

        for table in &select.from {
            self.visit_table_with_joins(table)?;
        }

        if let Some(selection) = &select.selection {
            self.visit_expr(selection)?;
        }

        match &select.group_by {
            GroupByExpr::All => {
                if top_level {
                    self.has_group_by = true;
                }
            }
            GroupByExpr::Expressions(exprs) => {
                if top_level && !exprs.is_empty() {
                    self.has_group_by = true;
                }
                for expr in exprs {
                    self.visit_expr(expr)?;
                }
            }
        }

        if let Some(having) = &select.having {
            self.visit_expr(having)?;
        }

        Ok(())
    }

    fn visit_table_with_joins(&mut self, table: &TableWithJoins) -> Result<()> {
        self.visit_table_factor(&table.relation)?;
        for join in &table.joins {
            self.visit_table_factor(&join.relation)?;
            match &join.join_operator {
                JoinOperator::Inner(constraint)
                | JoinOperator::LeftOuter(constraint)
                | JoinOperator::RightOuter(constraint)
                | JoinOperator::FullOuter(constraint) => {
                    if let JoinConstraint::On(expr) = constraint {
                        self.visit_expr(expr)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn visit_table_factor(&mut self, factor: &TableFactor) -> Result<()> {
        match factor {
            TableFactor::Table { name, args, .. } => {
                if args.is_some() {
                    return Err(DataExpError::QuerySyntax(format!(
                        "Table functions are not allowed: {}",
                        name
                    )));
                }
                match name.0.as_slice() {
                    [ident] => {
                        self.relations.push(ident.value.clone());
                        Ok(())
                    }
                    _ => Err(DataExpError::QuerySyntax(format!(
                        "Qualified relation names are not allowed: {}",
                        name
                    ))),
                }
            }
            TableFactor::Derived { subquery, .. } => self.visit_query(subquery),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.visit_table_with_joins(table_with_joins),
            other => Err(DataExpError::QuerySyntax(format!(
                "Unsupported FROM clause: {}",
                other
            ))),
        }
    }

    fn visit_function(&mut self, func: &Function) -> Result<()> {
        let name = func
            .name
            .0
            .last()
            .map(|ident| ident.value.to_lowercase())
            .unwrap_or_default();

        if AGGREGATE_FUNCTIONS.contains(&name.as_str()) {
            self.has_aggregate = true;
            if NUMERIC_AGGREGATES.contains(&name.as_str()) {
                if let [FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))] = func.args.as_slice() {
                    if let Some(column) = bare_column(arg) {
                        self.numeric_inputs.push((name.clone(), column));
                    }
                }
            }
        } else if !SCALAR_FUNCTIONS.contains(&name.as_str()) {
            return Err(DataExpError::QuerySyntax(format!(
                "Function not allowed: {}",
                func.name
            )));
        }
        self.functions.push(name);

        for arg in &func.args {
            match arg {
                FunctionArg::Unnamed(arg) | FunctionArg::Named { arg, .. } => {
                    if let FunctionArgExpr::Expr(expr) = arg {
                        self.visit_expr(expr)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn visit_exprs(&mut self, exprs: &[Expr]) -> Result<()> {
        for expr in exprs {
            self.visit_expr(expr)?;
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Identifier(ident) => {
                self.column_refs.push(ident.value.clone());
                Ok(())
            }
            Expr::CompoundIdentifier(parts) => {
                if let Some(last) = parts.last() {
                    self.column_refs.push(last.value.clone());
                }
                Ok(())
            }
            Expr::Value(_) | Expr::TypedString { .. } | Expr::Interval(_) => Ok(()),
            Expr::Function(func) => self.visit_function(func),
            Expr::BinaryOp { left, right, .. } => {
                self.visit_expr(left)?;
                self.visit_expr(right)
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
            | Expr::Floor { expr, .. } => self.visit_expr(expr),
            Expr::IsDistinctFrom(left, right) | Expr::IsNotDistinctFrom(left, right) => {
                self.visit_expr(left)?;
                self.visit_expr(right)
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.visit_expr(expr)?;
                self.visit_expr(low)?;
                self.visit_expr(high)
            }
            Expr::InList { expr, list, .. } => {
                self.visit_expr(expr)?;
                self.visit_exprs(list)
            }
            Expr::InSubquery { expr, subquery, .. } => {
                self.visit_expr(expr)?;
                self.visit_query(subquery)
            }
            Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
                self.visit_expr(expr)?;
                self.visit_expr(pattern)
            }
            Expr::Substring {
                expr,
                substring_from,
                substring_for,
                ..
            } => {
                self.visit_expr(expr)?;
                if let Some(from) = substring_from {
                    self.visit_expr(from)?;
                }
                if let Some(length) = substring_for {
                    self.visit_expr(length)?;
                }
                Ok(())
            }
            Expr::Trim {
                expr, trim_what, ..
            } => {
                self.visit_expr(expr)?;
                if let Some(what) = trim_what {
                    self.visit_expr(what)?;
                }
                Ok(())
            }
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
                ..
            } => {
                if let Some(operand) = operand {
                    self.visit_expr(operand)?;
                }
                self.visit_exprs(conditions)?;
                self.visit_exprs(results)?;
                if let Some(else_result) = else_result {
                    self.visit_expr(else_result)?;
                }
                Ok(())
            }
            Expr::Tuple(exprs) => self.visit_exprs(exprs),
            Expr::Exists { subquery, .. } => self.visit_query(subquery),
            Expr::Subquery(query) => self.visit_query(query),
            other => Err(DataExpError::QuerySyntax(format!(
                "Unsupported expression: {}",
                other
            ))),
        }
    }
}

fn bare_column(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|ident| ident.value.clone()),
        Expr::Nested(inner) => bare_column(inner),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(sql: &str) -> Result<QueryProfile> {
        QueryProfile::analyze(sql, "df")
    }

    fn rejected(sql: &str) -> String {
        match analyze(sql) {
            Err(DataExpError::QuerySyntax(msg)) => msg,
            other => panic!("expected syntax rejection for {:?}, got {:?}", sql, other),
        }
    }

    #[test]
    fn test_accepts_grouped_aggregate() {
        let profile = analyze("SELECT Sex, COUNT(*) as count FROM df GROUP BY Sex").unwrap();
        assert!(profile.has_group_by);
        assert!(profile.has_aggregate);
        assert!(!profile.has_order_by);
        assert!(profile.needs_stable_order());
        assert_eq!(profile.relations, vec!["df"]);
        assert_eq!(profile.column_refs, vec!["Sex"]);
        assert_eq!(profile.aliases, vec!["count"]);
    }

    #[test]
    fn test_records_numeric_aggregate_inputs() {
        let profile = analyze("SELECT SUM(Sex), AVG(df.Age), MAX(Name), SUM(Age + 1) FROM df").unwrap();
        assert_eq!(
            profile.numeric_inputs,
            vec![
                ("sum".to_string(), "Sex".to_string()),
                ("avg".to_string(), "Age".to_string()),
            ]
        );
    }

    #[test]
    fn test_order_by_means_no_extra_sort() {
        let profile = analyze(
            "SELECT Pclass, AVG(Age) as avg_age FROM df WHERE Age IS NOT NULL GROUP BY Pclass ORDER BY Pclass",
        )
        .unwrap();
        assert!(profile.has_order_by);
        assert!(!profile.needs_stable_order());
    }

    #[test]
    fn test_ctes_and_subqueries_are_allowed() {
        let profile = analyze(
            "WITH adults AS (SELECT * FROM df WHERE Age >= 18) \
             SELECT Sex, COUNT(*) FROM adults WHERE Fare > (SELECT AVG(Fare) FROM df) GROUP BY Sex",
        )
        .unwrap();
        assert_eq!(profile.ctes, vec!["adults"]);
    }

    #[test]
    fn test_rejects_writes_and_ddl() {
        assert!(rejected("DROP TABLE df").contains("DROP"));
        assert!(rejected("DELETE FROM df WHERE Age > 3").contains("DELETE"));
        assert!(rejected("CREATE TABLE t AS SELECT * FROM df").contains("CREATE"));
        rejected("INSERT INTO df VALUES (1)");
    }

    #[test]
    fn test_rejects_multiple_statements() {
        let msg = rejected("SELECT * FROM df; SELECT * FROM df");
        assert!(msg.contains("single statement"));
    }

    #[test]
    fn test_rejects_other_relations_and_table_functions() {
        assert!(rejected("SELECT * FROM passwords").contains("Unknown relation"));
        assert!(rejected("SELECT * FROM read_csv('/etc/passwd')").contains("Table functions"));
        assert!(rejected("SELECT * FROM other.df").contains("Qualified"));
    }

    #[test]
    fn test_rejects_unlisted_functions() {
        assert!(rejected("SELECT read_file('x') FROM df").contains("Function not allowed"));
    }

    #[test]
    fn test_rejects_garbage_and_empty_text() {
        rejected("SELEKT everything");
        assert_eq!(rejected("   "), "Empty query");
    }
}
