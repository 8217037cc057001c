//! Query Engine - executes validated SQL against an in-memory table

use crate::error::{DataExpError, Result};
use crate::execution::profile::QueryProfile;
use crate::execution::result::QueryResult;
use crate::execution::rewrite::{self, ROW_MARKER};
use polars::prelude::*;
use polars::sql::SQLContext;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name under which the table is visible to queries
pub const RELATION_NAME: &str = "df";

const SUGGESTION_THRESHOLD: f64 = 0.75;

/// Contract for engines that run a query over one table
pub trait QueryEngine: Send + Sync {
    /// Engine name (e.g., "polars")
    fn name(&self) -> &'static str;

    /// Execute `sql` and return the full result with its profile
    fn run(&self, table: &DataFrame, sql: &str) -> Result<QueryResult>;

    /// Execute `sql` and return only the result table
    fn execute(&self, table: &DataFrame, sql: &str) -> Result<DataFrame> {
        Ok(self.run(table, sql)?.into_table())
    }
}

/// Polars SQL engine with the table bound as [`RELATION_NAME`]
pub struct PolarsSqlEngine {
    relation: String,
}

impl Default for PolarsSqlEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolarsSqlEngine {
    pub fn new() -> Self {
        Self {
            relation: RELATION_NAME.to_string(),
        }
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Validate a query against the allow-list and the table's columns
    pub fn prepare(&self, table: &DataFrame, sql: &str) -> Result<QueryProfile> {
        let profile = QueryProfile::analyze(sql, &self.relation)?;
        check_columns(table, &profile)?;
        Ok(profile)
    }
}

impl QueryEngine for PolarsSqlEngine {
    fn name(&self) -> &'static str {
        "polars"
    }

    fn run(&self, table: &DataFrame, sql: &str) -> Result<QueryResult> {
        let query_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        info!(query_id = %query_id, "Executing query: {}", sql.trim());

        let profile = self.prepare(table, sql).map_err(|e| {
            warn!(query_id = %query_id, "Query rejected: {}", e);
            e
        })?;
        debug!(query_id = %query_id, ?profile, "Query accepted");

        let rewritten = rewrite::rewrite(sql)?;
        debug!(
            query_id = %query_id,
            ordered_selects = rewritten.ordered_selects,
            "Rewritten query: {}",
            rewritten.sql
        );

        let mut frame = table.clone().lazy();
        if rewritten.counts_rows {
            frame = frame.with_column(lit(1i32).alias(ROW_MARKER));
        }
        let mut ctx = SQLContext::new();
        ctx.register(&self.relation, frame);
        let mut result = ctx
            .execute(&rewritten.sql)
            .and_then(|lf| lf.collect())
            .and_then(drop_row_markers)
            .map_err(|e| {
                warn!(query_id = %query_id, "Query failed: {}", e);
                DataExpError::Execution(e.to_string())
            })?;

        let mut sorted = false;
        if profile.needs_stable_order() && result.width() > 0 && result.height() > 1 {
            let by: Vec<String> = result
                .get_column_names()
                .iter()
                .map(|s| s.to_string())
                .collect();
            result = result
                .sort(by, SortMultipleOptions::default())
                .map_err(|e| DataExpError::Execution(e.to_string()))?;
            sorted = true;
        }

        let elapsed = start.elapsed().as_millis() as u64;
        info!(
            query_id = %query_id,
            "Query returned {} rows x {} columns in {}ms",
            result.height(),
            result.width(),
            elapsed
        );

        let outcome = QueryResult::success(query_id, sql, result, self.name(), profile, elapsed);
        Ok(if sorted {
            outcome.with_warning("Result sorted on all output columns")
        } else {
            outcome
        })
    }
}

/// Every identifier must name a table column or a projection/CTE alias, and
/// numeric aggregates may not read text columns.
fn check_columns(table: &DataFrame, profile: &QueryProfile) -> Result<()> {
    let columns: Vec<&str> = table.get_column_names();
    for name in &profile.column_refs {
        let known = columns.iter().any(|c| *c == name.as_str())
            || profile.aliases.iter().any(|a| a == name)
            || profile.ctes.iter().any(|c| c == name);
        if known {
            continue;
        }
        let message = match closest_column(name, &columns) {
            Some(candidate) => format!("Unknown column '{}'. Did you mean '{}'?", name, candidate),
            None => format!(
                "Unknown column '{}'. Available columns: {}",
                name,
                columns.join(", ")
            ),
        };
        return Err(DataExpError::Execution(message));
    }

    for (function, name) in &profile.numeric_inputs {
        if profile.aliases.contains(name) {
            continue;
        }
        let Ok(column) = table.column(name) else {
            continue;
        };
        if matches!(column.dtype(), DataType::String) {
            return Err(DataExpError::Execution(format!(
                "Cannot apply {} to text column '{}'",
                function.to_uppercase(),
                name
            )));
        }
    }
    Ok(())
}

/// Marker columns reach the output through wildcards and join suffixes.
fn drop_row_markers(mut result: DataFrame) -> PolarsResult<DataFrame> {
    let markers: Vec<String> = result
        .get_column_names()
        .iter()
        .filter(|name| name.starts_with(ROW_MARKER))
        .map(|name| name.to_string())
        .collect();
    for name in markers {
        result = result.drop(&name)?;
    }
    Ok(result)
}

fn closest_column<'a>(name: &str, columns: &[&'a str]) -> Option<&'a str> {
    let needle = name.to_lowercase();
    columns
        .iter()
        .map(|c| (*c, strsim::jaro_winkler(&needle, &c.to_lowercase())))
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titanic() -> DataFrame {
        df![
            "Survived" => [0i64, 1, 1, 1, 0, 0],
            "Pclass" => [3i64, 1, 3, 1, 3, 2],
            "Sex" => ["male", "female", "female", "female", "male", "male"],
            "Age" => [Some(22.0), Some(38.0), None, Some(35.0), Some(35.0), Some(54.0)],
        ]
        .unwrap()
    }

    #[test]
    fn test_grouped_count_is_sorted_without_order_by() {
        let engine = PolarsSqlEngine::new();
        let out = engine
            .execute(&titanic(), "SELECT Sex, COUNT(*) as count FROM df GROUP BY Sex")
            .unwrap();
        assert_eq!(out.shape(), (2, 2));
        let sexes: Vec<Option<&str>> = out.column("Sex").unwrap().str().unwrap().into_iter().collect();
        assert_eq!(sexes, vec![Some("female"), Some("male")]);
        let counts: Vec<i64> = out
            .column("count")
            .unwrap()
            .cast(&DataType::Int64)
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(counts, vec![3, 3]);
    }

    fn counts(table: &DataFrame, column: &str) -> Vec<i64> {
        table
            .column(column)
            .unwrap()
            .cast(&DataType::Int64)
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect()
    }

    /// 20,000 rows over 5,000 groups of four
    fn many_groups() -> DataFrame {
        let g: Vec<i64> = (0..20_000).map(|i| (i * 7919) % 5_000).collect();
        let v: Vec<i64> = (0..20_000).collect();
        df!["g" => g, "v" => v].unwrap()
    }

    #[test]
    fn test_row_counts_are_per_group() {
        let engine = PolarsSqlEngine::new();
        let table = df![
            "Pclass" => [3i64, 1, 3, 1, 3, 3, 2],
            "Age" => [Some(22.0), None, None, Some(35.0), Some(35.0), None, Some(54.0)],
        ]
        .unwrap();

        let out = engine
            .execute(&table, "SELECT Pclass, COUNT(*) AS n, COUNT(Age) AS aged FROM df GROUP BY Pclass")
            .unwrap();
        assert_eq!(counts(&out, "Pclass"), vec![1, 2, 3]);
        assert_eq!(counts(&out, "n"), vec![2, 1, 4]);
        assert_eq!(counts(&out, "aged"), vec![1, 1, 2]);
        assert_eq!(out.get_column_names(), vec!["Pclass", "n", "aged"]);

        let unaliased = engine
            .execute(&table, "SELECT Pclass, COUNT(*) FROM df GROUP BY Pclass")
            .unwrap();
        assert_eq!(unaliased.get_column_names(), vec!["Pclass", "count"]);
        assert_eq!(counts(&unaliased, "count"), vec![2, 1, 4]);

        let total = engine.execute(&table, "SELECT COUNT(*) FROM df").unwrap();
        assert_eq!(counts(&total, "count"), vec![7]);
    }

    #[test]
    fn test_having_and_order_by_on_row_count() {
        let out = PolarsSqlEngine::new()
            .execute(
                &titanic(),
                "SELECT Pclass, COUNT(*) AS n FROM df GROUP BY Pclass HAVING COUNT(*) > 1 ORDER BY COUNT(*) DESC",
            )
            .unwrap();
        assert_eq!(counts(&out, "Pclass"), vec![3, 1]);
        assert_eq!(counts(&out, "n"), vec![3, 2]);
    }

    #[test]
    fn test_wildcard_output_has_no_marker_column() {
        let out = PolarsSqlEngine::new()
            .execute(
                &titanic(),
                "WITH c AS (SELECT COUNT(*) AS n FROM df) SELECT * FROM df",
            )
            .unwrap();
        assert_eq!(out.get_column_names(), vec!["Survived", "Pclass", "Sex", "Age"]);
        assert_eq!(out.height(), 6);
    }

    #[test]
    fn test_grouped_limit_is_stable_across_runs() {
        let engine = PolarsSqlEngine::new();
        let table = many_groups();
        for sql in [
            "SELECT g, COUNT(*) AS n FROM df GROUP BY g LIMIT 3",
            "SELECT * FROM (SELECT g, COUNT(*) AS n FROM df GROUP BY g) AS s LIMIT 3",
            "WITH s AS (SELECT g, COUNT(*) AS n FROM df GROUP BY g) SELECT g, n FROM s LIMIT 3",
            "SELECT * FROM (SELECT DISTINCT g FROM df) AS s LIMIT 3",
        ] {
            let first = engine.execute(&table, sql).unwrap();
            assert_eq!(counts(&first, "g"), vec![0, 1, 2], "{}", sql);
            if first.get_column_names().contains(&"n") {
                assert_eq!(counts(&first, "n"), vec![4, 4, 4], "{}", sql);
            }
            for _ in 0..10 {
                assert!(engine.execute(&table, sql).unwrap().equals_missing(&first), "{}", sql);
            }
        }
    }

    #[test]
    fn test_full_grouping_is_stable_across_runs() {
        let engine = PolarsSqlEngine::new();
        let table = many_groups();
        let sql = "SELECT * FROM (SELECT g, SUM(v) AS total FROM df GROUP BY g) AS s";
        let first = engine.execute(&table, sql).unwrap();
        assert_eq!(first.height(), 5_000);
        assert_eq!(counts(&first, "g"), (0..5_000).collect::<Vec<i64>>());
        for _ in 0..10 {
            assert!(engine.execute(&table, sql).unwrap().equals_missing(&first));
        }
    }

    #[test]
    fn test_numeric_aggregate_over_text_is_execution_error() {
        let engine = PolarsSqlEngine::new();
        match engine.execute(&titanic(), "SELECT SUM(Sex) FROM df").unwrap_err() {
            DataExpError::Execution(msg) => {
                assert_eq!(msg, "Cannot apply SUM to text column 'Sex'")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(engine.execute(&titanic(), "SELECT MAX(Sex) FROM df").is_ok());
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let engine = PolarsSqlEngine::new();
        let sql = "SELECT DISTINCT Pclass FROM df";
        let first = engine.execute(&titanic(), sql).unwrap();
        let second = engine.execute(&titanic(), sql).unwrap();
        assert!(first.equals_missing(&second));
    }

    #[test]
    fn test_filter_keeps_table_unchanged() {
        let engine = PolarsSqlEngine::new();
        let table = titanic();
        let out = engine
            .execute(&table, "SELECT * FROM df WHERE Age > 30")
            .unwrap();
        assert_eq!(out.height(), 4);
        assert_eq!(table.height(), 6);
    }

    #[test]
    fn test_unknown_column_suggests_closest() {
        let engine = PolarsSqlEngine::new();
        let err = engine
            .execute(&titanic(), "SELECT sex, COUNT(*) FROM df GROUP BY sex")
            .unwrap_err();
        match err {
            DataExpError::Execution(msg) => assert!(msg.contains("Did you mean 'Sex'"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_destructive_statement_is_syntax_error() {
        let engine = PolarsSqlEngine::new();
        let err = engine.execute(&titanic(), "DROP TABLE df").unwrap_err();
        assert!(matches!(err, DataExpError::QuerySyntax(_)));
    }

    #[test]
    fn test_run_reports_metadata() {
        let engine = PolarsSqlEngine::new();
        let result = engine
            .run(&titanic(), "SELECT Pclass, AVG(Age) as avg_age FROM df GROUP BY Pclass ORDER BY Pclass")
            .unwrap();
        assert_eq!(result.row_count, 3);
        assert_eq!(result.columns, vec!["Pclass", "avg_age"]);
        assert_eq!(result.engine_name, "polars");
        assert!(result.warnings.is_empty());
        assert!(!result.query_id.is_empty());
    }
}
