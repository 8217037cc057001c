//! Query Result - outcome of one executed query

use crate::error::Result;
use crate::execution::profile::QueryProfile;
use crate::transport;
use polars::prelude::*;
use serde::Serialize;

/// Executed query with its result table and timing
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Identifier attached to the query's log lines
    pub query_id: String,

    pub sql: String,

    /// Result table
    #[serde(skip)]
    pub data: DataFrame,

    pub row_count: usize,

    pub columns: Vec<String>,

    pub execution_time_ms: u64,

    /// Engine that executed the query
    pub engine_name: String,

    pub profile: QueryProfile,

    /// Non-fatal notes, e.g. an implicit sort was applied
    pub warnings: Vec<String>,
}

impl QueryResult {
    pub fn success(
        query_id: String,
        sql: &str,
        data: DataFrame,
        engine_name: &str,
        profile: QueryProfile,
        execution_time_ms: u64,
    ) -> Self {
        let columns = data
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self {
            query_id,
            sql: sql.to_string(),
            row_count: data.height(),
            columns,
            data,
            execution_time_ms,
            engine_name: engine_name.to_string(),
            profile,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Result rows in transport form
    pub fn to_transport(&self) -> Result<String> {
        transport::to_transport(&self.data)
    }

    pub fn into_table(self) -> DataFrame {
        self.data
    }
}
