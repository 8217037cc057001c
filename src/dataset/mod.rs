//! Dataset Accessor
//!
//! Loads a delimited-text dataset into an in-memory table and reports its
//! schema and summary statistics.

pub mod inference;

use crate::config::DEFAULT_SAMPLE_ROWS;
use crate::error::{DataExpError, Result};
use crate::transport;
use csv::ReaderBuilder;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

pub use inference::{PrimitiveType, RawCell};

/// Column name and inferred primitive type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: PrimitiveType,
}

/// Schema and summary statistics of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// (rows, columns)
    pub shape: (usize, usize),
    pub columns: Vec<ColumnSchema>,
    pub null_counts: BTreeMap<String, usize>,
    pub sample_data: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl DatasetSummary {
    pub fn row_count(&self) -> usize {
        self.shape.0
    }

    pub fn column_count(&self) -> usize {
        self.shape.1
    }

    pub fn total_nulls(&self) -> usize {
        self.null_counts.values().sum()
    }
}

/// Derive the schema of a table
pub fn schema_of(table: &DataFrame) -> Vec<ColumnSchema> {
    table
        .get_columns()
        .iter()
        .map(|s| ColumnSchema {
            name: s.name().to_string(),
            data_type: PrimitiveType::from_dtype(s.dtype()),
        })
        .collect()
}

pub struct DatasetAccessor {
    sample_rows: usize,
}

impl Default for DatasetAccessor {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_ROWS)
    }
}

impl DatasetAccessor {
    pub fn new(sample_rows: usize) -> Self {
        Self { sample_rows }
    }

    /// Load a delimited-text file
    pub fn load(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DataExpError::NotFound(format!(
                "Data file not found: {}",
                path.display()
            )));
        }

        let file = std::fs::File::open(path)
            .map_err(|e| DataExpError::NotFound(format!("{}: {}", path.display(), e)))?;
        let table = read_delimited(file)?;

        info!(
            "Loaded {} ({} rows x {} columns)",
            path.display(),
            table.height(),
            table.width()
        );
        Ok(table)
    }

    /// Parse delimited text held in memory
    pub fn load_str(&self, text: &str) -> Result<DataFrame> {
        read_delimited(text.as_bytes())
    }

    /// Header names only, without reading the data rows
    pub fn column_names(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DataExpError::NotFound(format!(
                "Data file not found: {}",
                path.display()
            )));
        }
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
        let headers = reader
            .headers()
            .map_err(|e| DataExpError::Parse(format!("Failed to read header: {}", e)))?;
        Ok(headers.iter().map(|h| h.trim().to_string()).collect())
    }

    /// Summarize a table; never mutates it
    pub fn describe(&self, table: &DataFrame) -> Result<DatasetSummary> {
        let columns = schema_of(table);
        let null_counts = table
            .get_columns()
            .iter()
            .map(|s| (s.name().to_string(), s.null_count()))
            .collect();
        let sample = table.head(Some(self.sample_rows));
        let sample_data = transport::table_to_records(&sample)?;

        debug!("Described table with {} columns", columns.len());

        Ok(DatasetSummary {
            shape: (table.height(), table.width()),
            columns,
            null_counts,
            sample_data,
        })
    }
}

fn read_delimited<R: Read>(source: R) -> Result<DataFrame> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(source);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DataExpError::Parse(format!("Failed to read header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(DataExpError::Parse("Missing header row".to_string()));
    }
    let mut seen = HashSet::new();
    for header in &headers {
        if header.is_empty() {
            return Err(DataExpError::Parse("Empty column name in header".to_string()));
        }
        if !seen.insert(header.as_str()) {
            return Err(DataExpError::Parse(format!("Duplicate column name: {}", header)));
        }
    }

    let mut columns: Vec<Vec<Option<RawCell>>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record.map_err(|e| match e.kind() {
            csv::ErrorKind::UnequalLengths {
                pos,
                expected_len,
                len,
            } => DataExpError::Parse(format!(
                "Inconsistent column count at line {}: expected {}, found {}",
                pos.as_ref().map(|p| p.line()).unwrap_or_default(),
                expected_len,
                len
            )),
            _ => DataExpError::Parse(format!("Malformed record: {}", e)),
        })?;
        for (column, field) in columns.iter_mut().zip(record.iter()) {
            column.push(RawCell::from_field(field));
        }
    }

    let series = headers
        .iter()
        .zip(columns.iter())
        .map(|(name, cells)| inference::build_series(name, cells))
        .collect::<Result<Vec<_>>>()?;

    Ok(DataFrame::new(series)?)
}
