//! Column type inference
//!
//! Deterministic, whole-column inference shared by the delimited-text loader
//! and the JSON transport. A column is integer if every non-null cell is an
//! integer, otherwise float, then boolean, then temporal; anything else is a
//! string column.

use crate::error::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Primitive column type reported by schemas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Integer,
    Float,
    Boolean,
    Temporal,
    String,
}

impl PrimitiveType {
    pub fn from_dtype(dtype: &DataType) -> Self {
        match dtype {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => PrimitiveType::Integer,
            DataType::Float32 | DataType::Float64 => PrimitiveType::Float,
            DataType::Boolean => PrimitiveType::Boolean,
            DataType::Date | DataType::Datetime(_, _) | DataType::Time | DataType::Duration(_) => {
                PrimitiveType::Temporal
            }
            _ => PrimitiveType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveType::Integer => "integer",
            PrimitiveType::Float => "float",
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Temporal => "temporal",
            PrimitiveType::String => "string",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, PrimitiveType::Integer | PrimitiveType::Float)
    }
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single non-null input value before its column type is decided
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl RawCell {
    /// Wrap a delimited-text field; blank fields are nulls.
    pub fn from_field(field: &str) -> Option<RawCell> {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(RawCell::Text(trimmed.to_string()))
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            RawCell::Int(i) => Some(*i),
            RawCell::Text(s) => s.parse::<i64>().ok(),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            RawCell::Int(i) => Some(*i as f64),
            RawCell::Float(f) => Some(*f),
            // "inf"/"nan" parse as floats but read as words in a dataset
            RawCell::Text(s) if s.chars().any(|c| c.is_ascii_digit()) => s.parse::<f64>().ok(),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            RawCell::Bool(b) => Some(*b),
            RawCell::Text(s) if s.eq_ignore_ascii_case("true") => Some(true),
            RawCell::Text(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            RawCell::Text(s) => s.clone(),
            RawCell::Int(i) => i.to_string(),
            RawCell::Float(f) => f.to_string(),
            RawCell::Bool(b) => b.to_string(),
        }
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

fn days_since_epoch(date: NaiveDate) -> Option<i32> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(midnight.and_utc().timestamp().div_euclid(86_400) as i32)
}

fn millis_since_epoch(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_millis()
}

/// Temporal flavour of a column whose every cell parsed as a date or datetime
enum TemporalKind {
    Date,
    Datetime,
}

fn temporal_kind(cells: &[&RawCell]) -> Option<TemporalKind> {
    let mut all_dates = true;
    for cell in cells {
        let RawCell::Text(s) = cell else {
            return None;
        };
        if parse_date(s).is_some() {
            continue;
        }
        if parse_datetime(s).is_some() {
            all_dates = false;
            continue;
        }
        return None;
    }
    Some(if all_dates {
        TemporalKind::Date
    } else {
        TemporalKind::Datetime
    })
}

/// Infer the column type from every cell and build the typed series.
pub fn build_series(name: &str, cells: &[Option<RawCell>]) -> Result<Series> {
    let present: Vec<&RawCell> = cells.iter().flatten().collect();

    if present.is_empty() {
        let values: Vec<Option<String>> = vec![None; cells.len()];
        return Ok(Series::new(name, values));
    }

    if present.iter().all(|c| c.as_int().is_some()) {
        let values: Vec<Option<i64>> = cells
            .iter()
            .map(|c| c.as_ref().and_then(RawCell::as_int))
            .collect();
        return Ok(Series::new(name, values));
    }

    if present.iter().all(|c| c.as_float().is_some()) {
        let values: Vec<Option<f64>> = cells
            .iter()
            .map(|c| c.as_ref().and_then(RawCell::as_float))
            .collect();
        return Ok(Series::new(name, values));
    }

    if present.iter().all(|c| c.as_bool().is_some()) {
        let values: Vec<Option<bool>> = cells
            .iter()
            .map(|c| c.as_ref().and_then(RawCell::as_bool))
            .collect();
        return Ok(Series::new(name, values));
    }

    match temporal_kind(&present) {
        Some(TemporalKind::Date) => {
            let days: Vec<Option<i32>> = cells
                .iter()
                .map(|c| match c {
                    Some(RawCell::Text(s)) => parse_date(s).and_then(days_since_epoch),
                    _ => None,
                })
                .collect();
            Ok(Series::new(name, days).cast(&DataType::Date)?)
        }
        Some(TemporalKind::Datetime) => {
            let millis: Vec<Option<i64>> = cells
                .iter()
                .map(|c| match c {
                    Some(RawCell::Text(s)) => parse_date(s)
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .or_else(|| parse_datetime(s))
                        .map(millis_since_epoch),
                    _ => None,
                })
                .collect();
            Ok(Series::new(name, millis).cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
        }
        None => {
            let values: Vec<Option<String>> =
                cells.iter().map(|c| c.as_ref().map(RawCell::as_text)).collect();
            Ok(Series::new(name, values))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_cells(values: &[&str]) -> Vec<Option<RawCell>> {
        values.iter().map(|v| RawCell::from_field(v)).collect()
    }

    fn inferred(values: &[&str]) -> PrimitiveType {
        let series = build_series("c", &text_cells(values)).unwrap();
        PrimitiveType::from_dtype(series.dtype())
    }

    #[test]
    fn test_inference_cascade() {
        assert_eq!(inferred(&["1", "2", "3"]), PrimitiveType::Integer);
        assert_eq!(inferred(&["1", "2.5", ""]), PrimitiveType::Float);
        assert_eq!(inferred(&["true", "FALSE", ""]), PrimitiveType::Boolean);
        assert_eq!(inferred(&["2024-01-01", "2024-02-29"]), PrimitiveType::Temporal);
        assert_eq!(inferred(&["2024-01-01", "2024-01-01T10:30:00"]), PrimitiveType::Temporal);
        assert_eq!(inferred(&["male", "female"]), PrimitiveType::String);
    }

    #[test]
    fn test_one_non_numeric_value_makes_string_column() {
        assert_eq!(inferred(&["1", "2", "3", "x"]), PrimitiveType::String);
    }

    #[test]
    fn test_words_that_parse_as_floats_stay_strings() {
        assert_eq!(inferred(&["nan", "inf"]), PrimitiveType::String);
    }

    #[test]
    fn test_blank_cells_are_nulls() {
        let series = build_series("Age", &text_cells(&["22", "", "38"])).unwrap();
        assert_eq!(series.dtype(), &DataType::Int64);
        assert_eq!(series.null_count(), 1);
    }

    #[test]
    fn test_all_null_column_is_string() {
        let series = build_series("Cabin", &text_cells(&["", " "])).unwrap();
        assert_eq!(series.dtype(), &DataType::String);
        assert_eq!(series.null_count(), 2);
    }

    #[test]
    fn test_typed_cells_merge_int_and_float() {
        let cells = vec![Some(RawCell::Int(1)), None, Some(RawCell::Float(2.5))];
        let series = build_series("v", &cells).unwrap();
        assert_eq!(series.dtype(), &DataType::Float64);
    }

    #[test]
    fn test_date_column_round_trips_epoch_days() {
        let series = build_series("d", &text_cells(&["1970-01-02"])).unwrap();
        assert_eq!(series.dtype(), &DataType::Date);
        assert_eq!(series.get(0).unwrap(), AnyValue::Date(1));
    }
}
