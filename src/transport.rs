//! Record-oriented JSON transport
//!
//! A table travels as a JSON array holding one object per row. Temporal values
//! are ISO-8601 strings, nulls and non-finite floats are JSON `null`.
//!
//! A table with no rows serializes to `[]` and comes back with no columns.

use crate::dataset::inference::{self, RawCell};
use crate::error::{DataExpError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

/// Serialize a table to its transport string
pub fn to_transport(table: &DataFrame) -> Result<String> {
    let records = table_to_records(table)?;
    Ok(serde_json::to_string(&records)?)
}

/// Parse a transport string back into a table
pub fn from_transport(text: &str) -> Result<DataFrame> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| DataExpError::Parse(format!("Invalid transport JSON: {}", e)))?;
    let Value::Array(rows) = value else {
        return Err(DataExpError::Parse(
            "Transport payload must be a JSON array of records".to_string(),
        ));
    };
    records_to_table(&rows)
}

/// Convert every row of a table to a JSON object
pub fn table_to_records(table: &DataFrame) -> Result<Vec<Record>> {
    let columns = table.get_columns();
    let mut rows = Vec::with_capacity(table.height());

    for row_idx in 0..table.height() {
        let mut row = Map::with_capacity(columns.len());
        for series in columns {
            let value = series.get(row_idx)?;
            row.insert(series.name().to_string(), any_value_to_json(&value));
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Build a table from JSON records. Column order follows first appearance of
/// each key; a key missing from a record is a null in that row.
pub fn records_to_table(rows: &[Value]) -> Result<DataFrame> {
    let mut names: Vec<String> = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        let Value::Object(obj) = row else {
            return Err(DataExpError::Parse(format!(
                "Record {} is not a JSON object",
                idx
            )));
        };
        for key in obj.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }

    let series = names
        .iter()
        .map(|name| {
            let cells: Vec<Option<RawCell>> = rows
                .iter()
                .map(|row| row.get(name).and_then(json_to_cell))
                .collect();
            inference::build_series(name, &cells)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DataFrame::new(series)?)
}

fn json_to_cell(value: &Value) -> Option<RawCell> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(RawCell::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(RawCell::Int(i)),
            None => n.as_f64().map(RawCell::Float),
        },
        Value::String(s) => Some(RawCell::Text(s.clone())),
        other => Some(RawCell::Text(other.to_string())),
    }
}

fn float_to_json(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    DateTime::from_timestamp(days as i64 * 86_400, 0).map(|dt| dt.date_naive())
}

fn datetime_from_epoch(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let per_second: i64 = match unit {
        TimeUnit::Nanoseconds => 1_000_000_000,
        TimeUnit::Microseconds => 1_000_000,
        TimeUnit::Milliseconds => 1_000,
    };
    let seconds = value.div_euclid(per_second);
    let nanos = (value.rem_euclid(per_second) * (1_000_000_000 / per_second)) as u32;
    DateTime::from_timestamp(seconds, nanos).map(|dt| dt.naive_utc())
}

pub(crate) fn any_value_to_json(value: &AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(i) => Value::Number((*i).into()),
        AnyValue::Int16(i) => Value::Number((*i).into()),
        AnyValue::Int32(i) => Value::Number((*i).into()),
        AnyValue::Int64(i) => Value::Number((*i).into()),
        AnyValue::UInt8(u) => Value::Number((*u).into()),
        AnyValue::UInt16(u) => Value::Number((*u).into()),
        AnyValue::UInt32(u) => Value::Number((*u).into()),
        AnyValue::UInt64(u) => Value::Number((*u).into()),
        AnyValue::Float32(f) => float_to_json(*f as f64),
        AnyValue::Float64(f) => float_to_json(*f),
        AnyValue::Date(days) => date_from_epoch_days(*days)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        AnyValue::Datetime(v, unit, _) => datetime_from_epoch(*v, *unit)
            .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()))
            .unwrap_or(Value::Null),
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DataFrame {
        df![
            "Sex" => ["male", "female", "female"],
            "Age" => [Some(22.0), None, Some(35.5)],
            "Survived" => [0i64, 1, 1],
        ]
        .unwrap()
    }

    #[test]
    fn test_transport_is_record_oriented() {
        let text = to_transport(&sample()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value[0],
            json!({ "Sex": "male", "Age": 22.0, "Survived": 0 })
        );
        assert_eq!(value[1]["Age"], Value::Null);
    }

    #[test]
    fn test_round_trip_preserves_rows_columns_and_values() {
        let original = sample();
        let restored = from_transport(&to_transport(&original).unwrap()).unwrap();
        assert_eq!(restored.shape(), original.shape());
        assert_eq!(restored.get_column_names(), original.get_column_names());
        assert!(restored.equals_missing(&original));
    }

    #[test]
    fn test_temporal_values_use_iso_8601() {
        let table = records_to_table(&[json!({ "when": "2024-03-01T12:30:00" })]).unwrap();
        let text = to_transport(&table).unwrap();
        assert!(text.contains("2024-03-01T12:30:00.000"), "{}", text);

        let dates = records_to_table(&[json!({ "day": "1912-04-15" })]).unwrap();
        assert_eq!(to_transport(&dates).unwrap(), r#"[{"day":"1912-04-15"}]"#);
    }

    #[test]
    fn test_missing_keys_become_nulls() {
        let table = records_to_table(&[json!({ "a": 1, "b": "x" }), json!({ "a": 2 })]).unwrap();
        assert_eq!(table.get_column_names(), vec!["a", "b"]);
        assert_eq!(table.column("b").unwrap().null_count(), 1);
    }

    #[test]
    fn test_non_array_payload_is_parse_error() {
        let err = from_transport(r#"{"error": "boom"}"#).unwrap_err();
        assert!(matches!(err, DataExpError::Parse(_)));
    }

    #[test]
    fn test_empty_array_is_empty_table() {
        let table = from_transport("[]").unwrap();
        assert_eq!(table.shape(), (0, 0));
    }

    #[test]
    fn test_zero_row_table_does_not_keep_its_columns() {
        let empty = sample().head(Some(0));
        assert_eq!(empty.shape(), (0, 3));
        let text = to_transport(&empty).unwrap();
        assert_eq!(text, "[]");
        assert_eq!(from_transport(&text).unwrap().shape(), (0, 0));
    }
}
