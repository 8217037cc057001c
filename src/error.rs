use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataExpError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Query syntax error: {0}")]
    QuerySyntax(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No cached table for key '{key}'. Available keys: [{}]", .known_keys.join(", "))]
    CacheMiss { key: String, known_keys: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::prelude::PolarsError> for DataExpError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        DataExpError::Polars(e.to_string())
    }
}

impl DataExpError {
    /// Short machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            DataExpError::NotFound(_) => "not_found",
            DataExpError::Parse(_) => "parse",
            DataExpError::QuerySyntax(_) => "query_syntax",
            DataExpError::Execution(_) => "execution",
            DataExpError::UnsupportedFormat(_) => "unsupported_format",
            DataExpError::CacheMiss { .. } => "cache_miss",
            DataExpError::Io(_) => "io",
            DataExpError::Json(_) => "json",
            DataExpError::Csv(_) => "csv",
            DataExpError::Polars(_) => "polars",
        }
    }

    /// The `{"error": ...}` object returned across the tool boundary.
    pub fn to_sentinel(&self) -> serde_json::Value {
        json!({ "error": self.to_string() })
    }
}

pub type Result<T> = std::result::Result<T, DataExpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_message() {
        let err = DataExpError::UnsupportedFormat("unknownformat".to_string());
        assert_eq!(err.to_string(), "Unsupported format: unknownformat");
        assert_eq!(
            err.to_sentinel(),
            json!({ "error": "Unsupported format: unknownformat" })
        );
    }

    #[test]
    fn test_cache_miss_lists_keys() {
        let err = DataExpError::CacheMiss {
            key: "missing".to_string(),
            known_keys: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No cached table for key 'missing'. Available keys: [a, b]"
        );
        assert_eq!(err.kind(), "cache_miss");
    }
}
