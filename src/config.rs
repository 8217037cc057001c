//! Runtime configuration
//!
//! Defaults can be overridden through environment variables (a `.env` file is
//! honoured by the binary) and then by CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_SAMPLE_ROWS: usize = 5;
pub const DEFAULT_BAR_ROW_LIMIT: usize = 100;
pub const DEFAULT_HISTOGRAM_BINS: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataExpConfig {
    /// Dataset the façade answers questions about
    pub data_file: PathBuf,

    /// Directory receiving saved artifacts
    pub output_dir: PathBuf,

    /// Rows included in dataset summaries
    pub sample_rows: usize,

    /// Bar and count charts above this many rows are suppressed
    pub bar_row_limit: usize,

    /// Default histogram bin count
    pub histogram_bins: u32,
}

impl Default for DataExpConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data/titanic.csv"),
            output_dir: PathBuf::from("output"),
            sample_rows: DEFAULT_SAMPLE_ROWS,
            bar_row_limit: DEFAULT_BAR_ROW_LIMIT,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
        }
    }
}

impl DataExpConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_file = std::env::var("DATAEXP_DATA_FILE")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_file);
        let output_dir = std::env::var("DATAEXP_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        Self {
            data_file,
            output_dir,
            sample_rows: env_number("DATAEXP_SAMPLE_ROWS", defaults.sample_rows),
            bar_row_limit: env_number("DATAEXP_BAR_ROW_LIMIT", defaults.bar_row_limit),
            histogram_bins: env_number("DATAEXP_HISTOGRAM_BINS", defaults.histogram_bins),
        }
    }

    pub fn with_data_file(mut self, data_file: impl Into<PathBuf>) -> Self {
        self.data_file = data_file.into();
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }
}

fn env_number<T: std::str::FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid {}={:?}, using {}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
