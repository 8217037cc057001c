//! Artifact storage
//!
//! Saves tables under `{output_dir}/{name}.{ext}` and loads them back by
//! extension. Each format owns its own extension, so a name can exist once per
//! format; saving the same (name, format) again overwrites the file.

use crate::dataset::DatasetAccessor;
use crate::error::{DataExpError, Result};
use crate::transport;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Persisted file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Delimited text
    Csv,
    /// Record-oriented JSON, same shape as the transport string
    Json,
    /// Columnar binary
    Parquet,
    /// Native object dump, stored as Arrow IPC
    Pickle,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Csv => "csv",
            ArtifactFormat::Json => "json",
            ArtifactFormat::Parquet => "parquet",
            ArtifactFormat::Pickle => "pkl",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(ArtifactFormat::Csv),
            "json" => Some(ArtifactFormat::Json),
            "parquet" => Some(ArtifactFormat::Parquet),
            "pkl" => Some(ArtifactFormat::Pickle),
            _ => None,
        }
    }
}

impl FromStr for ArtifactFormat {
    type Err = DataExpError;

    fn from_str(token: &str) -> Result<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ArtifactFormat::Csv),
            "json" => Ok(ArtifactFormat::Json),
            "parquet" => Ok(ArtifactFormat::Parquet),
            "pickle" | "pkl" => Ok(ArtifactFormat::Pickle),
            _ => Err(DataExpError::UnsupportedFormat(token.to_string())),
        }
    }
}

impl std::fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            ArtifactFormat::Csv => "csv",
            ArtifactFormat::Json => "json",
            ArtifactFormat::Parquet => "parquet",
            ArtifactFormat::Pickle => "pickle",
        };
        write!(f, "{}", token)
    }
}

/// A file written by [`ArtifactStore::save`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedArtifact {
    #[serde(rename = "file_path")]
    pub path: PathBuf,
    pub format: ArtifactFormat,
    pub rows: usize,
    pub columns: usize,
}

pub struct ArtifactStore {
    output_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `table` as `{output_dir}/{name}.{ext}`.
    ///
    /// The format token is checked before anything touches the filesystem, so
    /// an unsupported token leaves no file behind.
    pub fn save(&self, table: &DataFrame, name: &str, format: &str) -> Result<SavedArtifact> {
        let format: ArtifactFormat = format.parse()?;
        validate_name(name)?;

        fs::create_dir_all(&self.output_dir)?;
        let path = self
            .output_dir
            .join(format!("{}.{}", name, format.extension()));

        let mut data = table.clone();
        match format {
            ArtifactFormat::Csv => {
                let mut file = File::create(&path)?;
                CsvWriter::new(&mut file)
                    .include_header(true)
                    .finish(&mut data)?;
            }
            ArtifactFormat::Json => {
                fs::write(&path, transport::to_transport(&data)?)?;
            }
            ArtifactFormat::Parquet => {
                let file = File::create(&path)?;
                ParquetWriter::new(file).finish(&mut data)?;
            }
            ArtifactFormat::Pickle => {
                let file = File::create(&path)?;
                IpcWriter::new(file).finish(&mut data)?;
            }
        }

        info!(
            "Saved {} rows x {} columns to {}",
            data.height(),
            data.width(),
            path.display()
        );

        Ok(SavedArtifact {
            path,
            format,
            rows: data.height(),
            columns: data.width(),
        })
    }

    /// Read an artifact back, choosing the reader from the file extension.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let format = ArtifactFormat::from_extension(ext)
            .ok_or_else(|| DataExpError::UnsupportedFormat(ext.to_string()))?;

        if !path.is_file() {
            return Err(DataExpError::NotFound(format!(
                "Artifact not found: {}",
                path.display()
            )));
        }

        let table = match format {
            ArtifactFormat::Csv => DatasetAccessor::default().load(path)?,
            ArtifactFormat::Json => transport::from_transport(&fs::read_to_string(path)?)?,
            ArtifactFormat::Parquet => ParquetReader::new(File::open(path)?).finish()?,
            ArtifactFormat::Pickle => IpcReader::new(File::open(path)?).finish()?,
        };

        debug!("Loaded {} artifact {}", format, path.display());
        Ok(table)
    }

    /// Most recently modified artifact of a format, if any exists.
    pub fn latest_artifact(&self, format: ArtifactFormat) -> Result<Option<PathBuf>> {
        if !self.output_dir.is_dir() {
            return Ok(None);
        }

        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(ArtifactFormat::from_extension)
                == Some(format);
            if !matches || !path.is_file() {
                continue;
            }
            let modified = fs::metadata(&path)?.modified()?;
            let newer = match &latest {
                Some((time, best)) => modified > *time || (modified == *time && path > *best),
                None => true,
            };
            if newer {
                latest = Some((modified, path));
            }
        }

        Ok(latest.map(|(_, path)| path))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..");
    if invalid {
        return Err(DataExpError::Parse(format!("Invalid artifact name: '{}'", name)));
    }
    Ok(())
}
