//! Structured error types for data loading.

use chrono::{DateTime, NaiveDate, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal data errors. Malformed rows are not errors; they are skipped and
/// counted in the [`LoadReport`](super::LoadReport).
#[derive(Debug, Error)]
pub enum DataError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error in {path}: {message}")]
    Csv { path: PathBuf, message: String },

    #[error("json error in {path}: {message}")]
    Json { path: PathBuf, message: String },

    #[error("parquet error in {path}: {message}")]
    Parquet { path: PathBuf, message: String },

    #[error("unsupported data format for {0} (expected .csv, .json or .parquet)")]
    UnsupportedFormat(PathBuf),

    #[error("{path}: missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: String },

    #[error(
        "{path}:{row}: bars for '{symbol}' out of order ({timestamp} comes after {previous})"
    )]
    OutOfOrder {
        path: PathBuf,
        row: usize,
        symbol: String,
        previous: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    #[error("symbol '{symbol}' has no valid rows ({skipped} rows skipped as malformed)")]
    NoValidRows { symbol: String, skipped: usize },

    #[error("symbol '{symbol}' has no bars between {start:?} and {end:?}")]
    NoBarsInRange {
        symbol: String,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

impl DataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataError::Io {
            path: path.into(),
            source,
        }
    }
}
