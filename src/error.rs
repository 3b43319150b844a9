//! Error taxonomy for the bronze import.
//!
//! Schema and read errors are file-level: they skip the current file.
//! Batch write errors are batch-level: they are counted and the file carries on.
//! Rows dropped for lacking an institution identifier are not errors at all and
//! only show up as a counter on the file outcome.

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by a storage backend primitive.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown table `{0}`")]
    UnknownTable(String),

    /// A write named columns the backend's schema view does not (yet) know.
    #[error("columns {columns:?} are not in the current schema view of `{table}`")]
    StaleView { table: String, columns: Vec<String> },

    #[error("column `{column}` on `{table}` already exists as {existing}")]
    IncompatibleColumn {
        table: String,
        column: String,
        existing: String,
    },

    #[error("backend rejected request (HTTP {status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
}

/// Schema registry errors. Fatal for the file being ingested.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("listing columns of `{table}` failed: {source}")]
    Query {
        table: String,
        #[source]
        source: BackendError,
    },

    #[error("adding column `{column}` to `{table}` failed: {source}")]
    Mutation {
        table: String,
        column: String,
        #[source]
        source: BackendError,
    },

    #[error("refreshing the schema view failed: {source}")]
    Refresh {
        #[source]
        source: BackendError,
    },
}

/// A source file that exists but could not be read or parsed.
#[derive(Debug, Error)]
#[error("reading {}: {reason}", .path.display())]
pub struct SourceReadError {
    pub path: PathBuf,
    pub reason: String,
}

impl SourceReadError {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// One rejected upsert batch.
#[derive(Debug, Error)]
#[error("batch {batch} ({rows} rows) into `{table}` failed: {source}")]
pub struct BatchWriteError {
    pub table: String,
    pub batch: usize,
    pub rows: usize,
    #[source]
    pub source: BackendError,
}

/// Why a file was skipped after it was found.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Read(#[from] SourceReadError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("invalid quarter format: \"{0}\". Expected YYYY-QN (e.g. 2025-Q3)")]
    Invalid(String),

    #[error("invalid range: {start} to {end}")]
    EmptyRange { start: String, end: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("env file not found: {}", .0.display())]
    EnvFileMissing(PathBuf),

    #[error("reading env file {}: {reason}", .path.display())]
    EnvFile { path: PathBuf, reason: String },

    #[error("missing required variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },

    #[error("import blocked: target {0} is not in the allow list")]
    TargetNotAllowed(String),
}
