// src/process/ingest.rs

use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{error, info, instrument, warn};

use super::project::{project, PeriodContext};
use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_SETTLE};
use crate::error::{IngestError, SourceReadError};
use crate::schema::ColumnReconciler;
use crate::source::{read_source, Record};
use crate::store::{BatchUpserter, Row, Store};

/// Where a file's ingestion stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// Not present in the archive. Not an error.
    NotFound,
    /// Written, possibly with failed batches.
    Done,
    /// Skipped after a schema or read error.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub file: String,
    pub table: String,
    pub status: FileStatus,
    pub columns: usize,
    pub added_columns: Vec<String>,
    /// Records read from the file.
    pub records: usize,
    /// Records without an institution identifier.
    pub dropped: usize,
    /// Projected rows handed to the upserter.
    pub attempted: usize,
    /// Rows in accepted batches.
    pub written: usize,
    pub batch_errors: usize,
}

impl FileOutcome {
    fn new(file: &str, table: &str, status: FileStatus) -> Self {
        Self {
            file: file.to_string(),
            table: table.to_string(),
            status,
            columns: 0,
            added_columns: Vec::new(),
            records: 0,
            dropped: 0,
            attempted: 0,
            written: 0,
            batch_errors: 0,
        }
    }

    /// Errors this file contributes to the run total.
    pub fn errors(&self) -> usize {
        match self.status {
            FileStatus::Failed(_) => 1,
            _ => self.batch_errors,
        }
    }
}

/// Runs reconcile → project → write for one source file at a time.
pub struct Ingestor<'a, S: Store + ?Sized> {
    store: &'a S,
    batch_size: usize,
    settle: Duration,
}

impl<'a, S: Store + ?Sized> Ingestor<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
            settle: DEFAULT_SETTLE,
        }
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Ingest `path` into `table`. Never fails: problems are reported in the outcome.
    #[instrument(level = "info", skip(self, path, ctx), fields(file = %file_label(path), period = %ctx.period))]
    pub async fn ingest_file(&self, path: &Path, table: &str, ctx: &PeriodContext) -> FileOutcome {
        let file = file_label(path);

        // 1) NotFound
        if !path.is_file() {
            info!(table, "{}: not found, skipping", file);
            return FileOutcome::new(&file, table, FileStatus::NotFound);
        }

        match self.run(path, &file, table, ctx).await {
            Ok(outcome) => {
                let suffix = if outcome.batch_errors > 0 {
                    format!(" ({} batch errors)", outcome.batch_errors)
                } else {
                    String::new()
                };
                info!(
                    dropped = outcome.dropped,
                    "{} -> {}: {} rows ({} columns){}",
                    file,
                    table,
                    outcome.written,
                    outcome.columns,
                    suffix
                );
                outcome
            }
            Err(e) => {
                error!(table, error = %e, "{}: skipped", file);
                FileOutcome::new(&file, table, FileStatus::Failed(e.to_string()))
            }
        }
    }

    async fn run(
        &self,
        path: &Path,
        file: &str,
        table: &str,
        ctx: &PeriodContext,
    ) -> Result<FileOutcome, IngestError> {
        // 2) Read
        let (headers, records) = read_all(path.to_path_buf()).await?;

        // 3) Reconcile
        let reconciler = ColumnReconciler::new(self.store).settle(self.settle);
        let added = reconciler.reconcile(table, &headers).await?;

        // 4) Project
        let rows: Vec<Row> = records
            .iter()
            .filter_map(|r| project(&headers, r, ctx))
            .collect();
        let dropped = records.len() - rows.len();
        if dropped > 0 {
            warn!(table, dropped, "{}: dropped records without CU_NUMBER", file);
        }

        // 5) Write; columns added by an earlier, interrupted run may still be
        // missing from the schema view, so refresh once and retry those batches
        let upserter = BatchUpserter::new(self.store).batch_size(self.batch_size);
        let mut report = upserter.upsert_all(table, &rows).await;
        if report.has_stale_view() {
            warn!(table, "{}: schema view is stale, refreshing and retrying", file);
            match reconciler.refresh().await {
                Ok(()) => report = upserter.retry_stale(table, &rows, report).await,
                Err(e) => error!(table, error = %e, "{}: schema refresh failed", file),
            }
        }

        // 6) Done
        Ok(FileOutcome {
            columns: headers.len(),
            added_columns: added,
            records: records.len(),
            dropped,
            attempted: report.attempted,
            written: report.written,
            batch_errors: report.failures.len(),
            ..FileOutcome::new(file, table, FileStatus::Done)
        })
    }
}

/// Parse the whole file on the blocking pool.
async fn read_all(path: PathBuf) -> Result<(Vec<String>, Vec<Record>), SourceReadError> {
    let p = path.clone();
    tokio::task::spawn_blocking(move || read_source(&p)?.into_records())
        .await
        .map_err(|e| SourceReadError::new(path, e))?
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
