// src/store/upsert.rs

use tracing::{debug, error, info, instrument};

use super::{BatchWriter, Row, CONFLICT_KEY};
use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::{BackendError, BatchWriteError};

/// Outcome of writing one file's rows.
#[derive(Debug, Default)]
pub struct UpsertReport {
    /// Rows handed to the upserter.
    pub attempted: usize,
    /// Rows that were part of a batch the backend accepted.
    pub written: usize,
    pub failures: Vec<BatchWriteError>,
}

impl UpsertReport {
    /// Whether any batch was refused because the schema view lagged behind.
    pub fn has_stale_view(&self) -> bool {
        self.failures
            .iter()
            .any(|f| matches!(f.source, BackendError::StaleView { .. }))
    }
}

/// Writes rows in fixed-size contiguous batches keyed on `CONFLICT_KEY`.
/// A rejected batch is recorded and the remaining batches are still attempted.
pub struct BatchUpserter<'a, W: BatchWriter + ?Sized> {
    writer: &'a W,
    batch_size: usize,
}

impl<'a, W: BatchWriter + ?Sized> BatchUpserter<'a, W> {
    pub fn new(writer: &'a W) -> Self {
        Self {
            writer,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    #[instrument(level = "debug", skip(self, rows), fields(rows = rows.len()))]
    pub async fn upsert_all(&self, table: &str, rows: &[Row]) -> UpsertReport {
        let mut report = UpsertReport {
            attempted: rows.len(),
            ..Default::default()
        };
        for (batch, chunk) in rows.chunks(self.batch_size).enumerate() {
            self.write_batch(table, batch, chunk, &mut report).await;
        }
        report
    }

    /// Write again every batch in `report` that failed on a stale schema view.
    /// `rows` must be the slice the report was produced from.
    pub async fn retry_stale(&self, table: &str, rows: &[Row], report: UpsertReport) -> UpsertReport {
        let chunks: Vec<&[Row]> = rows.chunks(self.batch_size).collect();
        let mut retried = UpsertReport {
            attempted: report.attempted,
            written: report.written,
            failures: Vec::new(),
        };

        for failure in report.failures {
            let stale = matches!(failure.source, BackendError::StaleView { .. });
            let chunk = match chunks.get(failure.batch) {
                Some(chunk) if stale => *chunk,
                _ => {
                    retried.failures.push(failure);
                    continue;
                }
            };
            info!(table, batch = failure.batch, "retrying batch after schema refresh");
            self.write_batch(table, failure.batch, chunk, &mut retried).await;
        }
        retried
    }

    async fn write_batch(&self, table: &str, batch: usize, chunk: &[Row], report: &mut UpsertReport) {
        match self.writer.upsert_batch(table, chunk, &CONFLICT_KEY).await {
            Ok(()) => {
                report.written += chunk.len();
                debug!(table, batch, rows = chunk.len(), "batch written");
            }
            Err(source) => {
                error!(table, batch, rows = chunk.len(), error = %source, "batch upsert failed");
                report.failures.push(BatchWriteError {
                    table: table.to_string(),
                    batch,
                    rows: chunk.len(),
                    source,
                });
            }
        }
    }
}
