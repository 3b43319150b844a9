// src/orchestrator.rs

use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::fetch::ArchiveProvider;
use crate::period::Period;
use crate::process::{FileOutcome, Ingestor, PeriodContext};
use crate::source::SourceFileSpec;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct PeriodSummary {
    pub period: Period,
    pub source_url: String,
    pub files: Vec<FileOutcome>,
}

impl PeriodSummary {
    pub fn rows(&self) -> usize {
        self.files.iter().map(|f| f.written).sum()
    }

    pub fn errors(&self) -> usize {
        self.files.iter().map(FileOutcome::errors).sum()
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub periods: Vec<PeriodSummary>,
    /// Periods whose archive could not be acquired, with the cause.
    pub failed_periods: Vec<(Period, String)>,
    /// Set when the run was stopped early.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn rows(&self) -> usize {
        self.periods.iter().map(PeriodSummary::rows).sum()
    }

    pub fn errors(&self) -> usize {
        self.periods.iter().map(PeriodSummary::errors).sum::<usize>() + self.failed_periods.len()
    }

    pub fn is_clean(&self) -> bool {
        self.errors() == 0 && !self.cancelled
    }
}

/// Imports periods one after another, each file in `files` order.
///
/// A period whose archive cannot be acquired is recorded and skipped; later
/// periods still run. Cancellation is honoured between files and periods.
pub struct Orchestrator<'a, A: ArchiveProvider + ?Sized, S: Store + ?Sized> {
    archives: &'a A,
    ingestor: Ingestor<'a, S>,
    files: &'a [SourceFileSpec],
    cancel: CancellationToken,
}

impl<'a, A: ArchiveProvider + ?Sized, S: Store + ?Sized> Orchestrator<'a, A, S> {
    pub fn new(archives: &'a A, ingestor: Ingestor<'a, S>, files: &'a [SourceFileSpec]) -> Self {
        Self {
            archives,
            ingestor,
            files,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, periods: &[Period]) -> RunSummary {
        let mut summary = RunSummary::default();

        for &period in periods {
            if self.cancel.is_cancelled() {
                warn!(%period, "stop requested; remaining periods skipped");
                summary.cancelled = true;
                break;
            }
            match self.import_period(period).await {
                Ok(p) => summary.periods.push(p),
                Err(e) => {
                    error!(%period, error = %format!("{:#}", e), "period skipped");
                    summary.failed_periods.push((period, format!("{:#}", e)));
                }
            }
        }
        if self.cancel.is_cancelled() {
            summary.cancelled = true;
        }

        info!(
            periods = periods.len(),
            rows = summary.rows(),
            errors = summary.errors(),
            "run complete"
        );
        summary
    }

    /// Acquire one period's archive and ingest every known file from it.
    #[tracing::instrument(level = "info", skip(self, period), fields(period = %period))]
    pub async fn import_period(&self, period: Period) -> anyhow::Result<PeriodSummary> {
        let start = Instant::now();
        info!("bronze import: {}", period);

        let archive = self.archives.acquire(period).await?;
        let ctx = PeriodContext {
            period,
            source_url: archive.source_url.clone(),
        };

        let mut files = Vec::with_capacity(self.files.len());
        for spec in self.files {
            if self.cancel.is_cancelled() {
                warn!("stop requested; remaining files skipped");
                break;
            }
            let path = archive.data_dir.join(spec.file_name);
            files.push(self.ingestor.ingest_file(&path, spec.table, &ctx).await);
        }
        archive.release();

        let summary = PeriodSummary {
            period,
            source_url: ctx.source_url,
            files,
        };
        info!(
            elapsed = ?start.elapsed(),
            "complete: {} total rows imported for {}",
            summary.rows(),
            period
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{LocalArchives, PeriodArchive};
    use crate::process::FileStatus;
    use crate::source::SOURCE_FILES;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::{fs, path::Path, time::Duration};
    use tempfile::{tempdir, TempDir};

    fn write_period(root: &Path, period: &str, files: &[(&str, &str)]) -> Result<()> {
        let dir = root.join(period).join("CallReportData");
        fs::create_dir_all(&dir)?;
        for (name, body) in files {
            fs::write(dir.join(name), body)?;
        }
        Ok(())
    }

    fn store() -> MemoryStore {
        MemoryStore::with_tables(SOURCE_FILES.iter().map(|s| s.table))
    }

    fn periods(list: &[&str]) -> Vec<Period> {
        list.iter().map(|p| Period::parse(p).unwrap()).collect()
    }

    async fn run(root: &TempDir, store: &MemoryStore, list: &[&str]) -> RunSummary {
        let archives = LocalArchives::new(root.path());
        let ingestor = Ingestor::new(store).settle(Duration::ZERO);
        Orchestrator::new(&archives, ingestor, SOURCE_FILES)
            .run(&periods(list))
            .await
    }

    #[tokio::test]
    async fn new_column_in_later_period() -> Result<()> {
        let root = tempdir()?;
        write_period(
            root.path(),
            "2025-Q2",
            &[("FOICU.txt", "CU_NUMBER,CYCLE_DATE,ASSETS\n12345,2025-03-31,900\n")],
        )?;
        write_period(
            root.path(),
            "2025-Q3",
            &[(
                "FOICU.txt",
                "CU_NUMBER,CYCLE_DATE,ASSETS,NEW_FIELD\n12345,2025-06-30,1000,hello\n",
            )],
        )?;

        let store = store();
        let summary = run(&root, &store, &["2025-Q2", "2025-Q3"]).await;
        assert!(summary.is_clean());
        assert_eq!(summary.rows(), 2);

        assert!(store.columns("bronze_foicu").iter().any(|c| c == "NEW_FIELD"));
        let rows = store.rows("bronze_foicu");
        assert_eq!(rows.len(), 2);
        let q2 = rows.iter().find(|r| r["quarter"] == json!(2)).unwrap();
        let q3 = rows.iter().find(|r| r["quarter"] == json!(3)).unwrap();
        assert_eq!(q2["NEW_FIELD"], Value::Null);
        assert_eq!(q2["ASSETS"], json!("900"));
        assert_eq!(q3["NEW_FIELD"], json!("hello"));
        Ok(())
    }

    #[tokio::test]
    async fn rerunning_a_period_changes_nothing() -> Result<()> {
        let root = tempdir()?;
        write_period(
            root.path(),
            "2025-Q3",
            &[
                ("FOICU.txt", "CU_NUMBER,CYCLE_DATE,ASSETS\n12345,2025-06-30,1000000\n,2025-06-30,5\n"),
                ("FS220.txt", "CU_NUMBER,ACCT_010\n12345,7\n"),
            ],
        )?;

        let store = store();
        let first = run(&root, &store, &["2025-Q3"]).await;
        let snapshot = store.rows("bronze_foicu");
        let second = run(&root, &store, &["2025-Q3"]).await;

        assert_eq!(first.rows(), 2);
        assert_eq!(second.rows(), 2);
        assert_eq!(store.rows("bronze_foicu"), snapshot);
        assert_eq!(snapshot.len(), 1);

        let files = &second.periods[0].files;
        assert_eq!(files.len(), SOURCE_FILES.len());
        let missing = files
            .iter()
            .filter(|f| f.status == FileStatus::NotFound)
            .count();
        assert_eq!(missing, SOURCE_FILES.len() - 2);
        Ok(())
    }

    #[tokio::test]
    async fn missing_archive_skips_only_that_period() -> Result<()> {
        let root = tempdir()?;
        write_period(root.path(), "2024-Q4", &[("FOICU.txt", "CU_NUMBER\n1\n")])?;
        write_period(root.path(), "2025-Q2", &[("FOICU.txt", "CU_NUMBER\n1\n")])?;

        let store = store();
        let summary = run(&root, &store, &["2024-Q4", "2025-Q1", "2025-Q2"]).await;
        assert_eq!(summary.periods.len(), 2);
        assert_eq!(summary.failed_periods.len(), 1);
        assert_eq!(summary.failed_periods[0].0.to_string(), "2025-Q1");
        assert_eq!(summary.errors(), 1);
        assert_eq!(store.row_count("bronze_foicu"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_next_period() -> Result<()> {
        let root = tempdir()?;
        write_period(root.path(), "2025-Q1", &[("FOICU.txt", "CU_NUMBER\n1\n")])?;

        let store = store();
        let archives = LocalArchives::new(root.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = Orchestrator::new(&archives, Ingestor::new(&store), SOURCE_FILES)
            .with_cancellation(cancel)
            .run(&periods(&["2025-Q1"]))
            .await;
        assert!(summary.cancelled);
        assert!(summary.periods.is_empty());
        assert_eq!(store.row_count("bronze_foicu"), 0);
        Ok(())
    }

    /// Hands out a temporary copy so we can check it is cleaned up.
    struct TempArchives {
        seen: std::sync::Mutex<Vec<std::path::PathBuf>>,
    }

    #[async_trait]
    impl ArchiveProvider for TempArchives {
        async fn acquire(&self, _period: Period) -> Result<PeriodArchive> {
            let work = tempfile::Builder::new().prefix("ncua-bronze-test-").tempdir()?;
            fs::write(work.path().join("FOICU.txt"), "CU_NUMBER,X\n9,y\n")?;
            self.seen.lock().unwrap().push(work.path().to_path_buf());
            Ok(PeriodArchive::new(work.path(), "test://").with_workdir(work))
        }
    }

    #[tokio::test]
    async fn work_dir_released_after_period() -> Result<()> {
        let store = store();
        let archives = TempArchives {
            seen: std::sync::Mutex::new(vec![]),
        };
        let ingestor = Ingestor::new(&store).settle(Duration::ZERO);
        let summary = Orchestrator::new(&archives, ingestor, SOURCE_FILES)
            .run(&periods(&["2025-Q3"]))
            .await;
        assert_eq!(summary.rows(), 1);
        let seen = archives.seen.lock().unwrap();
        assert!(!seen[0].exists());
        Ok(())
    }
}
