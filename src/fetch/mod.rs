// src/fetch/mod.rs

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::{info, warn};

use crate::period::Period;

pub mod latest;
pub mod zips;

/// File every call report archive contains; marks the data directory.
pub const MARKER_FILE: &str = "FOICU.txt";

/// A period's extracted source files plus the provenance stamped onto rows.
///
/// When backed by a temporary working directory, it is removed on `release`
/// or on drop, whichever comes first.
#[derive(Debug)]
pub struct PeriodArchive {
    pub data_dir: PathBuf,
    pub source_url: String,
    workdir: Option<TempDir>,
}

impl PeriodArchive {
    pub fn new(data_dir: impl Into<PathBuf>, source_url: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            source_url: source_url.into(),
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: TempDir) -> Self {
        self.workdir = Some(workdir);
        self
    }

    /// Remove any temporary files now, logging rather than failing on errors.
    pub fn release(self) {
        if let Some(dir) = self.workdir {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), error = %e, "failed to remove work dir");
            }
        }
    }
}

/// Supplies the source files for one reporting period.
#[async_trait]
pub trait ArchiveProvider: Send + Sync {
    async fn acquire(&self, period: Period) -> Result<PeriodArchive>;
}

/// The directory holding the call report text files: `root` itself, or the
/// first immediate subdirectory containing `MARKER_FILE`.
pub fn resolve_data_dir(root: &Path) -> Result<PathBuf> {
    if root.join(MARKER_FILE).is_file() {
        return Ok(root.to_path_buf());
    }
    let mut subdirs: Vec<PathBuf> = fs::read_dir(root)
        .with_context(|| format!("reading directory {:?}", root))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();
    match subdirs.into_iter().find(|d| d.join(MARKER_FILE).is_file()) {
        Some(dir) => Ok(dir),
        None => bail!("{} not found in extracted data at {:?}", MARKER_FILE, root),
    }
}

/// Downloads and extracts the published quarterly ZIP.
pub struct NcuaArchives {
    client: Client,
    base_url: String,
}

impl NcuaArchives {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ArchiveProvider for NcuaArchives {
    async fn acquire(&self, period: Period) -> Result<PeriodArchive> {
        let url = period.archive_url(&self.base_url);
        let workdir = tempfile::Builder::new()
            .prefix(&format!("ncua-bronze-{}-", period))
            .tempdir()
            .context("creating work dir")?;

        info!(%url, "downloading");
        let zip_path = zips::download_zip(&self.client, &url, workdir.path()).await?;
        let size_mb = fs::metadata(&zip_path)?.len() as f64 / 1024.0 / 1024.0;
        info!("extracting ZIP ({:.1} MB)", size_mb);

        // offload the extraction to the blocking pool
        let extract_dir = workdir.path().join("data");
        let data_dir = tokio::task::spawn_blocking({
            let zip_path = zip_path.clone();
            let extract_dir = extract_dir.clone();
            move || -> Result<PathBuf> {
                zips::extract_zip(&zip_path, &extract_dir)?;
                fs::remove_file(&zip_path)?;
                resolve_data_dir(&extract_dir)
            }
        })
        .await??;

        Ok(PeriodArchive::new(data_dir, url).with_workdir(workdir))
    }
}

/// Archives already extracted under `root/YYYY-QN/`.
pub struct LocalArchives {
    root: PathBuf,
}

impl LocalArchives {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArchiveProvider for LocalArchives {
    async fn acquire(&self, period: Period) -> Result<PeriodArchive> {
        let dir = self.root.join(period.to_string());
        if !dir.is_dir() {
            bail!("no local archive for {} at {:?}", period, dir);
        }
        let data_dir = resolve_data_dir(&dir)?;
        let source_url = format!("file://{}", data_dir.display());
        Ok(PeriodArchive::new(data_dir, source_url))
    }
}
