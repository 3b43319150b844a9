use anyhow::Result;
use clap::{CommandFactory, Parser};
use ncua_bronze::{
    config::{self, Destination, Settings},
    fetch::{latest::detect_latest, ArchiveProvider, LocalArchives, NcuaArchives},
    process::Ingestor,
    source::SOURCE_FILES,
    store::{MemoryStore, PostgrestStore, Store},
    Orchestrator, Period,
};
use reqwest::Client;
use std::{path::PathBuf, process::ExitCode, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Bronze layer NCUA import.
///
///   ncua-bronze 2025-Q3              # single quarter
///   ncua-bronze 2024-Q3 2025-Q3      # range (inclusive)
///   ncua-bronze --latest             # auto-detect latest
#[derive(Parser, Debug)]
#[command(name = "ncua-bronze", verbatim_doc_comment)]
struct Args {
    /// Quarter(s) in YYYY-QN format
    quarters: Vec<String>,

    /// Auto-detect the latest published quarter
    #[arg(long)]
    latest: bool,

    /// Custom env file (e.g. .env.medallion)
    #[arg(long)]
    env: Option<PathBuf>,

    /// Read already-extracted archives from DIR/YYYY-QN/ instead of downloading
    #[arg(long, value_name = "DIR")]
    from_dir: Option<PathBuf>,

    /// Write into an in-memory store instead of the configured destination
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_target(false)
        .init();

    let args = Args::parse();

    // ─── 2) configuration + destination gate ─────────────────────────
    config::load_env_file(args.env.as_deref())?;
    let mut settings = Settings::from_env()?;
    let client = Client::new();

    let store: Box<dyn Store> = if args.dry_run {
        info!("dry run: writing to an in-memory store");
        settings.settle = Duration::ZERO;
        Box::new(MemoryStore::with_tables(SOURCE_FILES.iter().map(|s| s.table)))
    } else {
        let dest = Destination::from_env()?;
        info!(destination = %dest.url, "bronze layer NCUA import");
        Box::new(PostgrestStore::new(client.clone(), &dest.url, &dest.service_key)?)
    };

    // ─── 3) which quarters ───────────────────────────────────────────
    let periods = if args.latest {
        let today = chrono::Local::now().date_naive();
        vec![detect_latest(&client, &settings.ncua_base_url, today).await?]
    } else {
        match args.quarters.as_slice() {
            [one] => vec![Period::parse(one)?],
            [start, end] => Period::range(start, end)?,
            _ => {
                Args::command().print_help()?;
                return Ok(ExitCode::from(1));
            }
        }
    };
    let listed: Vec<String> = periods.iter().map(|p| p.to_string()).collect();
    info!("quarters to import: {}", listed.join(", "));

    let archives: Box<dyn ArchiveProvider> = match &args.from_dir {
        Some(dir) => Box::new(LocalArchives::new(dir)),
        None => Box::new(NcuaArchives::new(client.clone(), &settings.ncua_base_url)),
    };

    // ─── 4) stop between files on ctrl-c ─────────────────────────────
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; finishing current file");
                cancel.cancel();
            }
        }
    });

    // ─── 5) import ───────────────────────────────────────────────────
    let ingestor = Ingestor::new(&*store)
        .batch_size(settings.batch_size)
        .settle(settings.settle);
    let summary = Orchestrator::new(&*archives, ingestor, SOURCE_FILES)
        .with_cancellation(cancel)
        .run(&periods)
        .await;

    for (period, cause) in &summary.failed_periods {
        error!(%period, "period not imported: {}", cause);
    }
    for p in &summary.periods {
        for f in p.files.iter().filter(|f| f.errors() > 0) {
            warn!(period = %p.period, file = %f.file, table = %f.table, status = ?f.status,
                batch_errors = f.batch_errors, "file finished with errors");
        }
    }
    info!(
        "all done: {} quarter(s), {} total rows, {} error(s)",
        summary.periods.len(),
        summary.rows(),
        summary.errors()
    );

    let code = if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    };
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_range_and_flags() {
        let args = Args::try_parse_from([
            "ncua-bronze",
            "2024-Q3",
            "2025-Q1",
            "--env",
            ".env.medallion",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.quarters, vec!["2024-Q3", "2025-Q1"]);
        assert_eq!(args.env, Some(PathBuf::from(".env.medallion")));
        assert!(args.dry_run && !args.latest);
    }

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }
}
