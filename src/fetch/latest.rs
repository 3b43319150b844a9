use anyhow::{bail, Result};
use chrono::{Duration as ChronoDuration, NaiveDate};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use crate::period::Period;

/// Call report data is published roughly six weeks after quarter end.
const PUBLICATION_LAG_DAYS: i64 = 45;
const PROBES: usize = 4;
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Quarters to probe, newest first, for a run on `today`.
pub fn candidates(today: NaiveDate) -> Vec<Period> {
    let mut p = Period::containing(today - ChronoDuration::days(PUBLICATION_LAG_DAYS));
    let mut out = Vec::with_capacity(PROBES);
    for _ in 0..PROBES {
        out.push(p);
        p = p.previous();
    }
    out
}

/// Newest quarter whose archive answers a HEAD request with 200.
pub async fn detect_latest(client: &Client, base_url: &str, today: NaiveDate) -> Result<Period> {
    for period in candidates(today) {
        let url = period.archive_url(base_url);
        match client.head(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(%period, "latest available quarter");
                return Ok(period);
            }
            Ok(resp) => debug!(%period, status = %resp.status(), "not published"),
            Err(e) => debug!(%period, error = %e, "probe failed"),
        }
    }
    bail!("could not detect latest available quarter from NCUA")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_four_quarters_back_from_lagged_date() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 10).unwrap();
        let got: Vec<String> = candidates(today).iter().map(|p| p.to_string()).collect();
        assert_eq!(got, vec!["2025-Q3", "2025-Q2", "2025-Q1", "2024-Q4"]);
    }

    #[test]
    fn lag_can_cross_a_year() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        assert_eq!(candidates(today)[0].to_string(), "2025-Q4");
    }
}
