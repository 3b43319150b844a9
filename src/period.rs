// src/period.rs

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{fmt, str::FromStr};

use crate::error::PeriodError;

static PERIOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-Q([1-4])$").expect("period regex should compile"));

/// A reporting quarter, canonically written `YYYY-QN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub year: i32,
    pub quarter: u8,
}

impl Period {
    pub fn new(year: i32, quarter: u8) -> Result<Self, PeriodError> {
        if !(1..=4).contains(&quarter) || !(0..=9999).contains(&year) {
            return Err(PeriodError::Invalid(format!("{}-Q{}", year, quarter)));
        }
        Ok(Self { year, quarter })
    }

    pub fn parse(s: &str) -> Result<Self, PeriodError> {
        let caps = PERIOD_RE
            .captures(s)
            .ok_or_else(|| PeriodError::Invalid(s.to_string()))?;
        let year = caps[1]
            .parse()
            .map_err(|_| PeriodError::Invalid(s.to_string()))?;
        let quarter = caps[2]
            .parse()
            .map_err(|_| PeriodError::Invalid(s.to_string()))?;
        Self::new(year, quarter)
    }

    /// Every quarter from `start` through `end`, inclusive and in order.
    pub fn range(start: &str, end: &str) -> Result<Vec<Self>, PeriodError> {
        let first = Self::parse(start)?;
        let last = Self::parse(end)?;

        let mut out = Vec::new();
        let mut p = first;
        while p <= last {
            out.push(p);
            p = p.next();
        }
        if out.is_empty() {
            return Err(PeriodError::EmptyRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(out)
    }

    pub fn next(self) -> Self {
        if self.quarter == 4 {
            Self {
                year: self.year + 1,
                quarter: 1,
            }
        } else {
            Self {
                year: self.year,
                quarter: self.quarter + 1,
            }
        }
    }

    pub fn previous(self) -> Self {
        if self.quarter == 1 {
            Self {
                year: self.year - 1,
                quarter: 4,
            }
        } else {
            Self {
                year: self.year,
                quarter: self.quarter - 1,
            }
        }
    }

    /// The quarter a calendar date falls in.
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            quarter: ((date.month0() / 3) + 1) as u8,
        }
    }

    /// Quarter-end month as used in archive names ("03", "06", "09", "12").
    pub fn month(self) -> &'static str {
        match self.quarter {
            1 => "03",
            2 => "06",
            3 => "09",
            _ => "12",
        }
    }

    /// `{base}/call-report-data-{year}-{MM}.zip`
    pub fn archive_url(self, base: &str) -> String {
        format!(
            "{}/call-report-data-{}-{}.zip",
            base.trim_end_matches('/'),
            self.year,
            self.month()
        )
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-Q{}", self.year, self.quarter)
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_form() {
        let p = Period::parse("2025-Q3").unwrap();
        assert_eq!(p, Period { year: 2025, quarter: 3 });
        assert_eq!(p.to_string(), "2025-Q3");
    }

    #[test]
    fn rejects_bad_quarters() {
        for bad in ["2025-Q5", "2025-Q0", "25-Q1", "2025Q1", "2025-q1", " 2025-Q1"] {
            assert_eq!(
                Period::parse(bad),
                Err(PeriodError::Invalid(bad.to_string())),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn new_checks_quarter() {
        assert_eq!(Period::new(2025, 4), Ok(Period { year: 2025, quarter: 4 }));
        assert_eq!(
            Period::new(2025, 5),
            Err(PeriodError::Invalid("2025-Q5".to_string()))
        );
    }

    #[test]
    fn range_crosses_year_boundary() {
        let got: Vec<String> = Period::range("2024-Q3", "2025-Q1")
            .unwrap()
            .into_iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(got, vec!["2024-Q3", "2024-Q4", "2025-Q1"]);
    }

    #[test]
    fn range_single_and_reversed() {
        assert_eq!(Period::range("2025-Q2", "2025-Q2").unwrap().len(), 1);
        assert!(matches!(
            Period::range("2025-Q2", "2024-Q4"),
            Err(PeriodError::EmptyRange { .. })
        ));
    }

    #[test]
    fn archive_url_uses_quarter_end_month() {
        let p = Period::parse("2024-Q4").unwrap();
        assert_eq!(
            p.archive_url("https://www.ncua.gov/files/publications/analysis/"),
            "https://www.ncua.gov/files/publications/analysis/call-report-data-2024-12.zip"
        );
    }

    #[test]
    fn containing_and_previous() {
        let d = NaiveDate::from_ymd_opt(2025, 2, 14).unwrap();
        let p = Period::containing(d);
        assert_eq!(p.to_string(), "2025-Q1");
        assert_eq!(p.previous().to_string(), "2024-Q4");
        assert_eq!(p.previous().next(), p);
    }
}
