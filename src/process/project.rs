// src/process/project.rs

use serde_json::Value;

use crate::period::Period;
use crate::schema::is_reserved;
use crate::source::Record;
use crate::store::Row;

/// Header spellings the institution identifier has been published under.
const CU_NUMBER_HEADERS: [&str; 2] = ["CU_NUMBER", "CU_Number"];
const CYCLE_DATE_HEADERS: [&str; 2] = ["CYCLE_DATE", "Cycle_Date"];

/// Metadata stamped on every row of one period's import.
#[derive(Debug, Clone)]
pub struct PeriodContext {
    pub period: Period,
    pub source_url: String,
}

/// First non-blank value among the known spellings, then any header matching
/// case-insensitively. Trimmed.
fn key_field(headers: &[String], record: &Record, variants: &[&str]) -> Option<String> {
    let exact = variants.iter().filter_map(|v| record.get(*v));
    let loose = headers
        .iter()
        .filter(|h| variants.iter().any(|v| h.eq_ignore_ascii_case(v)))
        .filter_map(|h| record.get(h));

    exact
        .chain(loose)
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Build the bronze row for one source record, or `None` when the record has
/// no institution identifier.
///
/// Every non-reserved header is copied through as text; `""` becomes null.
/// Nothing is parsed or coerced.
pub fn project(headers: &[String], record: &Record, ctx: &PeriodContext) -> Option<Row> {
    let cu_number = key_field(headers, record, &CU_NUMBER_HEADERS)?;
    let cycle_date = key_field(headers, record, &CYCLE_DATE_HEADERS);

    let mut row = Row::new();
    row.insert("cu_number".into(), Value::String(cu_number));
    row.insert(
        "cycle_date".into(),
        cycle_date.map(Value::String).unwrap_or(Value::Null),
    );
    row.insert("year".into(), Value::from(ctx.period.year));
    row.insert("quarter".into(), Value::from(ctx.period.quarter));
    row.insert("period".into(), Value::String(ctx.period.to_string()));
    row.insert("source_url".into(), Value::String(ctx.source_url.clone()));

    for header in headers.iter().filter(|h| !is_reserved(h)) {
        let value = match record.get(header) {
            Some(v) if !v.is_empty() => Value::String(v.clone()),
            _ => Value::Null,
        };
        row.insert(header.clone(), value);
    }

    Some(row)
}
