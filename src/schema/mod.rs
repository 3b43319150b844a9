// src/schema/mod.rs

use std::fmt;

pub mod reconcile;

pub use reconcile::ColumnReconciler;

/// Columns owned by the bronze table definition rather than the source file.
/// Source headers with these exact names are never copied or added.
pub const KEY_COLUMNS: [(&str, ColumnType); 8] = [
    ("id", ColumnType::Identity),
    ("cu_number", ColumnType::Text),
    ("cycle_date", ColumnType::Text),
    ("year", ColumnType::Integer),
    ("quarter", ColumnType::Integer),
    ("period", ColumnType::Text),
    ("source_url", ColumnType::Text),
    ("imported_at", ColumnType::Timestamp),
];

pub fn is_reserved(column: &str) -> bool {
    key_column_type(column).is_some()
}

/// Declared type of a reserved column, `None` for dynamic columns.
pub fn key_column_type(column: &str) -> Option<ColumnType> {
    KEY_COLUMNS
        .iter()
        .find(|(name, _)| *name == column)
        .map(|(_, ty)| *ty)
}

/// Storage type of a bronze column. Dynamic columns are always `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Identity,
    Text,
    Integer,
    Timestamp,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColumnType::Identity => "bigint identity",
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Timestamp => "timestamptz",
        })
    }
}
