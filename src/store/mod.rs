// src/store/mod.rs

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::error::{BackendError, SchemaError};

pub mod memory;
pub mod postgrest;
pub mod upsert;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;
pub use upsert::{BatchUpserter, UpsertReport};

/// One destination row: column name → JSON value (`Null`, text, or an integer key field).
pub type Row = BTreeMap<String, Value>;

/// Natural identity of a bronze row.
pub const CONFLICT_KEY: [&str; 3] = ["cu_number", "year", "quarter"];

/// Knows which columns each destination table has and can grow them.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Every column currently on `table`. Unknown tables are a `SchemaError::Query`.
    async fn list_columns(&self, table: &str) -> Result<HashSet<String>, SchemaError>;

    /// Add a nullable text column. Succeeds if the column already exists as text.
    async fn add_column(&self, table: &str, column: &str) -> Result<(), SchemaError>;

    /// Invalidate any cached schema view so later writes see added columns.
    async fn refresh_view(&self) -> Result<(), SchemaError>;
}

/// Insert-or-update of a batch of rows keyed on `conflict_key`.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    async fn upsert_batch(
        &self,
        table: &str,
        rows: &[Row],
        conflict_key: &[&str],
    ) -> Result<(), BackendError>;
}

/// A backend that can both evolve and write bronze tables.
pub trait Store: SchemaRegistry + BatchWriter {}

impl<T: SchemaRegistry + BatchWriter + ?Sized> Store for T {}
