// src/store/memory.rs

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{Mutex, MutexGuard},
};
use tracing::debug;

use super::{BatchWriter, Row, SchemaRegistry};
use crate::error::{BackendError, SchemaError};
use crate::schema::{ColumnType, KEY_COLUMNS};

/// In-process bronze backend.
///
/// Models the parts of a PostgREST-fronted database the importer depends on:
/// tables must be registered up front, `add_column` changes the real schema
/// but writes are validated against a separate *visible* view that only catches
/// up on `refresh_view`, and upserts merge on the natural key.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tables: BTreeMap<String, MemTable>,
    refreshes: usize,
}

struct MemTable {
    columns: BTreeMap<String, ColumnType>,
    visible: BTreeSet<String>,
    rows: BTreeMap<Vec<String>, Row>,
    next_id: i64,
}

impl MemTable {
    fn new() -> Self {
        let columns: BTreeMap<String, ColumnType> = KEY_COLUMNS
            .iter()
            .map(|(name, ty)| (name.to_string(), *ty))
            .collect();
        let visible = columns.keys().cloned().collect();
        Self {
            columns,
            visible,
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// A store with each of `tables` created with the reserved bronze columns.
    pub fn with_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for t in tables {
            store.create_table(t);
        }
        store
    }

    /// Out-of-band table creation. No-op if the table exists.
    pub fn create_table(&self, table: impl Into<String>) {
        self.lock()
            .tables
            .entry(table.into())
            .or_insert_with(MemTable::new);
    }

    /// Columns of `table` in name order, or empty if unknown.
    pub fn columns(&self, table: &str) -> Vec<String> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.columns.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Rows of `table` in natural-key order. Columns a row never received read as `Null`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let inner = self.lock();
        let Some(t) = inner.tables.get(table) else {
            return Vec::new();
        };
        t.rows
            .values()
            .map(|stored| {
                t.columns
                    .keys()
                    .map(|c| (c.clone(), stored.get(c).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// How many times the schema view has been refreshed.
    pub fn refresh_count(&self) -> usize {
        self.lock().refreshes
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn key_of(row: &Row, conflict_key: &[&str]) -> Result<Vec<String>, BackendError> {
    conflict_key
        .iter()
        .map(|k| match row.get(*k) {
            Some(Value::Null) | None => Err(BackendError::InvalidRow(format!(
                "null value in conflict key column `{}`",
                k
            ))),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(v) => Ok(v.to_string()),
        })
        .collect()
}

#[async_trait]
impl SchemaRegistry for MemoryStore {
    async fn list_columns(&self, table: &str) -> Result<HashSet<String>, SchemaError> {
        let inner = self.lock();
        let t = inner.tables.get(table).ok_or_else(|| SchemaError::Query {
            table: table.to_string(),
            source: BackendError::UnknownTable(table.to_string()),
        })?;
        Ok(t.columns.keys().cloned().collect())
    }

    async fn add_column(&self, table: &str, column: &str) -> Result<(), SchemaError> {
        let mut inner = self.lock();
        let mutation = |source: BackendError| SchemaError::Mutation {
            table: table.to_string(),
            column: column.to_string(),
            source,
        };
        let t = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| mutation(BackendError::UnknownTable(table.to_string())))?;

        match t.columns.get(column) {
            Some(ColumnType::Text) => Ok(()),
            Some(other) => Err(mutation(BackendError::IncompatibleColumn {
                table: table.to_string(),
                column: column.to_string(),
                existing: other.to_string(),
            })),
            None => {
                debug!(table, column, "memory: add text column");
                t.columns.insert(column.to_string(), ColumnType::Text);
                Ok(())
            }
        }
    }

    async fn refresh_view(&self) -> Result<(), SchemaError> {
        let mut inner = self.lock();
        inner.refreshes += 1;
        for t in inner.tables.values_mut() {
            t.visible = t.columns.keys().cloned().collect();
        }
        Ok(())
    }
}

#[async_trait]
impl BatchWriter for MemoryStore {
    async fn upsert_batch(
        &self,
        table: &str,
        rows: &[Row],
        conflict_key: &[&str],
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let t = inner
            .tables
            .get_mut(table)
            .ok_or_else(|| BackendError::UnknownTable(table.to_string()))?;

        // 1) validate the whole batch before touching anything
        let mut unknown = BTreeSet::new();
        let mut keys = Vec::with_capacity(rows.len());
        let mut seen = HashSet::with_capacity(rows.len());
        for row in rows {
            unknown.extend(row.keys().filter(|c| !t.visible.contains(*c)).cloned());
            let key = key_of(row, conflict_key)?;
            if !seen.insert(key.clone()) {
                return Err(BackendError::InvalidRow(format!(
                    "conflict key {:?} appears twice in one batch",
                    key
                )));
            }
            keys.push(key);
        }
        if !unknown.is_empty() {
            return Err(BackendError::StaleView {
                table: table.to_string(),
                columns: unknown.into_iter().collect(),
            });
        }

        // 2) merge
        let now = Value::String(Utc::now().to_rfc3339());
        for (key, row) in keys.into_iter().zip(rows) {
            match t.rows.get_mut(&key) {
                Some(existing) => {
                    existing.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                None => {
                    let mut stored = row.clone();
                    stored.insert("id".into(), Value::from(t.next_id));
                    stored.insert("imported_at".into(), now.clone());
                    t.next_id += 1;
                    t.rows.insert(key, stored);
                }
            }
        }
        Ok(())
    }
}
