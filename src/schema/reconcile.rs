// src/schema/reconcile.rs

use std::{collections::HashSet, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use super::is_reserved;
use crate::config::DEFAULT_SETTLE;
use crate::error::SchemaError;
use crate::store::SchemaRegistry;

/// Brings a destination table's columns up to a source file's header set.
pub struct ColumnReconciler<'a, R: SchemaRegistry + ?Sized> {
    registry: &'a R,
    settle: Duration,
}

impl<'a, R: SchemaRegistry + ?Sized> ColumnReconciler<'a, R> {
    pub fn new(registry: &'a R) -> Self {
        Self {
            registry,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Wait applied after a schema reload. Zero for strongly consistent stores.
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Headers that are neither on `table` nor reserved, in header order, once each.
    pub async fn missing_columns(
        &self,
        table: &str,
        headers: &[String],
    ) -> Result<Vec<String>, SchemaError> {
        let existing = self.registry.list_columns(table).await?;
        let mut seen = HashSet::new();
        Ok(headers
            .iter()
            .filter(|h| !existing.contains(*h) && !is_reserved(h))
            .filter(|h| seen.insert(h.as_str()))
            .cloned()
            .collect())
    }

    /// Add every missing column, then refresh the schema view and settle.
    /// Returns the columns that were added; no registry mutation happens when
    /// nothing is missing.
    #[instrument(level = "debug", skip(self, headers), fields(headers = headers.len()))]
    pub async fn reconcile(
        &self,
        table: &str,
        headers: &[String],
    ) -> Result<Vec<String>, SchemaError> {
        let missing = self.missing_columns(table, headers).await?;
        if missing.is_empty() {
            debug!(table, "schema up to date");
            return Ok(missing);
        }

        info!(table, count = missing.len(), columns = ?missing, "adding new column(s)");
        for column in &missing {
            self.registry.add_column(table, column).await?;
        }

        self.refresh().await?;
        Ok(missing)
    }

    /// Refresh the schema view and wait for it to settle.
    pub async fn refresh(&self) -> Result<(), SchemaError> {
        self.registry.refresh_view().await?;
        self.settle_view().await;
        Ok(())
    }

    /// Let an eventually consistent schema cache catch up before writes.
    async fn settle_view(&self) {
        if !self.settle.is_zero() {
            debug!(wait = ?self.settle, "waiting for schema cache");
            sleep(self.settle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn h(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Logs calls in order; rejects adding `poison`.
    struct Recorder {
        existing: HashSet<String>,
        poison: Option<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(existing: &[&str]) -> Self {
            Self {
                existing: existing.iter().map(|s| s.to_string()).collect(),
                poison: None,
                calls: Mutex::new(vec![]),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SchemaRegistry for Recorder {
        async fn list_columns(&self, _table: &str) -> Result<HashSet<String>, SchemaError> {
            self.calls.lock().unwrap().push("list".into());
            Ok(self.existing.clone())
        }

        async fn add_column(&self, table: &str, column: &str) -> Result<(), SchemaError> {
            self.calls.lock().unwrap().push(format!("add {}", column));
            if self.poison == Some(column) {
                return Err(SchemaError::Mutation {
                    table: table.into(),
                    column: column.into(),
                    source: BackendError::Rejected {
                        status: 400,
                        code: None,
                        message: "nope".into(),
                    },
                });
            }
            Ok(())
        }

        async fn refresh_view(&self) -> Result<(), SchemaError> {
            self.calls.lock().unwrap().push("refresh".into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn nothing_missing_means_no_mutation() {
        let reg = Recorder::new(&["id", "cu_number", "ASSETS"]);
        let added = ColumnReconciler::new(&reg)
            .settle(Duration::ZERO)
            .reconcile("bronze_foicu", &h(&["ASSETS", "year", "period"]))
            .await
            .unwrap();
        assert!(added.is_empty());
        assert_eq!(reg.calls(), vec!["list"]);
    }

    #[tokio::test]
    async fn adds_in_header_order_then_refreshes_once() {
        let reg = Recorder::new(&["cu_number", "ASSETS"]);
        let added = ColumnReconciler::new(&reg)
            .settle(Duration::ZERO)
            .reconcile(
                "bronze_fs220",
                &h(&["CU_NUMBER", "ZETA", "ASSETS", "ALPHA", "ZETA", "quarter"]),
            )
            .await
            .unwrap();
        assert_eq!(added, vec!["CU_NUMBER", "ZETA", "ALPHA"]);
        assert_eq!(
            reg.calls(),
            vec!["list", "add CU_NUMBER", "add ZETA", "add ALPHA", "refresh"]
        );
    }

    #[tokio::test]
    async fn mutation_failure_aborts_before_refresh() {
        let mut reg = Recorder::new(&[]);
        reg.poison = Some("B");
        let err = ColumnReconciler::new(&reg)
            .settle(Duration::ZERO)
            .reconcile("t", &h(&["A", "B", "C"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::Mutation { ref column, .. } if column == "B"));
        assert_eq!(reg.calls(), vec!["list", "add A", "add B"]);
    }

    #[tokio::test]
    async fn columns_only_grow() {
        let store = MemoryStore::with_tables(["bronze_foicu"]);
        let rec = ColumnReconciler::new(&store).settle(Duration::ZERO);
        rec.reconcile("bronze_foicu", &h(&["CU_NUMBER", "A", "B"])).await.unwrap();
        rec.reconcile("bronze_foicu", &h(&["CU_NUMBER", "B", "C"])).await.unwrap();

        let cols = store.columns("bronze_foicu");
        for c in ["CU_NUMBER", "A", "B", "C"] {
            assert!(cols.iter().any(|x| x == c), "{} missing", c);
        }
        assert_eq!(store.refresh_count(), 2);
    }

    #[tokio::test]
    async fn unknown_table_is_a_query_error() {
        let store = MemoryStore::new();
        let err = ColumnReconciler::new(&store)
            .reconcile("bronze_missing", &h(&["A"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::Query { .. }));
    }
}
