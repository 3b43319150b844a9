// src/store/postgrest.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

use super::{BatchWriter, Row, SchemaRegistry};
use crate::error::{BackendError, SchemaError};
use crate::schema::{key_column_type, ColumnType};

/// Postgres `duplicate_column`: a concurrent run added it first.
const DUPLICATE_COLUMN: &str = "42701";

/// PostgREST: a payload column is missing from its schema cache.
const SCHEMA_CACHE_MISS: &str = "PGRST204";

/// Supabase / PostgREST backend.
///
/// Schema changes go through three SQL functions exposed as RPCs:
/// `get_column_names(p_table_name)`, `add_text_column(p_table_name, p_column_name)`
/// and `reload_schema_cache()`.
pub struct PostgrestStore {
    client: Client,
    rest: Url,
    key: String,
}

#[derive(Debug, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

impl PostgrestStore {
    pub fn new(client: Client, project_url: &str, service_key: &str) -> Result<Self> {
        let base = Url::parse(project_url)
            .with_context(|| format!("parsing destination URL {}", project_url))?;
        let rest = base
            .join("/rest/v1/")
            .with_context(|| format!("building REST endpoint from {}", project_url))?;
        Ok(Self {
            client,
            rest,
            key: service_key.to_string(),
        })
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.rest.join(path).map_err(|e| BackendError::Rejected {
            status: 0,
            code: None,
            message: format!("bad endpoint {}: {}", path, e),
        })
    }

    async fn rpc(&self, function: &str, body: Value) -> Result<Response, BackendError> {
        let url = self.endpoint(&format!("rpc/{}", function))?;
        let resp = self.authed(self.client.post(url)).json(&body).send().await?;
        check(resp).await
    }
}

/// Turn a non-2xx PostgREST reply into `BackendError::Rejected`.
async fn check(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<PostgrestError>(&text) {
        Ok(e) => {
            let mut msg = e.message.unwrap_or_else(|| text.clone());
            if let Some(d) = e.details {
                msg = format!("{} ({})", msg, d);
            }
            (e.code, msg)
        }
        Err(_) => (None, text),
    };
    Err(BackendError::Rejected {
        status: status.as_u16(),
        code,
        message,
    })
}

/// Treat a schema cache miss on a write as a stale view, so the caller can
/// refresh and retry instead of failing the batch for good.
fn classify_write_error(table: &str, err: BackendError) -> BackendError {
    match err {
        BackendError::Rejected {
            code: Some(ref c),
            ref message,
            ..
        } if c == SCHEMA_CACHE_MISS => BackendError::StaleView {
            table: table.to_string(),
            columns: quoted_column(message).into_iter().collect(),
        },
        other => other,
    }
}

/// `Could not find the 'NEW_FIELD' column of 'bronze_foicu' in the schema cache`
fn quoted_column(message: &str) -> Option<String> {
    let start = message.find('\'')? + 1;
    let len = message[start..].find('\'')?;
    Some(message[start..start + len].to_string())
}

/// A `duplicate_column` reply is only success if the column now lists on
/// `table` and is not one of the typed key columns.
fn confirm_existing_column(
    table: &str,
    column: &str,
    existing: &HashSet<String>,
) -> Result<(), BackendError> {
    if let Some(ty) = key_column_type(column).filter(|ty| *ty != ColumnType::Text) {
        return Err(BackendError::IncompatibleColumn {
            table: table.to_string(),
            column: column.to_string(),
            existing: ty.to_string(),
        });
    }
    if !existing.contains(column) {
        return Err(BackendError::Rejected {
            status: 409,
            code: Some(DUPLICATE_COLUMN.to_string()),
            message: format!("`{}` reported as existing but not listed on `{}`", column, table),
        });
    }
    Ok(())
}

#[async_trait]
impl SchemaRegistry for PostgrestStore {
    async fn list_columns(&self, table: &str) -> Result<HashSet<String>, SchemaError> {
        let query = |source: BackendError| SchemaError::Query {
            table: table.to_string(),
            source,
        };
        let resp = self
            .rpc("get_column_names", json!({ "p_table_name": table }))
            .await
            .map_err(query)?;
        let names: Option<Vec<String>> = resp
            .json()
            .await
            .map_err(|e| query(BackendError::Http(e)))?;
        let names: HashSet<String> = names.unwrap_or_default().into_iter().collect();

        // bronze tables always carry their key columns
        if names.is_empty() {
            return Err(query(BackendError::UnknownTable(table.to_string())));
        }
        Ok(names)
    }

    async fn add_column(&self, table: &str, column: &str) -> Result<(), SchemaError> {
        let mutation = |source: BackendError| SchemaError::Mutation {
            table: table.to_string(),
            column: column.to_string(),
            source,
        };
        let body = json!({ "p_table_name": table, "p_column_name": column });
        match self.rpc("add_text_column", body).await {
            Ok(_) => Ok(()),
            Err(BackendError::Rejected { code: Some(c), .. }) if c == DUPLICATE_COLUMN => {
                let existing = self.list_columns(table).await?;
                confirm_existing_column(table, column, &existing).map_err(mutation)?;
                warn!(table, column, "column appeared concurrently; continuing");
                Ok(())
            }
            Err(source) => Err(mutation(source)),
        }
    }

    async fn refresh_view(&self) -> Result<(), SchemaError> {
        self.rpc("reload_schema_cache", json!({}))
            .await
            .map(|_| ())
            .map_err(|source| SchemaError::Refresh { source })
    }
}

#[async_trait]
impl BatchWriter for PostgrestStore {
    async fn upsert_batch(
        &self,
        table: &str,
        rows: &[Row],
        conflict_key: &[&str],
    ) -> Result<(), BackendError> {
        let mut url = self.endpoint(table)?;
        url.query_pairs_mut()
            .append_pair("on_conflict", &conflict_key.join(","));
        debug!(table, rows = rows.len(), "POST upsert");

        let resp = self
            .authed(self.client.post(url))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await?;
        check(resp)
            .await
            .map(|_| ())
            .map_err(|e| classify_write_error(table, e))
    }
}
