//! BigQuery over its REST API.
//!
//! - `ensure_table`: `tables.get`, falling back to `tables.insert` on 404. An
//!   existing table must carry every schema column with a matching type.
//! - `append`: one `tabledata.insertAll` request with `skipInvalidRows=false`,
//!   so a single bad row fails the whole request and nothing is written.
//!
//! Each row carries an `insertId`, which lets a connectivity retry re-send the
//! batch without duplicating rows.
//!
//! A freshly created table can take a while to become visible to streaming
//! inserts, during which `insertAll` answers 404. Those answers are retried on
//! a separate, slower backoff before the append is given up.
//!
//! # Credentials
//!
//! The credential file holds an OAuth2 access token, either as raw text (the
//! output of `gcloud auth print-access-token`) or as a JSON token response
//! with an `access_token` field.

use super::{Row, TableRef, TableSchema, Warehouse};
use crate::error::{SchemaViolation, WarehouseError};
use crate::retry::Backoff;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Waiting for a new table to accept streaming inserts: 2, 4, 8, 16, 30 s.
const TABLE_READY_ATTEMPTS: usize = 6;
const TABLE_READY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct BigQueryWarehouse {
    client: Client,
    endpoint: String,
    token: String,
    backoff: Backoff,
    table_ready: Backoff,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableResource<'a> {
    table_reference: TableReference<'a>,
    schema: &'a TableSchema,
}

#[derive(Deserialize, Default)]
struct RemoteTable {
    #[serde(default)]
    schema: RemoteSchema,
}

#[derive(Deserialize, Default)]
struct RemoteSchema {
    #[serde(default)]
    fields: Vec<RemoteField>,
}

#[derive(Deserialize)]
struct RemoteField {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    kind: &'static str,
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: Vec<InsertRow<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertRow<'a> {
    insert_id: &'a str,
    json: &'a Map<String, Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrors>,
}

#[derive(Deserialize)]
struct InsertErrors {
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    message: String,
}

impl BigQueryWarehouse {
    /// Build a client authenticated with the token stored at `credentials`.
    pub fn connect(credentials: &Path, endpoint: &str, backoff: Backoff) -> Result<Self, WarehouseError> {
        let raw = std::fs::read_to_string(credentials).map_err(|e| {
            WarehouseError::Auth(format!("cannot read credentials {}: {e}", credentials.display()))
        })?;
        let token = parse_access_token(&raw)?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(WarehouseError::from)?;
        info!(endpoint, "BigQuery client ready");
        Ok(BigQueryWarehouse {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            backoff,
            table_ready: Backoff::new(TABLE_READY_ATTEMPTS, TABLE_READY_DELAY),
        })
    }

    fn tables_url(&self, table: &TableRef) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables",
            self.endpoint, table.project, table.dataset
        )
    }

    /// Send a request, retrying only on connectivity failures.
    async fn send<F>(&self, label: &str, build: F) -> Result<Response, WarehouseError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let error = match build().bearer_auth(&self.token).send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    WarehouseError::Connectivity(format!("{label}: HTTP status {}", resp.status()))
                }
                Ok(resp) => return Ok(resp),
                Err(e) => WarehouseError::from(e),
            };
            if !self.backoff.allows_retry(attempt) {
                return Err(error);
            }
            let delay = self.backoff.delay(attempt);
            warn!(label, attempt, ?delay, error = %error, "Warehouse call failed; backing off");
            sleep(delay).await;
        }
    }

    async fn create_table(&self, table: &TableRef, schema: &TableSchema) -> Result<(), WarehouseError> {
        let body = TableResource {
            table_reference: TableReference {
                project_id: &table.project,
                dataset_id: &table.dataset,
                table_id: &table.table,
            },
            schema,
        };
        let url = self.tables_url(table);
        let resp = self
            .send("tables.insert", || self.client.post(&url).json(&body))
            .await?;
        match resp.status() {
            s if s.is_success() => {
                info!(%table, "Created table");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(%table, "Table created concurrently");
                Ok(())
            }
            status => Err(status_error(status, &body_text(resp).await)),
        }
    }
}

impl Warehouse for BigQueryWarehouse {
    #[instrument(level = "info", skip_all, fields(%table))]
    async fn ensure_table(&self, table: &TableRef, schema: &TableSchema) -> Result<(), WarehouseError> {
        let url = format!("{}/{}", self.tables_url(table), table.table);
        let resp = self.send("tables.get", || self.client.get(&url)).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => self.create_table(table, schema).await,
            s if s.is_success() => {
                let remote: RemoteTable = resp.json().await.map_err(WarehouseError::from)?;
                let violations = compare_schema(schema, &remote.schema.fields);
                if violations.is_empty() {
                    debug!("Existing table schema matches");
                    Ok(())
                } else {
                    Err(WarehouseError::SchemaViolation { violations })
                }
            }
            status => Err(status_error(status, &body_text(resp).await)),
        }
    }

    #[instrument(level = "info", skip_all, fields(%table, rows = rows.len()))]
    async fn append(&self, table: &TableRef, rows: &[Row]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let body = InsertAllRequest {
            kind: "bigquery#tableDataInsertAllRequest",
            skip_invalid_rows: false,
            ignore_unknown_values: false,
            rows: rows
                .iter()
                .map(|row| InsertRow {
                    insert_id: &row.insert_id,
                    json: &row.values,
                })
                .collect(),
        };
        let url = format!("{}/{}/insertAll", self.tables_url(table), table.table);
        let mut attempt = 0usize;
        let resp = loop {
            attempt += 1;
            let resp = self
                .send("tabledata.insertAll", || self.client.post(&url).json(&body))
                .await?;
            if resp.status() != StatusCode::NOT_FOUND || !self.table_ready.allows_retry(attempt) {
                break resp;
            }
            let delay = self.table_ready.delay(attempt);
            warn!(attempt, ?delay, "Table not yet visible to streaming inserts; backing off");
            sleep(delay).await;
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, &body_text(resp).await));
        }

        let parsed: InsertAllResponse = resp.json().await.map_err(WarehouseError::from)?;
        let violations = insert_violations(parsed);
        if violations.is_empty() {
            Ok(rows.len())
        } else {
            Err(WarehouseError::SchemaViolation { violations })
        }
    }
}

fn parse_access_token(raw: &str) -> Result<String, WarehouseError> {
    let trimmed = raw.trim();
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
        if let Some(Value::String(token)) = obj.get("access_token") {
            return Ok(token.clone());
        }
        if obj.get("type").and_then(Value::as_str) == Some("service_account") {
            return Err(WarehouseError::Auth(
                "service-account key files must be exchanged for an access token first \
                 (e.g. `gcloud auth print-access-token`)"
                    .to_string(),
            ));
        }
        return Err(WarehouseError::Auth("credential JSON has no `access_token`".to_string()));
    }
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return Err(WarehouseError::Auth("credential file holds no usable token".to_string()));
    }
    Ok(trimmed.to_string())
}

fn compare_schema(expected: &TableSchema, remote: &[RemoteField]) -> Vec<SchemaViolation> {
    expected
        .fields
        .iter()
        .filter_map(|column| {
            let reason = match remote.iter().find(|f| f.name == column.name) {
                None => "column missing from existing table".to_string(),
                Some(f) if !column.kind.matches(&f.kind) => {
                    format!("existing column is {}, expected {}", f.kind, column.kind.as_str())
                }
                Some(f) if (f.mode.as_deref() == Some("REPEATED")) != (column.mode == super::ColumnMode::Repeated) => {
                    format!("existing column mode {:?} conflicts with {:?}", f.mode, column.mode)
                }
                Some(_) => return None,
            };
            Some(SchemaViolation {
                row: None,
                column: column.name.clone(),
                reason,
            })
        })
        .collect()
}

fn insert_violations(response: InsertAllResponse) -> Vec<SchemaViolation> {
    response
        .insert_errors
        .into_iter()
        .flat_map(|entry| {
            let index = entry.index;
            entry
                .errors
                .into_iter()
                // With skipInvalidRows=false, valid rows are reported as "stopped".
                .filter(|e| e.reason != "stopped")
                .map(move |e| SchemaViolation {
                    row: Some(index),
                    column: if e.location.is_empty() { "*".to_string() } else { e.location },
                    reason: format!("{}: {}", e.reason, e.message),
                })
        })
        .collect()
}

fn status_error(status: StatusCode, body: &str) -> WarehouseError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            WarehouseError::Auth(format!("HTTP status {status}: {body}"))
        }
        StatusCode::BAD_REQUEST => WarehouseError::SchemaViolation {
            violations: vec![SchemaViolation {
                row: None,
                column: "*".to_string(),
                reason: format!("request rejected: {body}"),
            }],
        },
        _ => WarehouseError::Connectivity(format!("HTTP status {status}: {body}")),
    }
}

async fn body_text(resp: Response) -> String {
    resp.text().await.unwrap_or_default()
}
