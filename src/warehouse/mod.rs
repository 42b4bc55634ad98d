//! Warehouse Loader: maps a batch onto the fixed column schema and appends it.
//!
//! Loads are all-or-nothing. Every row is checked against [`TableSchema`]
//! before any network call; a single violation rejects the whole batch and no
//! append is attempted. The append itself is one call per batch.
//!
//! | Capability | Module | Notes |
//! |------------|--------|-------|
//! | BigQuery | [`bigquery`] | REST `tables.get`/`tables.insert`/`tabledata.insertAll` |
//! | In-memory | [`memory`] | Used by `--dry-run` and tests |

pub mod bigquery;
pub mod memory;

use crate::error::{SchemaViolation, WarehouseError};
use crate::models::{ArticleRecord, Batch, RunContext};
use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::fmt;
use tracing::{error, info, instrument};

pub use bigquery::BigQueryWarehouse;
pub use memory::MemoryWarehouse;

/// Fully-qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    String,
    Integer,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Integer => "INTEGER",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// Whether a type name reported by the warehouse denotes this type.
    pub fn matches(&self, remote: &str) -> bool {
        match self {
            ColumnType::Integer => matches!(remote, "INTEGER" | "INT64"),
            other => remote == other.as_str(),
        }
    }

    fn accepts(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (ColumnType::String, Value::String(_)) => Ok(()),
            (ColumnType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            (ColumnType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|_| ())
                .map_err(|e| format!("unparsable TIMESTAMP `{s}`: {e}")),
            (expected, found) => Err(format!(
                "expected {}, found {}",
                expected.as_str(),
                json_type_name(found)
            )),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnMode {
    Required,
    Nullable,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    pub mode: ColumnMode,
}

impl Column {
    fn new(name: &str, kind: ColumnType, mode: ColumnMode) -> Self {
        Column {
            name: name.to_string(),
            kind,
            mode,
        }
    }

    fn check(&self, value: Option<&Value>) -> Result<(), String> {
        match (self.mode, value) {
            (ColumnMode::Nullable, None | Some(Value::Null)) => Ok(()),
            (ColumnMode::Required | ColumnMode::Repeated, None | Some(Value::Null)) => {
                Err("required column is missing".to_string())
            }
            (ColumnMode::Repeated, Some(Value::Array(items))) => {
                items.iter().enumerate().try_for_each(|(i, item)| {
                    self.kind.accepts(item).map_err(|e| format!("element {i}: {e}"))
                })
            }
            (ColumnMode::Repeated, Some(other)) => Err(format!(
                "expected ARRAY<{}>, found {}",
                self.kind.as_str(),
                json_type_name(other)
            )),
            (_, Some(value)) => self.kind.accepts(value),
        }
    }
}

/// Column layout of the destination table, serialized in BigQuery's `{"fields": [...]}` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub fields: Vec<Column>,
}

impl TableSchema {
    /// The article table: one row per [`ArticleRecord`].
    pub fn articles() -> Self {
        use ColumnMode::{Nullable, Repeated, Required};
        TableSchema {
            fields: vec![
                Column::new("title", ColumnType::String, Required),
                Column::new("kicker", ColumnType::String, Nullable),
                Column::new("link", ColumnType::String, Required),
                Column::new("image", ColumnType::String, Nullable),
                Column::new("title_word_count", ColumnType::Integer, Required),
                Column::new("title_char_count", ColumnType::Integer, Required),
                Column::new("capital_words", ColumnType::String, Repeated),
                Column::new("scrape_date", ColumnType::Timestamp, Required),
            ],
        }
    }

    /// Every violation found in `rows`; empty when the batch is loadable.
    pub fn validate(&self, rows: &[Row]) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            for column in &self.fields {
                if let Err(reason) = column.check(row.values.get(&column.name)) {
                    violations.push(SchemaViolation {
                        row: Some(index),
                        column: column.name.clone(),
                        reason,
                    });
                }
            }
            for key in row.values.keys() {
                if !self.fields.iter().any(|c| &c.name == key) {
                    violations.push(SchemaViolation {
                        row: Some(index),
                        column: key.clone(),
                        reason: "column not in table schema".to_string(),
                    });
                }
            }
        }
        violations
    }
}

/// One warehouse row plus the id that lets the warehouse drop a re-sent copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub insert_id: String,
    pub values: Map<String, Value>,
}

impl Row {
    /// Map `record` onto the article table columns.
    ///
    /// # Arguments
    ///
    /// * `record` - Accepted article
    /// * `insert_id` - Id the warehouse uses to drop a re-sent copy of this row
    ///
    /// # Returns
    ///
    /// A row whose `scrape_date` is an RFC 3339 UTC string with microsecond
    /// precision and whose `capital_words` is a JSON array of strings.
    pub fn from_record(record: &ArticleRecord, insert_id: String) -> Self {
        let mut values = Map::new();
        values.insert("title".to_string(), json!(record.title));
        values.insert("kicker".to_string(), json!(record.kicker));
        values.insert("link".to_string(), json!(record.link));
        values.insert("image".to_string(), json!(record.image));
        values.insert("title_word_count".to_string(), json!(record.title_word_count));
        values.insert("title_char_count".to_string(), json!(record.title_char_count));
        values.insert("capital_words".to_string(), json!(record.capital_words));
        values.insert(
            "scrape_date".to_string(),
            json!(record.scrape_date.to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        Row { insert_id, values }
    }
}

/// Append-and-create capability of the analytical store.
pub trait Warehouse {
    /// Make sure `table` exists with `schema`, creating it if absent.
    async fn ensure_table(&self, table: &TableRef, schema: &TableSchema) -> Result<(), WarehouseError>;

    /// Append all `rows` atomically. Returns the number of rows written.
    async fn append(&self, table: &TableRef, rows: &[Row]) -> Result<usize, WarehouseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub rows_written: usize,
}

#[derive(Debug)]
pub struct WarehouseLoader<W> {
    warehouse: W,
    table: TableRef,
    schema: TableSchema,
}

impl<W: Warehouse> WarehouseLoader<W> {
    pub fn new(warehouse: W, table: TableRef, schema: TableSchema) -> Self {
        WarehouseLoader {
            warehouse,
            table,
            schema,
        }
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Map `batch` to rows keyed by the run id and load them.
    ///
    /// # Arguments
    ///
    /// * `batch` - Accepted records, in document order
    /// * `ctx` - Run context; insert ids are `{run_id}-{index}`
    ///
    /// # Returns
    ///
    /// The number of rows written by the single append.
    ///
    /// # Errors
    ///
    /// See [`WarehouseLoader::load_rows`]. On any error nothing is written.
    pub async fn load(&self, batch: &Batch, ctx: &RunContext) -> Result<LoadResult, WarehouseError> {
        let run_id = ctx.run_id();
        let rows = batch
            .records()
            .iter()
            .enumerate()
            .map(|(i, record)| Row::from_record(record, format!("{run_id}-{i}")))
            .collect::<Vec<_>>();
        self.load_rows(rows).await
    }

    /// Validate every row, then append them in a single call.
    ///
    /// # Errors
    ///
    /// [`WarehouseError::SchemaViolation`] if any row breaks the schema (nothing
    /// is written), or whatever the capability reports for the append.
    #[instrument(level = "info", skip_all, fields(table = %self.table, rows = rows.len()))]
    pub async fn load_rows(&self, rows: Vec<Row>) -> Result<LoadResult, WarehouseError> {
        let violations = self.schema.validate(&rows);
        if !violations.is_empty() {
            for v in violations.iter().take(10) {
                error!(violation = %v, "Schema violation");
            }
            return Err(WarehouseError::SchemaViolation { violations });
        }

        self.warehouse.ensure_table(&self.table, &self.schema).await?;
        let rows_written = self.warehouse.append(&self.table, &rows).await?;
        info!(rows_written, "Batch appended");
        Ok(LoadResult { rows_written })
    }
}
