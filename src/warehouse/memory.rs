//! In-process warehouse.
//!
//! Backs `--dry-run` and the tests. Appends are atomic under one lock and rows
//! whose insert id was already written are dropped, mirroring the best-effort
//! de-duplication of the real store.

use super::{Row, TableRef, TableSchema, Warehouse};
use crate::error::{SchemaViolation, WarehouseError};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Tables {
    schemas: HashMap<String, TableSchema>,
    rows: HashMap<String, Vec<Row>>,
    seen_ids: HashSet<String>,
    append_calls: usize,
    fail_next_append: Option<WarehouseError>,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    inner: Mutex<Tables>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next append fail with `error` without writing anything.
    pub fn fail_next_append(&self, error: WarehouseError) {
        self.lock().fail_next_append = Some(error);
    }

    pub fn rows(&self, table: &TableRef) -> Vec<Row> {
        self.lock()
            .rows
            .get(&table.to_string())
            .cloned()
            .unwrap_or_default()
    }

    pub fn append_calls(&self) -> usize {
        self.lock().append_calls
    }
}

impl Warehouse for MemoryWarehouse {
    async fn ensure_table(&self, table: &TableRef, schema: &TableSchema) -> Result<(), WarehouseError> {
        let mut tables = self.lock();
        let key = table.to_string();
        match tables.schemas.get(&key) {
            Some(existing) if existing == schema => Ok(()),
            Some(_) => Err(WarehouseError::SchemaViolation {
                violations: vec![SchemaViolation {
                    row: None,
                    column: "*".to_string(),
                    reason: format!("table {key} exists with a different schema"),
                }],
            }),
            None => {
                info!(table = %key, "Created in-memory table");
                tables.schemas.insert(key, schema.clone());
                Ok(())
            }
        }
    }

    async fn append(&self, table: &TableRef, rows: &[Row]) -> Result<usize, WarehouseError> {
        let mut tables = self.lock();
        tables.append_calls += 1;
        if let Some(error) = tables.fail_next_append.take() {
            return Err(error);
        }

        let key = table.to_string();
        if !tables.schemas.contains_key(&key) {
            return Err(WarehouseError::Connectivity(format!("table {key} not found")));
        }

        let fresh: Vec<Row> = rows
            .iter()
            .filter(|row| !tables.seen_ids.contains(&row.insert_id))
            .cloned()
            .collect();
        let written = fresh.len();
        if written < rows.len() {
            debug!(dropped = rows.len() - written, "Dropped rows with known insert ids");
        }

        tables.seen_ids.extend(fresh.iter().map(|row| row.insert_id.clone()));
        tables.rows.entry(key).or_default().extend(fresh);
        Ok(written)
    }
}
