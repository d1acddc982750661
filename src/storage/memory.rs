//! In-memory row store
//!
//! Rows are kept per table in id order. Each call validates everything before
//! touching any row, so a failed call leaves the table unchanged.

use super::backend::StorageBackend;
use super::tuple::{Row, RowId};
use crate::catalog::TableDef;
use crate::error::{Error, Result};
use crate::predicate::Predicate;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::trace;

/// Heap of rows for a single table
type RowHeap = BTreeMap<RowId, Row>;

/// A [`StorageBackend`] that keeps every table in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, RowHeap>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently stored in `table`
    pub fn row_count(&self, table: &str) -> Result<usize> {
        self.read(table, |heap| Ok(heap.len()))
    }

    fn read<T>(&self, table: &str, f: impl FnOnce(&RowHeap) -> Result<T>) -> Result<T> {
        let tables = self
            .tables
            .read()
            .map_err(|_| Error::StorageFailure("memory store lock poisoned".into()))?;
        let heap = tables
            .get(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;
        f(heap)
    }

    fn write<T>(&self, table: &str, f: impl FnOnce(&mut RowHeap) -> Result<T>) -> Result<T> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| Error::StorageFailure("memory store lock poisoned".into()))?;
        let heap = tables
            .get_mut(table)
            .ok_or_else(|| Error::TableNotFound(table.to_string()))?;
        f(heap)
    }
}

fn missing(table: &str, id: RowId) -> Error {
    Error::StorageFailure(format!("row {} not found in table '{}'", id, table))
}

impl StorageBackend for MemoryStore {
    fn create_table(&self, table: &TableDef) -> Result<()> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| Error::StorageFailure("memory store lock poisoned".into()))?;
        tables.entry(table.name().to_string()).or_default();
        Ok(())
    }

    fn apply_insert(&self, table: &str, rows: &[Row]) -> Result<()> {
        self.write(table, |heap| {
            if let Some(dup) = rows.iter().find(|row| heap.contains_key(&row.id())) {
                return Err(Error::StorageFailure(format!(
                    "row {} already exists in table '{}'",
                    dup.id(),
                    table
                )));
            }
            for row in rows {
                heap.insert(row.id(), row.clone());
            }
            trace!(table, rows = rows.len(), "inserted");
            Ok(())
        })
    }

    fn apply_update(&self, table: &str, rows: &[Row]) -> Result<()> {
        self.write(table, |heap| {
            if let Some(row) = rows.iter().find(|row| !heap.contains_key(&row.id())) {
                return Err(missing(table, row.id()));
            }
            for row in rows {
                heap.insert(row.id(), row.clone());
            }
            trace!(table, rows = rows.len(), "updated");
            Ok(())
        })
    }

    fn apply_delete(&self, table: &str, rows: &[Row]) -> Result<()> {
        self.write(table, |heap| {
            if let Some(row) = rows.iter().find(|row| !heap.contains_key(&row.id())) {
                return Err(missing(table, row.id()));
            }
            for row in rows {
                heap.remove(&row.id());
            }
            trace!(table, rows = rows.len(), "deleted");
            Ok(())
        })
    }

    fn query(&self, table: &str, predicate: Option<&Predicate>) -> Result<Vec<Row>> {
        if let Some(predicate) = predicate {
            if predicate.table_name() != table {
                return Err(Error::SchemaViolation(format!(
                    "predicate on '{}' used to query table '{}'",
                    predicate.column().normalized_name(),
                    table
                )));
            }
        }
        self.read(table, |heap| {
            Ok(heap
                .values()
                .filter(|row| predicate.map_or(true, |p| p.eval(row)))
                .cloned()
                .collect())
        })
    }
}
