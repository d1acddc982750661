//! Storage backend interface
//!
//! The transaction runtime hands committed effects to a backend table by table
//! and reads rows back through it. Backends report failure per call; the
//! runtime is responsible for undoing partial effects.

use super::tuple::Row;
use crate::catalog::TableDef;
use crate::error::Result;
use crate::predicate::Predicate;

/// A row store the transaction runtime commits into
pub trait StorageBackend: Send + Sync {
    /// Register a table. Registering an existing table is a no-op.
    fn create_table(&self, table: &TableDef) -> Result<()>;

    /// Add new rows. Fails if any row id is already present.
    fn apply_insert(&self, table: &str, rows: &[Row]) -> Result<()>;

    /// Replace existing rows, matched by id. Fails if any row is missing.
    fn apply_update(&self, table: &str, rows: &[Row]) -> Result<()>;

    /// Remove rows, matched by id. Fails if any row is missing.
    fn apply_delete(&self, table: &str, rows: &[Row]) -> Result<()>;

    /// Rows of `table` satisfying `predicate`, or every row when `None`
    fn query(&self, table: &str, predicate: Option<&Predicate>) -> Result<Vec<Row>>;
}
