//! Catalog module
//!
//! This module contains the schema graph: tables, columns, indices, foreign
//! keys and the data types their values may take.

pub mod catalog;
pub mod loader;
pub mod schema;
pub mod types;

pub use catalog::{Schema, SchemaBuilder, TableBuilder};
pub use loader::{ForeignKeyDesc, IndexDesc, SchemaDesc, TableDesc};
pub use schema::{
    Column, ColumnDef, ColumnId, ConstraintAction, ConstraintTiming, ForeignKeyDef, IndexDef,
    IndexedColumn, SortOrder, TableDef,
};
pub use types::DataType;
