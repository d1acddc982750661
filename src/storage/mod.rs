//! Storage module
//!
//! This module contains the row representation and the storage backend the
//! transaction runtime commits into:
//! - Values and rows
//! - Backend interface
//! - In-memory backend

pub mod backend;
pub mod memory;
pub mod tuple;

pub use backend::StorageBackend;
pub use memory::MemoryStore;
pub use tuple::{next_row_id, Row, RowId, Value};
