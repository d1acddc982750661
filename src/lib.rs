//! scopedb - schema, predicate and transaction-isolation core of an
//! embedded relational database
//!
//! This library provides:
//! - A schema graph of tables, columns, indices and foreign keys
//! - Column predicates (`=`, `<>`, `<`, `<=`, `>`, `>=`, LIKE, BETWEEN, IN,
//!   IS NULL, IS NOT NULL) with a reference evaluator
//! - Scope-based admission control: transactions declare the tables they read
//!   and write, overlapping ones run one after another in arrival order and
//!   disjoint ones run in parallel
//! - A transaction runtime that buffers row effects and commits them to a
//!   pluggable storage backend

pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod predicate;
pub mod storage;
pub mod transaction;

pub use catalog::{Column, DataType, Schema, TableBuilder, TableDef};
pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{Error, Result};
pub use predicate::{Operator, Predicate};
pub use storage::{MemoryStore, Row, StorageBackend, Value};
pub use transaction::{Scope, Transaction, TransactionState};
