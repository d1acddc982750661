//! Error types for scopedb
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// The main error type for scopedb
#[derive(Error, Debug)]
pub enum Error {
    // ========== Schema Errors ==========
    #[error("Schema error: {0}")]
    SchemaViolation(String),

    #[error("Schema error: table '{0}' not found")]
    TableNotFound(String),

    #[error("Schema error: table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("Schema error: column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Schema error: column '{0}' already exists in table '{1}'")]
    ColumnAlreadyExists(String, String),

    #[error("Schema error: normalized column name '{0}' is not unique")]
    DuplicateColumn(String),

    #[error("Schema error: index '{0}' already exists")]
    IndexAlreadyExists(String),

    #[error("Schema error: foreign key '{name}' references unknown column '{target}'")]
    ForeignKeyTargetNotFound { name: String, target: String },

    // ========== Type Errors ==========
    #[error("Type error: cannot store {from} in {to}")]
    TypeMismatch { from: String, to: String },

    #[error("Type error: null value not allowed for column '{0}'")]
    NullNotAllowed(String),

    // ========== Predicate Errors ==========
    #[error("Predicate error: {0}")]
    ConstructionMisuse(String),

    // ========== Transaction Errors ==========
    #[error("Scope error: transaction {txn} touched table '{table}' outside its declared scope")]
    ScopeViolation { txn: u64, table: String },

    #[error("Transaction error: transaction {txn} is {state}")]
    InvalidTransactionState { txn: u64, state: String },

    #[error("Transaction error: row {id} already exists in table '{table}'")]
    RowAlreadyExists { table: String, id: u64 },

    #[error("Transaction error: row {id} not found in table '{table}'")]
    RowNotFound { table: String, id: u64 },

    #[error("Constraint error: duplicate key {key} for unique '{constraint}'")]
    UniqueViolation { constraint: String, key: String },

    // ========== Storage Errors ==========
    #[error("Storage error: {0}")]
    StorageFailure(String),

    // ========== I/O Errors ==========
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors that end the transaction they occur in
    pub fn is_fatal_to_transaction(&self) -> bool {
        matches!(
            self,
            Error::ScopeViolation { .. } | Error::StorageFailure(_) | Error::Internal(_)
        )
    }
}

/// Result type alias for scopedb operations
pub type Result<T> = std::result::Result<T, Error>;
