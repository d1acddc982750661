//! Database handle
//!
//! Ties a finalized schema graph to a storage backend and hands out scoped
//! transactions.

use std::sync::Arc;

use tracing::info;

use crate::catalog::{Schema, TableDef};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::storage::{MemoryStore, StorageBackend};
use crate::transaction::{
    PendingTransaction, Scope, ScopeLockManager, Transaction, TransactionManager,
};

/// An open database
pub struct Database {
    transactions: TransactionManager,
}

impl Database {
    /// Open a database over `backend`. Every table of `schema` is registered
    /// with the backend.
    pub fn new(schema: Schema, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let transactions = TransactionManager::new(Arc::new(schema), backend)?;
        info!(
            schema = transactions.schema().name(),
            version = transactions.schema().version(),
            "database opened"
        );
        Ok(Self { transactions })
    }

    /// Open a database kept entirely in memory
    pub fn in_memory(schema: Schema) -> Result<Self> {
        Self::new(schema, Arc::new(MemoryStore::new()))
    }

    /// Open a database whose schema is loaded from the configured file
    pub fn open(config: &DatabaseConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let path = config
            .schema_path
            .as_ref()
            .ok_or_else(|| Error::SchemaViolation("no schema file configured".to_string()))?;
        Self::new(Schema::load_from_file(path)?, backend)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        self.transactions.schema()
    }

    /// Get a table by name
    pub fn table(&self, name: &str) -> Result<Arc<TableDef>> {
        self.schema().table(name)
    }

    pub fn lock_manager(&self) -> &Arc<ScopeLockManager> {
        self.transactions.lock_manager()
    }

    /// Ask for a transaction without waiting for admission
    pub fn request(&self, scope: Scope) -> Result<PendingTransaction> {
        self.transactions.request(scope)
    }

    /// Begin a transaction, blocking until admitted
    pub fn begin(&self, scope: Scope) -> Result<Transaction> {
        self.transactions.begin(scope)
    }

    /// Begin a transaction from async code
    pub async fn begin_async(&self, scope: Scope) -> Result<Transaction> {
        self.transactions.begin_async(scope).await
    }
}
