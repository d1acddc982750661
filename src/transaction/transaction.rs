//! Transaction Manager
//!
//! Handles transaction lifecycle (begin, commit, rollback) on top of the scope
//! lock manager. Row effects are buffered per transaction and reach storage
//! only on commit, while the transaction still holds its table locks, so no
//! other transaction ever sees a partial write.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::journal::{Journal, TransactionStats};
use super::lock::{Admission, ScopeLockManager, TxnId};
use super::scope::Scope;
use crate::catalog::{Column, Schema, TableDef};
use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::storage::{Row, RowId, StorageBackend, Value};

/// Transaction State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Created,
    AdmissionPending,
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Created => "created",
            TransactionState::AdmissionPending => "pending admission",
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Transaction Manager
pub struct TransactionManager {
    schema: Arc<Schema>,
    backend: Arc<dyn StorageBackend>,
    locks: Arc<ScopeLockManager>,
    next_txn_id: AtomicU64,
}

impl TransactionManager {
    /// Create a transaction manager and register every schema table with the
    /// backend.
    pub fn new(schema: Arc<Schema>, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        for table in schema.tables() {
            backend.create_table(table)?;
        }
        Ok(Self {
            schema,
            backend,
            locks: Arc::new(ScopeLockManager::new()),
            next_txn_id: AtomicU64::new(1),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn lock_manager(&self) -> &Arc<ScopeLockManager> {
        &self.locks
    }

    /// Create a transaction for `scope` and ask for its locks without waiting
    pub fn request(&self, scope: Scope) -> Result<PendingTransaction> {
        for table in scope.tables() {
            if !self.schema.has_table(table) {
                return Err(Error::TableNotFound(table.to_string()));
            }
        }

        let id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        let mut txn = Transaction {
            id,
            scope: scope.clone(),
            state: TransactionState::Created,
            journal: Journal::default(),
            backend: Arc::clone(&self.backend),
            locks: Arc::clone(&self.locks),
        };
        debug!(txn = id, %scope, "transaction created");

        let admission = self.locks.request(id, scope)?;
        txn.state = TransactionState::AdmissionPending;
        Ok(PendingTransaction { txn, admission })
    }

    /// Begin a transaction, blocking the current thread until it is admitted
    pub fn begin(&self, scope: Scope) -> Result<Transaction> {
        self.request(scope)?.wait()
    }

    /// Begin a transaction, suspending the current task until it is admitted
    pub async fn begin_async(&self, scope: Scope) -> Result<Transaction> {
        self.request(scope)?.granted().await
    }
}

/// A transaction waiting for its scope locks
pub struct PendingTransaction {
    txn: Transaction,
    admission: Admission,
}

impl PendingTransaction {
    pub fn id(&self) -> TxnId {
        self.txn.id
    }

    pub fn state(&self) -> TransactionState {
        self.txn.state
    }

    /// Was the transaction queued behind a conflicting one?
    pub fn is_queued(&self) -> bool {
        self.admission.is_pending()
    }

    /// Block until admitted
    pub fn wait(self) -> Result<Transaction> {
        let PendingTransaction { mut txn, admission } = self;
        admission.wait()?;
        txn.activate();
        Ok(txn)
    }

    /// Await admission
    pub async fn granted(self) -> Result<Transaction> {
        let PendingTransaction { mut txn, admission } = self;
        admission.granted().await?;
        txn.activate();
        Ok(txn)
    }
}

/// A scoped transaction
pub struct Transaction {
    id: TxnId,
    scope: Scope,
    state: TransactionState,
    journal: Journal,
    backend: Arc<dyn StorageBackend>,
    locks: Arc<ScopeLockManager>,
}

impl Transaction {
    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn activate(&mut self) {
        self.state = TransactionState::Active;
        info!(txn = self.id, scope = %self.scope, "transaction active");
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(Error::InvalidTransactionState {
                txn: self.id,
                state: self.state.to_string(),
            })
        }
    }

    /// Roll back on errors that end the transaction, then pass the error on
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal_to_transaction() && self.state == TransactionState::Active {
                warn!(txn = self.id, error = %err, "aborting transaction");
                if let Err(rollback_err) = self.rollback() {
                    warn!(txn = self.id, error = %rollback_err, "rollback after failure failed");
                }
            }
        }
        result
    }

    fn check_scope(&self, table: &str, access: Access) -> Result<()> {
        let allowed = match access {
            Access::Read => self.scope.can_read(table),
            Access::Write => self.scope.can_write(table),
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::ScopeViolation {
                txn: self.id,
                table: table.to_string(),
            })
        }
    }

    fn check_predicate(table: &TableDef, predicate: Option<&Predicate>) -> Result<()> {
        match predicate {
            Some(p) if p.table_name() != table.name() => Err(Error::SchemaViolation(format!(
                "predicate on '{}' cannot filter table '{}'",
                p.column().normalized_name(),
                table.name()
            ))),
            _ => Ok(()),
        }
    }

    /// Check that writing `changed` keeps every unique key of `table` unique
    /// among the rows this transaction would see afterwards. Keys with a null
    /// part never collide.
    fn check_unique(&self, table: &TableDef, changed: &[Row]) -> Result<()> {
        let keys = unique_keys(table)?;
        if keys.is_empty() || changed.is_empty() {
            return Ok(());
        }

        let visible = self.visible_rows(table.name(), None)?;
        let changed_ids: HashSet<RowId> = changed.iter().map(Row::id).collect();
        let mut after: Vec<&Row> = Vec::new();
        after.extend(visible.iter().filter(|row| !changed_ids.contains(&row.id())));
        after.extend(changed.iter());

        for (constraint, positions) in &keys {
            let key_of = |row: &Row| -> Option<Vec<Value>> {
                positions
                    .iter()
                    .map(|&p| row.get(p).filter(|v| !v.is_null()).cloned())
                    .collect()
            };
            for row in changed {
                let Some(key) = key_of(row) else {
                    continue;
                };
                let clash = after
                    .iter()
                    .any(|other| other.id() != row.id() && key_of(*other).as_ref() == Some(&key));
                if clash {
                    let shown: Vec<String> = key.iter().map(Value::to_string).collect();
                    return Err(Error::UniqueViolation {
                        constraint: constraint.clone(),
                        key: format!("({})", shown.join(", ")),
                    });
                }
            }
        }
        Ok(())
    }

    /// Rows of `table` as this transaction sees them
    fn visible_rows(&self, table: &str, predicate: Option<&Predicate>) -> Result<Vec<Row>> {
        match self.journal.table(table) {
            None => self.backend.query(table, predicate),
            Some(journal) => {
                let committed = self.backend.query(table, None)?;
                Ok(journal
                    .overlay(committed)
                    .into_iter()
                    .filter(|row| predicate.map_or(true, |p| p.eval(row)))
                    .collect())
            }
        }
    }

    /// Buffer new rows for `table`
    pub fn insert(&mut self, table: &TableDef, rows: Vec<Row>) -> Result<usize> {
        let result = self.insert_rows(table, rows);
        self.guard(result)
    }

    fn insert_rows(&mut self, table: &TableDef, rows: Vec<Row>) -> Result<usize> {
        self.ensure_active()?;
        self.check_scope(table.name(), Access::Write)?;
        for row in &rows {
            table.validate_row(row)?;
        }

        let mut taken: HashSet<RowId> = self
            .visible_rows(table.name(), None)?
            .iter()
            .map(Row::id)
            .collect();
        for row in &rows {
            if !taken.insert(row.id()) {
                return Err(Error::RowAlreadyExists {
                    table: table.name().to_string(),
                    id: row.id(),
                });
            }
        }
        self.check_unique(table, &rows)?;

        let count = rows.len();
        let journal = self.journal.table_mut(table.name());
        for row in rows {
            journal.insert(row);
        }
        debug!(txn = self.id, table = table.name(), rows = count, "insert buffered");
        Ok(count)
    }

    /// Buffer replacement rows for `table`, matched by row id
    pub fn update(&mut self, table: &TableDef, rows: Vec<Row>) -> Result<usize> {
        let result = self.update_rows(table, rows);
        self.guard(result)
    }

    fn update_rows(&mut self, table: &TableDef, rows: Vec<Row>) -> Result<usize> {
        self.ensure_active()?;
        self.check_scope(table.name(), Access::Write)?;
        for row in &rows {
            table.validate_row(row)?;
        }

        let mut visible: HashMap<_, _> = self
            .visible_rows(table.name(), None)?
            .into_iter()
            .map(|row| (row.id(), row))
            .collect();
        let mut changes = Vec::with_capacity(rows.len());
        for after in rows {
            let before = visible.remove(&after.id()).ok_or_else(|| Error::RowNotFound {
                table: table.name().to_string(),
                id: after.id(),
            })?;
            changes.push((before, after));
        }
        let updated: Vec<Row> = changes.iter().map(|(_, after)| after.clone()).collect();
        self.check_unique(table, &updated)?;

        let count = changes.len();
        let journal = self.journal.table_mut(table.name());
        for (before, after) in changes {
            journal.update(before, after);
        }
        debug!(txn = self.id, table = table.name(), rows = count, "update buffered");
        Ok(count)
    }

    /// Set `column` to `value` on every row matching `predicate`
    pub fn set(
        &mut self,
        table: &TableDef,
        column: &Column,
        value: Value,
        predicate: Option<&Predicate>,
    ) -> Result<usize> {
        let result = self.set_column(table, column, value, predicate);
        self.guard(result)
    }

    fn set_column(
        &mut self,
        table: &TableDef,
        column: &Column,
        value: Value,
        predicate: Option<&Predicate>,
    ) -> Result<usize> {
        self.ensure_active()?;
        self.check_scope(table.name(), Access::Write)?;
        if column.table_name() != table.name() {
            return Err(Error::ColumnNotFound(
                column.name().to_string(),
                table.name().to_string(),
            ));
        }
        column.check_value(&value)?;
        Self::check_predicate(table, predicate)?;

        let changes: Vec<(Row, Row)> = self
            .visible_rows(table.name(), predicate)?
            .into_iter()
            .map(|before| {
                let mut after = before.clone();
                after.set(column.position(), value.clone());
                (before, after)
            })
            .collect();
        let updated: Vec<Row> = changes.iter().map(|(_, after)| after.clone()).collect();
        self.check_unique(table, &updated)?;

        let count = changes.len();
        let journal = self.journal.table_mut(table.name());
        for (before, after) in changes {
            journal.update(before, after);
        }
        debug!(txn = self.id, column = %column, rows = count, "update buffered");
        Ok(count)
    }

    /// Buffer deletion of every row of `table` matching `predicate`
    /// (all rows when `None`)
    pub fn delete(&mut self, table: &TableDef, predicate: Option<&Predicate>) -> Result<usize> {
        let result = self.delete_rows(table, predicate);
        self.guard(result)
    }

    fn delete_rows(&mut self, table: &TableDef, predicate: Option<&Predicate>) -> Result<usize> {
        self.ensure_active()?;
        self.check_scope(table.name(), Access::Write)?;
        Self::check_predicate(table, predicate)?;

        let matching = self.visible_rows(table.name(), predicate)?;
        let count = matching.len();
        let journal = self.journal.table_mut(table.name());
        for row in matching {
            journal.delete(row);
        }
        debug!(txn = self.id, table = table.name(), rows = count, "delete buffered");
        Ok(count)
    }

    /// Rows of `table` matching `predicate` (all rows when `None`), including
    /// this transaction's own buffered changes
    pub fn query(&mut self, table: &TableDef, predicate: Option<&Predicate>) -> Result<Vec<Row>> {
        let result = self.query_rows(table, predicate);
        self.guard(result)
    }

    fn query_rows(&self, table: &TableDef, predicate: Option<&Predicate>) -> Result<Vec<Row>> {
        self.ensure_active()?;
        self.check_scope(table.name(), Access::Read)?;
        Self::check_predicate(table, predicate)?;
        self.visible_rows(table.name(), predicate)
    }

    /// Apply the buffered effects and release the scope locks.
    ///
    /// If storage rejects any effect, everything already applied is reverted,
    /// the transaction ends rolled back and the failure is returned.
    pub fn commit(&mut self) -> Result<TransactionStats> {
        self.ensure_active()?;
        let journal = std::mem::take(&mut self.journal);

        match journal.apply(&*self.backend) {
            Ok(stats) => {
                self.finish(TransactionState::Committed)?;
                info!(
                    txn = self.id,
                    inserted = stats.inserted,
                    updated = stats.updated,
                    deleted = stats.deleted,
                    "transaction committed"
                );
                Ok(stats)
            }
            Err(err) => {
                warn!(txn = self.id, error = %err, "commit failed, rolling back");
                self.finish(TransactionState::RolledBack)?;
                Err(err)
            }
        }
    }

    /// Discard buffered effects and release the scope locks.
    ///
    /// Rolling back twice is a no-op. A committed transaction cannot be
    /// rolled back.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            TransactionState::RolledBack => Ok(()),
            TransactionState::Committed => Err(Error::InvalidTransactionState {
                txn: self.id,
                state: self.state.to_string(),
            }),
            TransactionState::Created
            | TransactionState::AdmissionPending
            | TransactionState::Active => {
                self.journal.clear();
                self.finish(TransactionState::RolledBack)?;
                info!(txn = self.id, "transaction rolled back");
                Ok(())
            }
        }
    }

    fn finish(&mut self, state: TransactionState) -> Result<()> {
        self.state = state;
        let promoted = self.locks.release(self.id)?;
        if !promoted.is_empty() {
            debug!(txn = self.id, ?promoted, "released scope locks");
        }
        Ok(())
    }
}

/// Unique keys of `table` as (constraint name, row positions): every unique
/// index plus each unique column not already keyed by one
fn unique_keys(table: &TableDef) -> Result<Vec<(String, Vec<usize>)>> {
    let mut keys = Vec::new();
    for index in table.indices().iter().filter(|index| index.unique) {
        let positions = index
            .columns
            .iter()
            .map(|member| table.require_column(&member.name).map(Column::position))
            .collect::<Result<Vec<_>>>()?;
        keys.push((index.normalized_name(), positions));
    }
    for column in table.columns().filter(|column| column.is_unique()) {
        let position = column.position();
        if !keys.iter().any(|(_, positions)| positions[..] == [position]) {
            keys.push((column.normalized_name(), vec![position]));
        }
    }
    Ok(keys)
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if matches!(
            self.state,
            TransactionState::Active | TransactionState::AdmissionPending
        ) {
            debug!(txn = self.id, state = %self.state, "transaction dropped unfinished");
            if let Err(err) = self.rollback() {
                warn!(txn = self.id, error = %err, "rollback on drop failed");
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("state", &self.state)
            .finish()
    }
}
