//! Scope lock manager
//!
//! Admits transactions based on their declared [`Scope`]. Each table is idle,
//! read-locked by any number of readers, or write-locked by a single writer.
//! A transaction becomes active only when every table it writes is idle and
//! no table it reads is write-locked; all of its locks are taken in one step
//! under a single mutex, so no per-table lock ordering exists to deadlock on.
//!
//! Transactions that cannot be admitted wait in one global FIFO queue. A
//! request is never granted ahead of an older queued request whose scope
//! conflicts with it, which keeps admission starvation free. Requests that
//! conflict with nothing older may proceed, and one release can promote
//! several queued transactions at once.
//!
//! Waiting uses a one-shot channel, so the same admission can be awaited
//! from async code or blocked on from a plain thread.

use super::scope::Scope;
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Transaction identifier
pub type TxnId = u64;

/// Lock state of a single table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLockState {
    Idle,
    ReadLocked(usize),
    WriteLocked(TxnId),
}

#[derive(Debug, Default)]
struct TableLock {
    writer: Option<TxnId>,
    readers: HashSet<TxnId>,
}

impl TableLock {
    fn state(&self) -> TableLockState {
        match self.writer {
            Some(txn) => TableLockState::WriteLocked(txn),
            None if self.readers.is_empty() => TableLockState::Idle,
            None => TableLockState::ReadLocked(self.readers.len()),
        }
    }
}

#[derive(Debug)]
struct Waiter {
    txn: TxnId,
    scope: Scope,
    grant: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct LockTable {
    tables: HashMap<String, TableLock>,
    queue: VecDeque<Waiter>,
    holders: HashMap<TxnId, Scope>,
}

impl LockTable {
    fn state_of(&self, table: &str) -> TableLockState {
        self.tables
            .get(table)
            .map_or(TableLockState::Idle, TableLock::state)
    }

    /// First table whose current lock state keeps `scope` out
    fn blocking_table<'a>(&self, scope: &'a Scope) -> Option<&'a str> {
        scope.tables().find(|table| match self.state_of(table) {
            TableLockState::Idle => false,
            TableLockState::ReadLocked(_) => scope.can_write(table),
            TableLockState::WriteLocked(_) => true,
        })
    }

    /// First table on which `scope` conflicts with a queued request
    fn queued_conflict<'a>(&self, scope: &'a Scope) -> Option<&'a str> {
        self.queue
            .iter()
            .find_map(|waiter| scope.first_conflict(&waiter.scope))
    }

    fn grant(&mut self, txn: TxnId, scope: &Scope) -> Result<()> {
        if let Some(table) = self.blocking_table(scope) {
            return Err(Error::Internal(format!(
                "transaction {} granted while table '{}' is {:?}",
                txn,
                table,
                self.state_of(table)
            )));
        }
        if self.holders.contains_key(&txn) {
            return Err(Error::Internal(format!(
                "transaction {} granted twice",
                txn
            )));
        }
        for table in scope.writes() {
            self.tables.entry(table.to_string()).or_default().writer = Some(txn);
        }
        for table in scope.reads() {
            self.tables
                .entry(table.to_string())
                .or_default()
                .readers
                .insert(txn);
        }
        self.holders.insert(txn, scope.clone());
        Ok(())
    }

    /// Drop every lock held by `txn`. Returns whether it held any.
    fn release(&mut self, txn: TxnId) -> bool {
        let Some(scope) = self.holders.remove(&txn) else {
            return false;
        };
        for table in scope.tables() {
            if let Some(lock) = self.tables.get_mut(table) {
                if lock.writer == Some(txn) {
                    lock.writer = None;
                }
                lock.readers.remove(&txn);
                if lock.state() == TableLockState::Idle {
                    self.tables.remove(table);
                }
            }
        }
        true
    }

    /// Remove a queued request. Returns whether it was queued.
    fn cancel(&mut self, txn: TxnId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|waiter| waiter.txn != txn);
        self.queue.len() != before
    }

    /// Walk the queue oldest first, granting every request that fits the
    /// current locks and conflicts with no older request still waiting.
    fn promote(&mut self) -> Result<Vec<TxnId>> {
        let mut promoted = Vec::new();
        let mut still_waiting: Vec<Scope> = Vec::new();
        let mut index = 0;

        while index < self.queue.len() {
            let waiter = &self.queue[index];
            let blocked = self.blocking_table(&waiter.scope).is_some()
                || still_waiting
                    .iter()
                    .any(|older| older.conflicts_with(&waiter.scope));
            if blocked {
                still_waiting.push(waiter.scope.clone());
                index += 1;
                continue;
            }

            let Some(waiter) = self.queue.remove(index) else {
                break;
            };
            if waiter.grant.is_closed() {
                trace!(txn = waiter.txn, "dropping abandoned admission request");
                continue;
            }
            self.grant(waiter.txn, &waiter.scope)?;
            // A receiver dropped after this point releases through Admission::drop.
            let _ = waiter.grant.send(());
            promoted.push(waiter.txn);
        }

        if !promoted.is_empty() {
            debug!(?promoted, queued = self.queue.len(), "promoted queued transactions");
        }
        Ok(promoted)
    }
}

/// Admission controller for scoped transactions
#[derive(Debug, Default)]
pub struct ScopeLockManager {
    state: Mutex<LockTable>,
}

impl ScopeLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LockTable>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("scope lock table poisoned".to_string()))
    }

    /// Ask for the locks of `scope`.
    ///
    /// The returned [`Admission`] is already granted when nothing stands in
    /// the way; otherwise the request is queued and the admission must be
    /// waited on. Dropping an admission gives up the request (or the locks,
    /// if it was granted but never claimed).
    pub fn request(self: &Arc<Self>, txn: TxnId, scope: Scope) -> Result<Admission> {
        let mut state = self.lock()?;
        if state.holders.contains_key(&txn) || state.queue.iter().any(|w| w.txn == txn) {
            return Err(Error::Internal(format!(
                "transaction {} requested admission twice",
                txn
            )));
        }

        let blocker = state
            .blocking_table(&scope)
            .or_else(|| state.queued_conflict(&scope))
            .map(str::to_string);

        match blocker {
            None => {
                state.grant(txn, &scope)?;
                trace!(txn, %scope, "admitted");
                Ok(Admission::new(txn, Arc::clone(self), None))
            }
            Some(table) => {
                let (grant, granted) = oneshot::channel();
                debug!(txn, %scope, blocking_table = %table, "queued for admission");
                state.queue.push_back(Waiter { txn, scope, grant });
                Ok(Admission::new(txn, Arc::clone(self), Some(granted)))
            }
        }
    }

    /// Release every lock held by `txn`, or withdraw its queued request, then
    /// promote whatever became admissible. Releasing an unknown or already
    /// released transaction is a no-op.
    pub fn release(&self, txn: TxnId) -> Result<Vec<TxnId>> {
        let mut state = self.lock()?;
        let held = state.release(txn);
        let queued = !held && state.cancel(txn);
        if !held && !queued {
            return Ok(Vec::new());
        }
        trace!(txn, held, queued, "released");
        state.promote()
    }

    /// Does `txn` currently hold its locks?
    pub fn is_active(&self, txn: TxnId) -> bool {
        self.lock()
            .map(|state| state.holders.contains_key(&txn))
            .unwrap_or(false)
    }

    /// Is `txn` waiting for admission?
    pub fn is_queued(&self, txn: TxnId) -> bool {
        self.lock()
            .map(|state| state.queue.iter().any(|w| w.txn == txn))
            .unwrap_or(false)
    }

    pub fn queued_len(&self) -> usize {
        self.lock().map(|state| state.queue.len()).unwrap_or(0)
    }

    pub fn active_count(&self) -> usize {
        self.lock().map(|state| state.holders.len()).unwrap_or(0)
    }

    pub fn table_state(&self, table: &str) -> TableLockState {
        self.lock()
            .map(|state| state.state_of(table))
            .unwrap_or(TableLockState::Idle)
    }
}

/// A granted or pending admission
#[derive(Debug)]
pub struct Admission {
    txn: TxnId,
    manager: Arc<ScopeLockManager>,
    pending: Option<oneshot::Receiver<()>>,
    claimed: bool,
}

impl Admission {
    fn new(
        txn: TxnId,
        manager: Arc<ScopeLockManager>,
        pending: Option<oneshot::Receiver<()>>,
    ) -> Self {
        Self {
            txn,
            manager,
            pending,
            claimed: false,
        }
    }

    pub fn txn(&self) -> TxnId {
        self.txn
    }

    /// Was the request queued rather than granted on the spot?
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn cancelled(&self) -> Error {
        Error::InvalidTransactionState {
            txn: self.txn,
            state: "cancelled while waiting for admission".to_string(),
        }
    }

    /// Block the current thread until the locks are granted.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`Admission::granted`] there.
    pub fn wait(mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            pending.blocking_recv().map_err(|_| self.cancelled())?;
        }
        self.claimed = true;
        Ok(())
    }

    /// Wait asynchronously until the locks are granted
    pub async fn granted(mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            pending.await.map_err(|_| self.cancelled())?;
        }
        self.claimed = true;
        Ok(())
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if !self.claimed {
            if let Err(err) = self.manager.release(self.txn) {
                warn!(txn = self.txn, error = %err, "failed to withdraw admission");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<ScopeLockManager> {
        Arc::new(ScopeLockManager::new())
    }

    #[test]
    fn test_disjoint_scopes_run_together() {
        let locks = manager();
        let a = locks.request(1, Scope::writing(["A"])).unwrap();
        let b = locks.request(2, Scope::writing(["B"])).unwrap();
        assert!(!a.is_pending());
        assert!(!b.is_pending());
        a.wait().unwrap();
        b.wait().unwrap();
        assert!(locks.is_active(1));
        assert!(locks.is_active(2));
        assert_eq!(locks.table_state("A"), TableLockState::WriteLocked(1));
        assert_eq!(locks.table_state("B"), TableLockState::WriteLocked(2));
    }

    #[test]
    fn test_readers_share_writers_exclude() {
        let locks = manager();
        locks.request(1, Scope::reading(["A"])).unwrap().wait().unwrap();
        locks.request(2, Scope::reading(["A"])).unwrap().wait().unwrap();
        assert_eq!(locks.table_state("A"), TableLockState::ReadLocked(2));

        let writer = locks.request(3, Scope::writing(["A"])).unwrap();
        assert!(writer.is_pending());
        assert!(locks.is_queued(3));

        assert!(locks.release(1).unwrap().is_empty());
        assert_eq!(locks.release(2).unwrap(), vec![3]);
        writer.wait().unwrap();
        assert_eq!(locks.table_state("A"), TableLockState::WriteLocked(3));

        locks.release(3).unwrap();
        assert_eq!(locks.table_state("A"), TableLockState::Idle);
    }

    #[test]
    fn test_fifo_no_overtaking() {
        let locks = manager();
        locks.request(1, Scope::reading(["A"])).unwrap().wait().unwrap();

        // 2 waits for the reader to leave; 3 would fit beside reader 1 but must
        // not overtake the older conflicting writer.
        let writer = locks.request(2, Scope::writing(["A"])).unwrap();
        let reader = locks.request(3, Scope::reading(["A"])).unwrap();
        assert!(writer.is_pending());
        assert!(reader.is_pending());

        // Disjoint from everything queued: admitted at once.
        let other = locks.request(4, Scope::writing(["B"])).unwrap();
        assert!(!other.is_pending());
        other.wait().unwrap();

        assert_eq!(locks.release(1).unwrap(), vec![2]);
        writer.wait().unwrap();
        assert_eq!(locks.release(2).unwrap(), vec![3]);
        reader.wait().unwrap();
    }

    #[test]
    fn test_one_release_promotes_many() {
        let locks = manager();
        locks.request(1, Scope::writing(["A", "B"])).unwrap().wait().unwrap();
        let a = locks.request(2, Scope::writing(["A"])).unwrap();
        let b = locks.request(3, Scope::writing(["B"])).unwrap();
        let a_again = locks.request(4, Scope::reading(["A"])).unwrap();

        assert_eq!(locks.release(1).unwrap(), vec![2, 3]);
        assert!(locks.is_queued(4));
        a.wait().unwrap();
        b.wait().unwrap();
        assert_eq!(locks.release(2).unwrap(), vec![4]);
        a_again.wait().unwrap();
    }

    #[test]
    fn test_release_is_idempotent_and_cancels_queued() {
        let locks = manager();
        locks.request(1, Scope::writing(["A"])).unwrap().wait().unwrap();
        let queued = locks.request(2, Scope::writing(["A"])).unwrap();
        let behind = locks.request(3, Scope::reading(["A"])).unwrap();

        // Withdrawing 2 does not admit 3 while 1 still writes A.
        assert!(locks.release(2).unwrap().is_empty());
        assert!(!locks.is_queued(2));
        assert!(queued.wait().is_err());

        assert_eq!(locks.release(1).unwrap(), vec![3]);
        assert!(locks.release(1).unwrap().is_empty());
        assert!(locks.release(99).unwrap().is_empty());
        behind.wait().unwrap();
    }

    #[test]
    fn test_dropped_admission_gives_up() {
        let locks = manager();
        locks.request(1, Scope::writing(["A"])).unwrap().wait().unwrap();
        drop(locks.request(2, Scope::writing(["A"])).unwrap());
        assert_eq!(locks.queued_len(), 0);

        // Granted but never claimed: the locks go back.
        drop(locks.request(3, Scope::writing(["B"])).unwrap());
        assert_eq!(locks.table_state("B"), TableLockState::Idle);
    }

    #[test]
    fn test_duplicate_request_is_internal_error() {
        let locks = manager();
        let first = locks.request(1, Scope::writing(["A"])).unwrap();
        assert!(matches!(
            locks.request(1, Scope::writing(["B"])),
            Err(Error::Internal(_))
        ));
        first.wait().unwrap();
    }

    #[tokio::test]
    async fn test_async_admission() {
        let locks = manager();
        locks.request(1, Scope::writing(["A"])).unwrap().wait().unwrap();
        let pending = locks.request(2, Scope::writing(["A"])).unwrap();

        let waiter = tokio::spawn(pending.granted());
        tokio::task::yield_now().await;
        assert!(locks.is_queued(2));

        locks.release(1).unwrap();
        waiter.await.unwrap().unwrap();
        assert!(locks.is_active(2));
    }
}
