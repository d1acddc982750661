//! Transaction module
//!
//! Scope-based admission control and the transaction runtime built on it.

pub mod journal;
pub mod lock;
pub mod scope;
pub mod transaction;

pub use journal::TransactionStats;
pub use lock::{Admission, ScopeLockManager, TableLockState, TxnId};
pub use scope::Scope;
pub use transaction::{PendingTransaction, Transaction, TransactionManager, TransactionState};
