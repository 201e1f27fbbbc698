//! Signal persistence: the transactional store and the retry policy around it.

pub mod persister;
pub mod store;

pub use persister::{
    CancelFlag, PersistFailure, PersistFailureCause, PersistReceipt, PersistenceAttempt, RetryingPersister,
};
pub use store::{RunLedgerEntry, SignalStore, SqliteSignalStore, StoredSignal};
