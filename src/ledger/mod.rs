//! Double-Entry Ledger
//!
//! Accounts, transfers and the entries that record every balance movement.
//!
//! # Architecture
//!
//! ```text
//! TransferOrchestrator ── validate, retry on Conflict
//!        │
//! TransactionExecutor ── begin / commit / rollback, cancellation
//!        │
//! LedgerStore (trait) ── PgLedgerStore | MemoryLedgerStore
//! ```
//!
//! # Invariants
//!
//! 1. **Double entry**: a committed transfer owns exactly two entries, `-amount`
//!    on the source and `+amount` on the destination.
//! 2. **All or nothing**: transfer row, entries and both balance updates
//!    commit together or not at all.
//! 3. **Lock ordering**: balance rows are locked in ascending account id, so
//!    opposite-direction transfers never deadlock each other.
//! 4. **Atomic delta**: balances only change through `balance = balance + delta`,
//!    never a read followed by a write.

pub mod cancel;
pub mod error;
pub mod executor;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod postgres;
pub mod store;
pub mod types;


// Re-exports for convenience
pub use cancel::CancelSignal;
pub use error::{LedgerError, LedgerResult, TxStage};
pub use executor::TransactionExecutor;
pub use memory::{Fault, MemoryLedgerStore};
pub use models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Currency, Entry,
    ListAccountsParams, MAX_PAGE_SIZE, MIN_PAGE_SIZE, Transfer,
};
pub use orchestrator::TransferOrchestrator;
pub use postgres::PgLedgerStore;
pub use store::{LedgerQueries, LedgerStore, LedgerTx};
pub use types::{TransferRequest, TransferResult};
