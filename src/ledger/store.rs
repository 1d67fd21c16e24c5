//! Ledger Store seam
//!
//! Single-row persistence operations consumed by the transfer engine. Nothing
//! here contains cross-row logic; composing the rows into a transfer is the
//! orchestrator's job.
//!
//! Implementations:
//! - [`PgLedgerStore`](super::postgres::PgLedgerStore) - PostgreSQL via sqlx
//! - [`MemoryLedgerStore`](super::memory::MemoryLedgerStore) - in-process, for tests and embedding

use async_trait::async_trait;

use super::error::LedgerResult;
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, Transfer,
};
use crate::core_types::{AccountId, Amount, EntryId, TransferId};

/// Basic row operations, available on autocommit and transactional handles
#[async_trait]
pub trait LedgerQueries: Send {
    async fn create_account(&mut self, params: CreateAccountParams) -> LedgerResult<Account>;

    /// Fails with `NotFound` if the account does not exist
    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account>;

    /// Ordered by ascending id
    async fn list_accounts(&mut self, params: ListAccountsParams) -> LedgerResult<Vec<Account>>;

    /// Atomically add `delta` to the balance and return the updated row.
    ///
    /// Single statement, never read-then-write. Takes the row lock, which
    /// is held until the surrounding transaction ends.
    async fn add_account_balance(&mut self, id: AccountId, delta: Amount)
    -> LedgerResult<Account>;

    /// Fails with `NotFound` if either account does not exist
    async fn create_transfer(&mut self, params: CreateTransferParams) -> LedgerResult<Transfer>;

    /// Fails with `NotFound` if the account does not exist
    async fn create_entry(&mut self, params: CreateEntryParams) -> LedgerResult<Entry>;

    async fn get_transfer(&mut self, id: TransferId) -> LedgerResult<Transfer>;

    async fn get_entry(&mut self, id: EntryId) -> LedgerResult<Entry>;
}

/// Transaction-scoped handle.
///
/// Dropping the handle without calling [`commit`](LedgerTx::commit)
/// discards every write made through it.
#[async_trait]
pub trait LedgerTx: LedgerQueries {
    async fn commit(self: Box<Self>) -> LedgerResult<()>;

    async fn rollback(self: Box<Self>) -> LedgerResult<()>;

    /// Roll back after the unit of work was dropped mid-statement.
    ///
    /// A statement abandoned on the client may still be running (or waiting
    /// on a row lock) in the datastore; implementations must interrupt it
    /// instead of queueing the rollback behind it.
    async fn abort(self: Box<Self>) -> LedgerResult<()> {
        self.rollback().await
    }
}

/// Entry point to a datastore. Constructor-injected, never global.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Begin a transaction
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>>;

    /// Autocommit handle: every call is its own statement
    async fn acquire(&self) -> LedgerResult<Box<dyn LedgerQueries>>;
}
