//! In-memory Ledger Store
//!
//! Behaves like a row-locking datastore at READ COMMITTED:
//! - `add_account_balance` takes the account's row lock and keeps it until
//!   the transaction ends; later readers see the committed balance.
//! - Writes are staged per transaction and applied on commit, before the row
//!   locks are released. Rollback or drop discards them.
//! - Id sequences are not rolled back (same as PostgreSQL sequences).
//! - A lock wait longer than the lock timeout fails with `Conflict`, which
//!   stands in for a deadlock detector.
//!
//! Faults can be injected to exercise rollback and retry paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::error::{LedgerError, LedgerResult};
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, Transfer,
};
use super::store::{LedgerQueries, LedgerStore, LedgerTx};
use crate::core_types::{AccountId, Amount, EntryId, TransferId};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Injectable failure points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `begin` fails with `Persistence`
    Begin,
    /// `create_entry` fails with `Persistence`
    CreateEntry,
    /// `add_account_balance` fails with `Conflict`
    BalanceConflict,
    /// `commit` fails with `Persistence`; nothing is applied
    Commit,
    /// `commit` fails with `Conflict` (serialization failure at commit); nothing is applied
    CommitConflict,
    /// `rollback` reports failure; writes are still discarded
    Rollback,
    /// `rollback` never completes, like one queued behind a statement still
    /// running in the datastore
    RollbackStall,
}

#[derive(Debug)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    transfers: BTreeMap<TransferId, Transfer>,
    entries: BTreeMap<EntryId, Entry>,
    next_account_id: AccountId,
    next_transfer_id: TransferId,
    next_entry_id: EntryId,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            accounts: BTreeMap::new(),
            transfers: BTreeMap::new(),
            entries: BTreeMap::new(),
            next_account_id: 1,
            next_transfer_id: 1,
            next_entry_id: 1,
        }
    }
}

#[derive(Debug)]
struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    faults: Mutex<HashMap<Fault, usize>>,
    lock_timeout: Duration,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        // A panic while holding the guard cannot leave the maps half-written
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_lock(&self, id: AccountId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id).or_default().clone()
    }

    fn take_fault(&self, fault: Fault) -> bool {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        match faults.get_mut(&fault) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// In-process [`LedgerStore`]. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// How long a transaction waits for a row lock before failing with `Conflict`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                faults: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    /// Make the next `times` hits of `fault` fail
    pub fn inject(&self, fault: Fault, times: usize) {
        let mut faults = self.shared.faults.lock().unwrap_or_else(|e| e.into_inner());
        *faults.entry(fault).or_default() += times;
    }

    pub fn pending_faults(&self, fault: Fault) -> usize {
        let faults = self.shared.faults.lock().unwrap_or_else(|e| e.into_inner());
        faults.get(&fault).copied().unwrap_or(0)
    }

    /// Committed transfer rows
    pub fn transfer_count(&self) -> usize {
        self.shared.tables().transfers.len()
    }

    /// Committed entry rows
    pub fn entry_count(&self) -> usize {
        self.shared.tables().entries.len()
    }

    /// Committed entries of one account, oldest first
    pub fn entries_for(&self, account_id: AccountId) -> Vec<Entry> {
        self.shared
            .tables()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        if self.shared.take_fault(Fault::Begin) {
            return Err(LedgerError::Persistence("injected fault: begin".into()));
        }
        Ok(Box::new(MemoryTx::new(self.shared.clone())))
    }

    async fn acquire(&self) -> LedgerResult<Box<dyn LedgerQueries>> {
        Ok(Box::new(MemoryConn {
            shared: self.shared.clone(),
        }))
    }
}

/// Open in-memory transaction
pub struct MemoryTx {
    shared: Arc<Shared>,
    locks: HashMap<AccountId, OwnedMutexGuard<()>>,
    /// Balances of locked rows as seen by this transaction
    balances: HashMap<AccountId, Amount>,
    new_accounts: BTreeMap<AccountId, Account>,
    new_transfers: BTreeMap<TransferId, Transfer>,
    new_entries: BTreeMap<EntryId, Entry>,
}

impl MemoryTx {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            locks: HashMap::new(),
            balances: HashMap::new(),
            new_accounts: BTreeMap::new(),
            new_transfers: BTreeMap::new(),
            new_entries: BTreeMap::new(),
        }
    }

    /// Row as visible to this transaction
    fn visible_account(&self, id: AccountId) -> Option<Account> {
        let mut account = match self.new_accounts.get(&id) {
            Some(account) => account.clone(),
            None => self.shared.tables().accounts.get(&id)?.clone(),
        };
        if let Some(balance) = self.balances.get(&id) {
            account.balance = *balance;
        }
        Some(account)
    }

    fn require_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.visible_account(id)
            .ok_or_else(|| LedgerError::NotFound(format!("account {id}")))
    }

    async fn lock_row(&mut self, id: AccountId) -> LedgerResult<()> {
        if self.locks.contains_key(&id) {
            return Ok(());
        }
        let lock = self.shared.row_lock(id);
        match tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                self.locks.insert(id, guard);
                Ok(())
            }
            Err(_) => Err(LedgerError::Conflict(format!("lock wait timeout on account {id}"))),
        }
    }

    /// Publish staged writes, then release the row locks
    fn apply(self) {
        {
            let mut tables = self.shared.tables();
            tables.accounts.extend(self.new_accounts);
            for (id, balance) in &self.balances {
                if let Some(account) = tables.accounts.get_mut(id) {
                    account.balance = *balance;
                }
            }
            tables.transfers.extend(self.new_transfers);
            tables.entries.extend(self.new_entries);
        }
        drop(self.locks);
    }
}

#[async_trait]
impl LedgerQueries for MemoryTx {
    async fn create_account(&mut self, params: CreateAccountParams) -> LedgerResult<Account> {
        let id = {
            let mut tables = self.shared.tables();
            let id = tables.next_account_id;
            tables.next_account_id += 1;
            id
        };
        let account = Account {
            id,
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        self.new_accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        self.require_account(id)
    }

    async fn list_accounts(&mut self, params: ListAccountsParams) -> LedgerResult<Vec<Account>> {
        let mut ids: Vec<AccountId> = self.shared.tables().accounts.keys().copied().collect();
        ids.extend(self.new_accounts.keys().copied());
        ids.sort_unstable();

        Ok(ids
            .into_iter()
            .skip(params.offset as usize)
            .take(params.limit as usize)
            .filter_map(|id| self.visible_account(id))
            .collect())
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: Amount,
    ) -> LedgerResult<Account> {
        if self.shared.take_fault(Fault::BalanceConflict) {
            return Err(LedgerError::Conflict(format!(
                "injected fault: serialization failure on account {id}"
            )));
        }
        self.require_account(id)?;
        self.lock_row(id).await?;

        // Re-read under the lock: the previous holder may have committed
        let mut account = self.require_account(id)?;
        account.balance = account
            .balance
            .checked_add(delta)
            .ok_or_else(|| {
                LedgerError::Persistence(format!("bigint out of range on account {id}"))
            })?;
        self.balances.insert(id, account.balance);
        Ok(account)
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> LedgerResult<Transfer> {
        if params.amount <= 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "transfer amount must be positive, got {}",
                params.amount
            )));
        }
        self.require_account(params.from_account_id)?;
        self.require_account(params.to_account_id)?;

        let id = {
            let mut tables = self.shared.tables();
            let id = tables.next_transfer_id;
            tables.next_transfer_id += 1;
            id
        };
        let transfer = Transfer {
            id,
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.new_transfers.insert(id, transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> LedgerResult<Entry> {
        if self.shared.take_fault(Fault::CreateEntry) {
            return Err(LedgerError::Persistence("injected fault: create_entry".into()));
        }
        self.require_account(params.account_id)?;

        let id = {
            let mut tables = self.shared.tables();
            let id = tables.next_entry_id;
            tables.next_entry_id += 1;
            id
        };
        let entry = Entry {
            id,
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.new_entries.insert(id, entry.clone());
        Ok(entry)
    }

    async fn get_transfer(&mut self, id: TransferId) -> LedgerResult<Transfer> {
        if let Some(transfer) = self.new_transfers.get(&id) {
            return Ok(transfer.clone());
        }
        self.shared
            .tables()
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("transfer {id}")))
    }

    async fn get_entry(&mut self, id: EntryId) -> LedgerResult<Entry> {
        if let Some(entry) = self.new_entries.get(&id) {
            return Ok(entry.clone());
        }
        self.shared
            .tables()
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("entry {id}")))
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        if self.shared.take_fault(Fault::Commit) {
            return Err(LedgerError::Persistence("injected fault: commit".into()));
        }
        if self.shared.take_fault(Fault::CommitConflict) {
            return Err(LedgerError::Conflict(
                "injected fault: could not serialize access".into(),
            ));
        }
        debug!(
            transfers = self.new_transfers.len(),
            entries = self.new_entries.len(),
            balances = self.balances.len(),
            "Memory transaction committed"
        );
        (*self).apply();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        if self.shared.take_fault(Fault::RollbackStall) {
            futures::future::pending::<()>().await;
        }
        if self.shared.take_fault(Fault::Rollback) {
            return Err(LedgerError::Persistence("injected fault: rollback".into()));
        }
        Ok(())
    }
}

/// Autocommit handle: each call runs in its own transaction
struct MemoryConn {
    shared: Arc<Shared>,
}

impl MemoryConn {
    async fn autocommit<T, F>(&self, op: F) -> LedgerResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut MemoryTx) -> BoxFuture<'t, LedgerResult<T>> + Send,
    {
        let mut tx = MemoryTx::new(self.shared.clone());
        let value = op(&mut tx).await?;
        tx.apply();
        Ok(value)
    }
}

#[async_trait]
impl LedgerQueries for MemoryConn {
    async fn create_account(&mut self, params: CreateAccountParams) -> LedgerResult<Account> {
        self.autocommit(move |tx| tx.create_account(params)).await
    }

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        self.autocommit(move |tx| tx.get_account(id)).await
    }

    async fn list_accounts(&mut self, params: ListAccountsParams) -> LedgerResult<Vec<Account>> {
        self.autocommit(move |tx| tx.list_accounts(params)).await
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: Amount,
    ) -> LedgerResult<Account> {
        self.autocommit(move |tx| tx.add_account_balance(id, delta)).await
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> LedgerResult<Transfer> {
        self.autocommit(move |tx| tx.create_transfer(params)).await
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> LedgerResult<Entry> {
        self.autocommit(move |tx| tx.create_entry(params)).await
    }

    async fn get_transfer(&mut self, id: TransferId) -> LedgerResult<Transfer> {
        self.autocommit(move |tx| tx.get_transfer(id)).await
    }

    async fn get_entry(&mut self, id: EntryId) -> LedgerResult<Entry> {
        self.autocommit(move |tx| tx.get_entry(id)).await
    }
}
