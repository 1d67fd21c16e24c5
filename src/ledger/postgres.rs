//! PostgreSQL Ledger Store
//!
//! Runtime-checked sqlx queries against `accounts`, `transfers` and `entries`
//! (see [`Database::init_schema`](crate::db::Database::init_schema)).
//! Each query is written once against a generic `Executor`, so the same
//! function serves pooled autocommit handles and open transactions.

use std::ops::DerefMut;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use super::error::{LedgerError, LedgerResult};
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, Transfer,
};
use super::store::{LedgerQueries, LedgerStore, LedgerTx};
use crate::config::{AppConfig, IsolationLevel};
use crate::core_types::{AccountId, Amount, EntryId, TransferId};

mod queries {
    use sqlx::{Executor, Postgres};

    use super::super::models::{
        Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
        ListAccountsParams, Transfer,
    };
    use crate::core_types::{AccountId, Amount, EntryId, TransferId};

    pub async fn create_account<'e, E>(
        executor: E,
        params: &CreateAccountParams,
    ) -> Result<Account, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as(
            r#"INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3)
               RETURNING id, owner, balance, currency, created_at"#,
        )
        .bind(&params.owner)
        .bind(params.balance)
        .bind(params.currency.as_str())
        .fetch_one(executor)
        .await
    }

    pub async fn get_account<'e, E>(
        executor: E,
        id: AccountId,
    ) -> Result<Option<Account>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn list_accounts<'e, E>(
        executor: E,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts ORDER BY id LIMIT $1 OFFSET $2"#,
        )
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(executor)
        .await
    }

    /// Row-locking read-modify-write in one statement
    pub async fn add_account_balance<'e, E>(
        executor: E,
        id: AccountId,
        delta: Amount,
    ) -> Result<Option<Account>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as(
            r#"UPDATE accounts SET balance = balance + $2 WHERE id = $1
               RETURNING id, owner, balance, currency, created_at"#,
        )
        .bind(id)
        .bind(delta)
        .fetch_optional(executor)
        .await
    }

    pub async fn create_transfer<'e, E>(
        executor: E,
        params: CreateTransferParams,
    ) -> Result<Transfer, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as(
            r#"INSERT INTO transfers (from_account_id, to_account_id, amount) VALUES ($1, $2, $3)
               RETURNING id, from_account_id, to_account_id, amount, created_at"#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(executor)
        .await
    }

    pub async fn create_entry<'e, E>(
        executor: E,
        params: CreateEntryParams,
    ) -> Result<Entry, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as(
            r#"INSERT INTO entries (account_id, amount) VALUES ($1, $2)
               RETURNING id, account_id, amount, created_at"#,
        )
        .bind(params.account_id)
        .bind(params.amount)
        .fetch_one(executor)
        .await
    }

    pub async fn get_transfer<'e, E>(
        executor: E,
        id: TransferId,
    ) -> Result<Option<Transfer>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn get_entry<'e, E>(
        executor: E,
        id: EntryId,
    ) -> Result<Option<Entry>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as(
            r#"SELECT id, account_id, amount, created_at
               FROM entries WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }
}

/// Server process behind an open transaction, so it can be interrupted from
/// another connection.
struct Backend {
    pool: PgPool,
    pid: i32,
}

impl Backend {
    /// `pg_cancel_backend`: ends the statement the backend is running (or
    /// the lock it is waiting on) with SQLSTATE 57014.
    async fn interrupt(&self) -> LedgerResult<()> {
        let cancelled: bool = sqlx::query_scalar("SELECT pg_cancel_backend($1)")
            .bind(self.pid)
            .fetch_one(&self.pool)
            .await?;
        debug!(pid = self.pid, cancelled, "Interrupted PostgreSQL backend");
        Ok(())
    }
}

/// A connection-backed handle: either a pooled connection (autocommit) or
/// an open transaction.
pub struct PgSession<C> {
    conn: C,
    backend: Option<Backend>,
}

pub type PgTx = PgSession<Transaction<'static, Postgres>>;

#[async_trait]
impl<C> LedgerQueries for PgSession<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn create_account(&mut self, params: CreateAccountParams) -> LedgerResult<Account> {
        Ok(queries::create_account(&mut *self.conn, &params).await?)
    }

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        queries::get_account(&mut *self.conn, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {id}")))
    }

    async fn list_accounts(&mut self, params: ListAccountsParams) -> LedgerResult<Vec<Account>> {
        Ok(queries::list_accounts(&mut *self.conn, params).await?)
    }

    async fn add_account_balance(
        &mut self,
        id: AccountId,
        delta: Amount,
    ) -> LedgerResult<Account> {
        queries::add_account_balance(&mut *self.conn, id, delta)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {id}")))
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> LedgerResult<Transfer> {
        Ok(queries::create_transfer(&mut *self.conn, params).await?)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> LedgerResult<Entry> {
        Ok(queries::create_entry(&mut *self.conn, params).await?)
    }

    async fn get_transfer(&mut self, id: TransferId) -> LedgerResult<Transfer> {
        queries::get_transfer(&mut *self.conn, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transfer {id}")))
    }

    async fn get_entry(&mut self, id: EntryId) -> LedgerResult<Entry> {
        queries::get_entry(&mut *self.conn, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("entry {id}")))
    }
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        Ok(self.conn.commit().await?)
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        Ok(self.conn.rollback().await?)
    }

    /// A dropped query keeps running on the server and a plain ROLLBACK
    /// would queue behind it, so interrupt the backend first.
    async fn abort(self: Box<Self>) -> LedgerResult<()> {
        let PgSession { conn, backend } = *self;
        if let Some(backend) = &backend
            && let Err(e) = backend.interrupt().await
        {
            warn!(pid = backend.pid, error = %e, "Failed to interrupt PostgreSQL backend");
        }
        Ok(conn.rollback().await?)
    }
}

/// PostgreSQL-backed [`LedgerStore`]
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    isolation: IsolationLevel,
    lock_timeout: Option<Duration>,
}

impl PgLedgerStore {
    /// Create a store over the pool at READ COMMITTED, waiting on row locks
    /// without limit
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            isolation: IsolationLevel::default(),
            lock_timeout: None,
        }
    }

    /// Store with the isolation level and lock timeout from config
    pub fn from_config(pool: PgPool, config: &AppConfig) -> Self {
        let store = Self::new(pool).with_isolation(config.isolation);
        match config.lock_timeout() {
            Some(timeout) => store.with_lock_timeout(timeout),
            None => store,
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// `SET LOCAL lock_timeout` for every transaction: a longer row-lock
    /// wait fails with SQLSTATE 55P03, which surfaces as `Conflict`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(self.isolation.set_transaction_sql())
            .execute(&mut *tx)
            .await?;
        if let Some(timeout) = self.lock_timeout {
            // SET does not take bind parameters; the value is an integer
            sqlx::query(&format!("SET LOCAL lock_timeout = {}", timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
        }
        let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *tx)
            .await?;
        debug!(isolation = ?self.isolation, pid, "PostgreSQL transaction started");

        Ok(Box::new(PgSession {
            conn: tx,
            backend: Some(Backend {
                pool: self.pool.clone(),
                pid,
            }),
        }))
    }

    async fn acquire(&self) -> LedgerResult<Box<dyn LedgerQueries>> {
        let conn: PoolConnection<Postgres> = self.pool.acquire().await?;
        Ok(Box::new(PgSession {
            conn,
            backend: None,
        }))
    }
}
