//! Transaction Executor
//!
//! Runs a unit of work inside one datastore transaction: commit on success,
//! rollback on any error or cancellation. There is no retry at this layer;
//! only the caller knows which errors are safe to repeat.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use super::cancel::CancelSignal;
use super::error::{LedgerError, LedgerResult};
use super::store::{LedgerStore, LedgerTx};

/// Upper bound on cleanup after cancellation
const ABORT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct TransactionExecutor {
    store: Arc<dyn LedgerStore>,
}

impl TransactionExecutor {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// [`run_in_transaction`](Self::run_in_transaction) without a cancellation signal
    pub async fn run<T, F>(&self, work: F) -> LedgerResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn LedgerTx) -> BoxFuture<'t, LedgerResult<T>> + Send,
    {
        self.run_in_transaction(&CancelSignal::none(), work).await
    }

    /// Run `work` against a fresh transaction.
    ///
    /// - `Ok` from `work` commits; a failed commit is `Transaction { stage: Commit }`.
    /// - `Err` from `work` rolls back and is returned unchanged, unless the
    ///   rollback itself fails (`Transaction { stage: Rollback }` carrying it).
    /// - Cancellation drops `work` mid-flight, aborts the transaction and
    ///   returns `Cancelled`. The abort is bounded by [`ABORT_TIMEOUT`]; past
    ///   that the handle is dropped, which still discards its writes.
    pub async fn run_in_transaction<T, F>(&self, cancel: &CancelSignal, work: F) -> LedgerResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn LedgerTx) -> BoxFuture<'t, LedgerResult<T>> + Send,
    {
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }

        let mut tx = self.store.begin().await?;
        debug!("Transaction started");

        let outcome = {
            let work = work(tx.as_mut());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = work => Some(result),
            }
        };

        match outcome {
            Some(Ok(value)) => {
                if let Err(e) = tx.commit().await {
                    error!(error = %e, "Failed to commit transaction");
                    return Err(LedgerError::commit_failed(e));
                }
                debug!("Transaction committed");
                Ok(value)
            }
            Some(Err(e)) => Err(Self::rollback(tx, e).await),
            None => {
                warn!("Unit of work cancelled, aborting transaction");
                match tokio::time::timeout(ABORT_TIMEOUT, tx.abort()).await {
                    Ok(Ok(())) => {
                        debug!("Transaction aborted");
                        Err(LedgerError::Cancelled)
                    }
                    Ok(Err(e)) => {
                        error!(error = %e, "Failed to abort cancelled transaction");
                        Err(LedgerError::rollback_failed(e, LedgerError::Cancelled))
                    }
                    Err(_) => {
                        error!(
                            timeout_ms = ABORT_TIMEOUT.as_millis() as u64,
                            "Abort timed out, abandoning transaction"
                        );
                        Err(LedgerError::Cancelled)
                    }
                }
            }
        }
    }

    /// Roll back and hand back the error to surface
    async fn rollback(tx: Box<dyn LedgerTx>, cause: LedgerError) -> LedgerError {
        match tx.rollback().await {
            Ok(()) => {
                debug!(cause = %cause, "Transaction rolled back");
                cause
            }
            Err(e) => {
                error!(error = %e, cause = %cause, "Failed to roll back transaction");
                LedgerError::rollback_failed(e, cause)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::{Fault, MemoryLedgerStore};
    use crate::ledger::models::{CreateAccountParams, CreateTransferParams, Currency};
    use crate::ledger::store::LedgerQueries;

    async fn setup() -> (MemoryLedgerStore, TransactionExecutor, i64, i64) {
        let store = MemoryLedgerStore::new();
        let mut conn = store.acquire().await.unwrap();
        let a = conn
            .create_account(CreateAccountParams::new("alice", Currency::USD, 100).unwrap())
            .await
            .unwrap();
        let b = conn
            .create_account(CreateAccountParams::new("bob", Currency::USD, 100).unwrap())
            .await
            .unwrap();
        let executor = TransactionExecutor::new(Arc::new(store.clone()));
        (store, executor, a.id, b.id)
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let (store, executor, a, _) = setup().await;

        let account = executor
            .run(move |tx| Box::pin(async move { tx.add_account_balance(a, 25).await }))
            .await
            .unwrap();
        assert_eq!(account.balance, 125);

        let mut conn = store.acquire().await.unwrap();
        assert_eq!(conn.get_account(a).await.unwrap().balance, 125);
    }

    #[tokio::test]
    async fn test_error_rolls_back_and_propagates_unchanged() {
        let (store, executor, a, b) = setup().await;

        let result: LedgerResult<()> = executor
            .run(move |tx| {
                Box::pin(async move {
                    tx.create_transfer(CreateTransferParams {
                        from_account_id: a,
                        to_account_id: b,
                        amount: 10,
                    })
                    .await?;
                    tx.add_account_balance(a, -10).await?;
                    Err(LedgerError::NotFound("account 999".into()))
                })
            })
            .await;

        match result {
            Err(LedgerError::NotFound(msg)) => assert_eq!(msg, "account 999"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(store.transfer_count(), 0);
        let mut conn = store.acquire().await.unwrap();
        assert_eq!(conn.get_account(a).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_commit_failure_is_transaction_error() {
        let (store, executor, a, _) = setup().await;
        store.inject(Fault::Commit, 1);

        let result = executor
            .run(move |tx| Box::pin(async move { tx.add_account_balance(a, 5).await }))
            .await;

        match result {
            Err(LedgerError::Transaction { stage, cause, .. }) => {
                assert_eq!(stage, crate::ledger::error::TxStage::Commit);
                assert!(matches!(cause.as_deref(), Some(LedgerError::Persistence(_))));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let mut conn = store.acquire().await.unwrap();
        assert_eq!(conn.get_account(a).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_rollback_failure_wraps_original_error() {
        let (store, executor, a, _) = setup().await;
        store.inject(Fault::Rollback, 1);

        let result: LedgerResult<()> = executor
            .run(move |tx| {
                Box::pin(async move {
                    tx.add_account_balance(a, 5).await?;
                    Err(LedgerError::InvalidArgument("boom".into()))
                })
            })
            .await;

        match result {
            Err(LedgerError::Transaction {
                stage,
                cause: Some(cause),
                ..
            }) => {
                assert_eq!(stage, crate::ledger::error::TxStage::Rollback);
                assert!(matches!(*cause, LedgerError::InvalidArgument(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // Writes were still discarded
        let mut conn = store.acquire().await.unwrap();
        assert_eq!(conn.get_account(a).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_cancel_mid_transaction_rolls_back() {
        let (store, executor, a, _) = setup().await;
        let cancel = CancelSignal::new();

        let trigger = cancel.clone();
        let result: LedgerResult<()> = executor
            .run_in_transaction(&cancel, move |tx| {
                Box::pin(async move {
                    tx.add_account_balance(a, 50).await?;
                    trigger.cancel();
                    // Never completes on its own
                    futures::future::pending::<()>().await;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Cancelled)));
        let mut conn = store.acquire().await.unwrap();
        assert_eq!(conn.get_account(a).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_deadline_expires_mid_transaction() {
        let (store, executor, a, _) = setup().await;
        let cancel = CancelSignal::new().with_timeout(Duration::from_millis(20));

        let result: LedgerResult<()> = executor
            .run_in_transaction(&cancel, move |tx| {
                Box::pin(async move {
                    tx.add_account_balance(a, 50).await?;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Cancelled)));
        let mut conn = store.acquire().await.unwrap();
        assert_eq!(conn.get_account(a).await.unwrap().balance, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_does_not_wait_on_stuck_rollback() {
        let (store, executor, a, _) = setup().await;
        // Rollback queued behind a statement that never finishes
        store.inject(Fault::RollbackStall, 1);
        let cancel = CancelSignal::new().with_timeout(Duration::from_millis(200));

        let started = tokio::time::Instant::now();
        let result: LedgerResult<()> = executor
            .run_in_transaction(&cancel, move |tx| {
                Box::pin(async move {
                    tx.add_account_balance(a, 50).await?;
                    futures::future::pending::<()>().await;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Cancelled)));
        let elapsed = started.elapsed();
        let deadline = Duration::from_millis(200);
        assert!(elapsed >= deadline);
        assert!(elapsed <= deadline + ABORT_TIMEOUT + Duration::from_millis(50));
        assert_eq!(store.pending_faults(Fault::RollbackStall), 0);

        // Dropped handle discarded the write and released the row
        let mut conn = store.acquire().await.unwrap();
        assert_eq!(conn.add_account_balance(a, 1).await.unwrap().balance, 101);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_begins() {
        let (store, executor, a, _) = setup().await;
        let cancel = CancelSignal::new();
        cancel.cancel();
        store.inject(Fault::Begin, 1);

        let result = executor
            .run_in_transaction(&cancel, move |tx| {
                Box::pin(async move { tx.add_account_balance(a, 1).await })
            })
            .await;
        assert!(matches!(result, Err(LedgerError::Cancelled)));
        // The begin fault was not consumed
        assert_eq!(store.pending_faults(Fault::Begin), 1);
    }
}
