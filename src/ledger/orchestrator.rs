//! Transfer Orchestrator
//!
//! The one composite operation: move `amount` from one account to another in
//! a single transaction.
//!
//! # Lock ordering
//!
//! Balance updates take row locks. Both updates are always issued in
//! ascending account id order, whichever side is the source, so two
//! transfers over the same pair (in either direction) queue on the same
//! first row and can never wait on each other in a cycle.
//!
//! # Retry
//!
//! A `Conflict` (deadlock victim, serialization failure, lock timeout) means
//! the attempt committed nothing. The whole unit of work is re-run up to
//! `RetryConfig::max_attempts` times with a short jittered backoff. Every
//! other error is returned as-is on first sight.
//!
//! # Known gap
//!
//! Balances may go negative. No sufficient-funds check is done here or in
//! the schema; callers that need one must check before calling or add a
//! datastore constraint.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::cancel::CancelSignal;
use super::error::{LedgerError, LedgerResult};
use super::executor::TransactionExecutor;
use super::models::{CreateEntryParams, CreateTransferParams};
use super::store::{LedgerStore, LedgerTx};
use super::types::{TransferRequest, TransferResult};
use crate::config::RetryConfig;
use crate::core_types::{AccountId, Amount};

pub struct TransferOrchestrator {
    executor: TransactionExecutor,
    retry: RetryConfig,
}

impl TransferOrchestrator {
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryConfig) -> Self {
        Self {
            executor: TransactionExecutor::new(store),
            retry,
        }
    }

    pub async fn transfer(&self, req: TransferRequest) -> LedgerResult<TransferResult> {
        self.transfer_with_cancel(req, &CancelSignal::none()).await
    }

    /// Transfer, giving up with `Cancelled` once `cancel` trips.
    ///
    /// The result is only returned after a confirmed commit.
    pub async fn transfer_with_cancel(
        &self,
        req: TransferRequest,
        cancel: &CancelSignal,
    ) -> LedgerResult<TransferResult> {
        req.validate()?;

        let max_attempts = self.retry.attempts();
        let mut attempt = 1;
        loop {
            let result = self
                .executor
                .run_in_transaction(cancel, move |tx| Box::pin(execute_transfer(tx, req)))
                .await;

            match result {
                Ok(result) => {
                    info!(
                        transfer_id = result.transfer.id,
                        from_account_id = req.from_account_id,
                        to_account_id = req.to_account_id,
                        amount = req.amount,
                        attempt,
                        "Transfer committed"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        from_account_id = req.from_account_id,
                        to_account_id = req.to_account_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transfer conflicted, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(LedgerError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    error!(
                        from_account_id = req.from_account_id,
                        to_account_id = req.to_account_id,
                        attempts = attempt,
                        error = %e,
                        "Transfer retries exhausted"
                    );
                    return Err(LedgerError::Conflict(format!(
                        "transfer from account {} to account {} gave up after {} attempts: {}",
                        req.from_account_id, req.to_account_id, attempt, e
                    )));
                }
                Err(e) => {
                    debug!(
                        from_account_id = req.from_account_id,
                        to_account_id = req.to_account_id,
                        error = %e,
                        "Transfer failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// Balance deltas in lock order (ascending account id)
fn ordered_deltas(req: &TransferRequest) -> [(AccountId, Amount); 2] {
    let debit = (req.from_account_id, -req.amount);
    let credit = (req.to_account_id, req.amount);
    if req.from_account_id < req.to_account_id {
        [debit, credit]
    } else {
        [credit, debit]
    }
}

/// The unit of work: transfer row, debit entry, credit entry, then both
/// balance updates in lock order.
async fn execute_transfer(
    tx: &mut dyn LedgerTx,
    req: TransferRequest,
) -> LedgerResult<TransferResult> {
    let transfer = tx
        .create_transfer(CreateTransferParams {
            from_account_id: req.from_account_id,
            to_account_id: req.to_account_id,
            amount: req.amount,
        })
        .await?;

    let from_entry = tx
        .create_entry(CreateEntryParams {
            account_id: req.from_account_id,
            amount: -req.amount,
        })
        .await?;

    let to_entry = tx
        .create_entry(CreateEntryParams {
            account_id: req.to_account_id,
            amount: req.amount,
        })
        .await?;

    let [(first_id, first_delta), (second_id, second_delta)] = ordered_deltas(&req);
    let first = tx.add_account_balance(first_id, first_delta).await?;
    let second = tx.add_account_balance(second_id, second_delta).await?;

    let (from_account, to_account) = if first.id == req.from_account_id {
        (first, second)
    } else {
        (second, first)
    };

    Ok(TransferResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_id_source_debits_first() {
        let req = TransferRequest::new(3, 7, 25);
        assert_eq!(ordered_deltas(&req), [(3, -25), (7, 25)]);
    }

    #[test]
    fn test_higher_id_source_credits_first() {
        let req = TransferRequest::new(7, 3, 25);
        assert_eq!(ordered_deltas(&req), [(3, 25), (7, -25)]);
    }

    #[test]
    fn test_opposite_directions_lock_same_first_row() {
        let ab = ordered_deltas(&TransferRequest::new(11, 4, 1));
        let ba = ordered_deltas(&TransferRequest::new(4, 11, 1));
        assert_eq!(ab[0].0, ba[0].0);
        assert_eq!(ab[1].0, ba[1].0);
    }

    #[test]
    fn test_deltas_sum_to_zero() {
        for req in [TransferRequest::new(1, 2, 40), TransferRequest::new(2, 1, 40)] {
            let [(_, a), (_, b)] = ordered_deltas(&req);
            assert_eq!(a + b, 0);
        }
    }
}
