//! Transfer request and result types

use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use super::models::{Account, Entry, Transfer};
use crate::core_types::{AccountId, Amount};

/// Money movement between two accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
}

impl TransferRequest {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: Amount) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Checked before any transaction is opened.
    ///
    /// Sufficient balance is NOT checked here.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.amount <= 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.from_account_id == self.to_account_id {
            return Err(LedgerError::InvalidArgument(format!(
                "cannot transfer from account {} to itself",
                self.from_account_id
            )));
        }
        Ok(())
    }
}

/// Everything a committed transfer wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    /// Debit entry (`-amount`) on the source account
    pub from_entry: Entry,
    /// Credit entry (`+amount`) on the destination account
    pub to_entry: Entry,
    /// Source account after the debit
    pub from_account: Account,
    /// Destination account after the credit
    pub to_account: Account,
}
