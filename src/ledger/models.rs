//! Ledger rows and the parameters used to create them

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::error::LedgerError;
use crate::core_types::{AccountId, Amount, EntryId, TransferId};

/// Page size bounds for [`ListAccountsParams::page`]
pub const MIN_PAGE_SIZE: i64 = 5;
pub const MAX_PAGE_SIZE: i64 = 10;

/// Supported currency codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    USD,
    EUR,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            other => Err(LedgerError::InvalidArgument(format!(
                "unsupported currency: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A balance-holding account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    /// Smallest currency unit
    pub balance: Amount,
    #[sqlx(try_from = "String")]
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

/// Immutable ledger line: one account's movement for one transfer.
/// Negative = debit, positive = credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of a directed money movement. `amount` is always positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAccountParams {
    pub owner: String,
    pub currency: Currency,
    pub balance: Amount,
}

impl CreateAccountParams {
    pub fn new(
        owner: impl Into<String>,
        currency: Currency,
        balance: Amount,
    ) -> Result<Self, LedgerError> {
        let owner = owner.into();
        if owner.trim().is_empty() {
            return Err(LedgerError::InvalidArgument(
                "owner must not be empty".to_string(),
            ));
        }
        Ok(Self {
            owner,
            currency,
            balance,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListAccountsParams {
    pub limit: i64,
    pub offset: i64,
}

impl ListAccountsParams {
    pub fn new(limit: i64, offset: i64) -> Result<Self, LedgerError> {
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(LedgerError::InvalidArgument(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}, got {limit}"
            )));
        }
        if offset < 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "offset must not be negative, got {offset}"
            )));
        }
        Ok(Self { limit, offset })
    }

    /// 1-based page number, `page_size` in `MIN_PAGE_SIZE..=MAX_PAGE_SIZE`
    pub fn page(page_id: i64, page_size: i64) -> Result<Self, LedgerError> {
        if page_id < 1 {
            return Err(LedgerError::InvalidArgument(format!(
                "page_id must be at least 1, got {page_id}"
            )));
        }
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(LedgerError::InvalidArgument(format!(
                "page_size must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}, got {page_size}"
            )));
        }
        Self::new(page_size, (page_id - 1).saturating_mul(page_size))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_parse() {
        assert_eq!("USD".parse::<Currency>().unwrap(), Currency::USD);
        assert_eq!(Currency::try_from("EUR".to_string()).unwrap(), Currency::EUR);
        assert!(matches!(
            "CAD".parse::<Currency>(),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            "usd".parse::<Currency>(),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert_eq!(Currency::EUR.to_string(), "EUR");
    }

    #[test]
    fn test_blank_owner_rejected() {
        assert!(CreateAccountParams::new("  ", Currency::USD, 0).is_err());
        let params = CreateAccountParams::new("alice", Currency::USD, 100).unwrap();
        assert_eq!(params.owner, "alice");
        assert_eq!(params.balance, 100);
    }

    #[test]
    fn test_list_params_bounds() {
        assert!(ListAccountsParams::new(0, 0).is_err());
        assert!(ListAccountsParams::new(MAX_PAGE_SIZE + 1, 0).is_err());
        assert!(ListAccountsParams::new(5, -1).is_err());
        assert_eq!(
            ListAccountsParams::page(2, 5).unwrap(),
            ListAccountsParams {
                limit: 5,
                offset: 5
            }
        );
        assert!(ListAccountsParams::page(0, 5).is_err());
        assert!(ListAccountsParams::page(1, MIN_PAGE_SIZE - 1).is_err());
        assert!(ListAccountsParams::page(1, MAX_PAGE_SIZE + 1).is_err());
        assert_eq!(
            ListAccountsParams::page(3, MAX_PAGE_SIZE).unwrap().offset,
            2 * MAX_PAGE_SIZE
        );
    }
}
