//! Core types used throughout the ledger
//!
//! Identifier aliases shared by the store, the executor and the orchestrator.
//! All of them map to PostgreSQL `BIGSERIAL` keys.

/// Account ID - unique, immutable once assigned.
///
/// # Lock ordering:
/// Account IDs are totally ordered. Every transaction that updates two
/// balances takes the row locks in ascending `AccountId` order.
pub type AccountId = i64;

/// Entry ID - one per balance movement line
pub type EntryId = i64;

/// Transfer ID - one per directed money movement
pub type TransferId = i64;

/// Amount in the smallest currency unit (cents). Never floating point.
pub type Amount = i64;
