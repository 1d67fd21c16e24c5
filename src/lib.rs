//! Ledger Engine - Double-Entry Transfer Engine
//!
//! Moves money between accounts on PostgreSQL, one transaction per transfer,
//! with deadlock-free lock ordering and bounded retry on conflicts.
//!
//! # Modules
//!
//! - [`core_types`] - Identifier and amount aliases
//! - [`config`] - YAML configuration (pool, retry, isolation, logging)
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`ledger`] - Store seam, transaction executor and transfer orchestrator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ledger_engine::config::AppConfig;
//! use ledger_engine::db::Database;
//! use ledger_engine::ledger::{PgLedgerStore, TransferOrchestrator, TransferRequest};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load("dev")?;
//! let db = Database::connect_with(&config).await?;
//! let store = PgLedgerStore::from_config(db.pool().clone(), &config);
//! let orchestrator = TransferOrchestrator::new(Arc::new(store), config.retry);
//!
//! let result = orchestrator.transfer(TransferRequest::new(1, 2, 10)).await?;
//! println!("transfer {} committed", result.transfer.id);
//! # Ok(())
//! # }
//! ```

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;

// Convenient re-exports at crate root
pub use config::{AppConfig, ConfigError, IsolationLevel, PoolConfig, RetryConfig};
pub use core_types::{AccountId, Amount, EntryId, TransferId};
pub use db::Database;
pub use ledger::{
    CancelSignal, LedgerError, LedgerResult, LedgerStore, MemoryLedgerStore, PgLedgerStore,
    TransactionExecutor, TransferOrchestrator, TransferRequest, TransferResult,
};
