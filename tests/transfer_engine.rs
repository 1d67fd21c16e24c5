use std::sync::Arc;

use ledger_engine::ledger::{
    CancelSignal, CreateAccountParams, Currency, Fault, LedgerError, LedgerQueries, LedgerStore,
    MemoryLedgerStore, TransferOrchestrator, TransferRequest,
};
use ledger_engine::{AppConfig, RetryConfig};

/// Helper to open two funded accounts
async fn open_accounts(store: &MemoryLedgerStore, a: i64, b: i64) -> (i64, i64) {
    let mut conn = store.acquire().await.unwrap();
    let first = conn
        .create_account(CreateAccountParams::new("alice", Currency::USD, a).unwrap())
        .await
        .unwrap();
    let second = conn
        .create_account(CreateAccountParams::new("bob", Currency::EUR, b).unwrap())
        .await
        .unwrap();
    (first.id, second.id)
}

#[tokio::test]
async fn transfer_round_trip_through_public_api() {
    let config = AppConfig::from_yaml_str(
        "log_level: info\nlog_dir: logs\nlog_file: ledger.log\nuse_json: false\nrotation: never\n",
    )
    .unwrap();
    let store = MemoryLedgerStore::new();
    let orchestrator = TransferOrchestrator::new(Arc::new(store.clone()), config.retry);
    let (alice, bob) = open_accounts(&store, 500, 0).await;

    let there = orchestrator
        .transfer(TransferRequest::new(alice, bob, 120))
        .await
        .unwrap();
    assert_eq!(there.from_account.balance, 380);
    assert_eq!(there.to_account.balance, 120);

    let back = orchestrator
        .transfer(TransferRequest::new(bob, alice, 20))
        .await
        .unwrap();
    assert_eq!(back.from_account.balance, 100);
    assert_eq!(back.to_account.balance, 400);

    assert_eq!(store.transfer_count(), 2);
    let alice_entries: i64 = store.entries_for(alice).iter().map(|e| e.amount).sum();
    assert_eq!(alice_entries, -100);

    let json = serde_json::to_value(&there).unwrap();
    assert_eq!(json["transfer"]["amount"], 120);
    assert_eq!(json["from_entry"]["amount"], -120);
    assert_eq!(json["to_account"]["currency"], "EUR");
}

#[tokio::test]
async fn errors_carry_codes_for_api_layer() {
    let store = MemoryLedgerStore::new();
    let orchestrator =
        TransferOrchestrator::new(Arc::new(store.clone()), RetryConfig::immediate(2));
    let (alice, bob) = open_accounts(&store, 100, 100).await;

    let invalid = orchestrator
        .transfer(TransferRequest::new(alice, alice, 1))
        .await
        .unwrap_err();
    assert_eq!((invalid.code(), invalid.http_status()), ("INVALID_ARGUMENT", 400));

    let missing = orchestrator
        .transfer(TransferRequest::new(alice, 12345, 1))
        .await
        .unwrap_err();
    assert_eq!((missing.code(), missing.http_status()), ("NOT_FOUND", 404));

    store.inject(Fault::BalanceConflict, 2);
    let conflict = orchestrator
        .transfer(TransferRequest::new(alice, bob, 1))
        .await
        .unwrap_err();
    assert_eq!(conflict.code(), "CONFLICT");
    assert!(conflict.http_status() >= 500);

    let cancel = CancelSignal::new();
    cancel.cancel();
    let cancelled = orchestrator
        .transfer_with_cancel(TransferRequest::new(alice, bob, 1), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(cancelled, LedgerError::Cancelled));

    assert_eq!(store.transfer_count(), 0);
}
