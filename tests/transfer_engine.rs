use std::sync::Arc;
use std::time::Duration;

use ledger_service::config::Config;
use ledger_service::db::account::{Account, AccountStatus, AccountType, Currency};
use ledger_service::db::memory::{MemoryScope, MemoryStore};
use ledger_service::db::store::{AccountStore, StoreError};
use ledger_service::db::transfer::TransferStatus;
use ledger_service::db::tx::TransactionType;
use ledger_service::error::LedgerError;
use ledger_service::transfer::{CreateTransfer, MemoryTransferEngine};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn config_with_timeout(timeout_ms: Option<&'static str>) -> Config {
    Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://localhost/unused".to_string()),
        "TRANSFER_TIMEOUT_MS" => timeout_ms.map(str::to_string),
        _ => None,
    })
    .unwrap()
}

fn setup() -> (Arc<MemoryStore>, Arc<MemoryTransferEngine>) {
    setup_with(config_with_timeout(None))
}

fn setup_with(config: Config) -> (Arc<MemoryStore>, Arc<MemoryTransferEngine>) {
    let store = Arc::new(MemoryStore::new());
    let engine = MemoryTransferEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        &config,
    );
    (store, Arc::new(engine))
}

fn open_account(store: &MemoryStore, owner: Uuid, currency: Currency, balance: Decimal) -> Account {
    let mut account = Account::new(owner, AccountType::Checking, currency);
    account.balance = balance;
    store.seed_account(account.clone());
    account
}

fn request(from: &Account, to: &Account, amount: &str, key: Option<&str>) -> CreateTransfer {
    CreateTransfer {
        from_account_id: from.id,
        to_account_id: to.id,
        amount: amount.to_string(),
        idempotency_key: key.map(str::to_string),
    }
}

fn balance(store: &MemoryStore, account: &Account) -> Decimal {
    store.account(account.id).unwrap().balance
}

#[tokio::test]
async fn transfer_moves_money_and_writes_two_entries() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100.00));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0.00));

    let transfer = engine
        .create(alice, request(&a, &b, "40.00", None))
        .await
        .unwrap();

    assert_eq!(transfer.status, TransferStatus::Completed);
    assert!(transfer.completed_at.is_some());
    assert_eq!(transfer.amount, dec!(40.00));
    assert_eq!(transfer.currency, Currency::Usd);
    assert_eq!(balance(&store, &a), dec!(60.00));
    assert_eq!(balance(&store, &b), dec!(40.00));

    let debits = store.entries_for(a.id);
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].transaction_type, TransactionType::Debit);
    assert_eq!(debits[0].amount, dec!(40.00));
    assert_eq!(debits[0].balance_after, dec!(60.00));
    assert_eq!(debits[0].reference_id, Some(transfer.id));
    assert_eq!(
        debits[0].description,
        format!("Transfer to account {}", b.account_number)
    );

    let credits = store.entries_for(b.id);
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].transaction_type, TransactionType::Credit);
    assert_eq!(credits[0].balance_after, dec!(40.00));
    assert_eq!(credits[0].reference_id, Some(transfer.id));
}

#[tokio::test]
async fn insufficient_balance_changes_nothing() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100.00));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0.00));

    let err = engine
        .create(alice, request(&a, &b, "150.00", None))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::InsufficientBalance));
    assert_eq!(balance(&store, &a), dec!(100.00));
    assert_eq!(balance(&store, &b), dec!(0.00));
    assert!(store.entries_for(a.id).is_empty());
    assert_eq!(store.transfer_count(), 0);
}

#[tokio::test]
async fn exact_balance_can_be_transferred() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(25.50));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));

    engine
        .create(alice, request(&a, &b, "25.50", None))
        .await
        .unwrap();

    assert_eq!(balance(&store, &a), Decimal::ZERO);
    assert_eq!(balance(&store, &b), dec!(25.50));
}

#[tokio::test]
async fn same_account_is_rejected() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));

    let err = engine
        .create(alice, request(&a, &a, "10", None))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::SameAccount));
    assert_eq!(store.transfer_count(), 0);
}

#[tokio::test]
async fn invalid_amounts_are_rejected() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));

    for amount in ["0", "-1", "ten"] {
        let err = engine
            .create(alice, request(&a, &b, amount, None))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount), "{amount}");
    }
    assert_eq!(balance(&store, &a), dec!(100));
}

#[tokio::test]
async fn sub_cent_amounts_are_rejected_before_any_write() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));

    for amount in ["0.001", "0.00005"] {
        let err = engine
            .create(alice, request(&a, &b, amount, None))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount), "{amount}");
    }

    assert_eq!(balance(&store, &a) + balance(&store, &b), dec!(100));
    assert_eq!(store.transfer_count(), 0);
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let ghost = Account::new(Uuid::new_v4(), AccountType::Savings, Currency::Usd);

    let err = engine
        .create(alice, request(&a, &ghost, "10", None))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound));

    let err = engine
        .create(alice, request(&ghost, &a, "10", None))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound));
    assert_eq!(balance(&store, &a), dec!(100));
}

#[tokio::test]
async fn only_the_source_owner_may_transfer() {
    let (store, engine) = setup();
    let a = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));
    let mallory = Uuid::new_v4();

    let err = engine
        .create(mallory, request(&a, &b, "10", None))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Forbidden));
    assert_eq!(balance(&store, &a), dec!(100));
}

#[tokio::test]
async fn currencies_must_match() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Eur, dec!(0));

    let err = engine
        .create(alice, request(&a, &b, "10", None))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::CurrencyMismatch));
}

#[tokio::test]
async fn inactive_destination_is_rejected() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let mut b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));
    b.status = AccountStatus::Frozen;
    store.seed_account(b.clone());

    let err = engine
        .create(alice, request(&a, &b, "10", None))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::AccountInactive));
    assert_eq!(balance(&store, &a), dec!(100));
}

#[tokio::test]
async fn inactive_source_cannot_be_debited() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let mut a = open_account(&store, alice, Currency::Usd, dec!(100));
    a.status = AccountStatus::Inactive;
    store.seed_account(a.clone());
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));

    let err = engine
        .create(alice, request(&a, &b, "10", None))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::InsufficientBalance));
}

#[tokio::test]
async fn repeated_key_returns_the_original_transfer() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));

    let first = engine
        .create(alice, request(&a, &b, "40", Some("k1")))
        .await
        .unwrap();
    let second = engine
        .create(alice, request(&a, &b, "40", Some("k1")))
        .await
        .unwrap();
    // a different payload under the same key still replays the first outcome
    let third = engine
        .create(alice, request(&a, &b, "5", Some("k1")))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.id, third.id);
    assert_eq!(third.amount, dec!(40));
    assert_eq!(store.transfer_count(), 1);
    assert_eq!(balance(&store, &a), dec!(60));
    assert_eq!(balance(&store, &b), dec!(40));
    assert_eq!(store.entries_for(a.id).len(), 1);
}

#[tokio::test]
async fn empty_key_is_treated_as_absent() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));

    let first = engine
        .create(alice, request(&a, &b, "10", Some("")))
        .await
        .unwrap();
    let second = engine
        .create(alice, request(&a, &b, "10", Some("")))
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.idempotency_key, None);
    assert_eq!(balance(&store, &a), dec!(80));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_with_one_key_execute_once() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let req = request(&a, &b, "40", Some("k1"));
        handles.push(tokio::spawn(async move { engine.create(alice, req).await }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1, "every caller sees the same transfer");
    assert_eq!(store.transfer_count(), 1);
    assert_eq!(balance(&store, &a), dec!(60));
    assert_eq!(balance(&store, &b), dec!(40));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_transfers_do_not_deadlock() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, bob, Currency::Usd, dec!(100));

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        let (requester, req) = if i % 2 == 0 {
            (alice, request(&a, &b, "1", None))
        } else {
            (bob, request(&b, &a, "2", None))
        };
        handles.push(tokio::spawn(async move { engine.create(requester, req).await }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // ten of each direction
    assert_eq!(balance(&store, &a), dec!(110));
    assert_eq!(balance(&store, &b), dec!(90));
    assert_eq!(store.transfer_count(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn money_is_conserved_under_contention() {
    let (store, engine) = setup();
    let owner = Uuid::new_v4();
    let accounts: Vec<Account> = (0..4)
        .map(|_| open_account(&store, owner, Currency::Usd, dec!(50)))
        .collect();

    let mut handles = Vec::new();
    for i in 0..60 {
        let engine = engine.clone();
        let from = &accounts[i % 4];
        // (3i + 1) mod 4 never equals i mod 4
        let to = &accounts[(i * 3 + 1) % 4];
        let amount = format!("{}.25", i % 7 + 3);
        let req = request(from, to, &amount, None);
        handles.push(tokio::spawn(async move { engine.create(owner, req).await }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => completed += 1,
            Err(LedgerError::InsufficientBalance) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    let total: Decimal = accounts.iter().map(|a| balance(&store, a)).sum();
    assert_eq!(total, dec!(200));
    for account in &accounts {
        assert!(balance(&store, account) >= Decimal::ZERO);
    }

    let entries: usize = accounts.iter().map(|a| store.entries_for(a.id).len()).sum();
    assert_eq!(entries, completed * 2);
    assert_eq!(store.transfer_count(), completed);
}

#[tokio::test]
async fn failure_mid_transfer_rolls_everything_back() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));
    store.fail_balance_updates_for(b.id);

    let err = engine
        .create(alice, request(&a, &b, "40", Some("k-fail")))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Internal(StoreError::Database(_))));
    assert_eq!(balance(&store, &a), dec!(100));
    assert_eq!(balance(&store, &b), dec!(0));
    assert!(store.entries_for(a.id).is_empty());
    assert!(store.entries_for(b.id).is_empty());
    assert_eq!(store.transfer_count(), 0);
}

fn assert_untouched(store: &MemoryStore, a: &Account, b: &Account) {
    assert_eq!(balance(store, a), dec!(100));
    assert_eq!(balance(store, b), dec!(0));
    assert!(store.entries_for(a.id).is_empty());
    assert!(store.entries_for(b.id).is_empty());
    assert_eq!(store.transfer_count(), 0);
}

#[tokio::test]
async fn failed_credit_entry_rolls_back_debit_entry_and_balances() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));
    // the debit on `a` is appended first, then the credit on `b` fails
    store.fail_ledger_appends_for(b.id);

    let err = engine
        .create(alice, request(&a, &b, "40", None))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Internal(StoreError::Database(_))));
    assert_untouched(&store, &a, &b);
}

#[tokio::test]
async fn failed_completion_rolls_back_the_whole_transfer() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));
    store.fail_status_updates();

    let err = engine
        .create(alice, request(&a, &b, "40", Some("k-complete")))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Internal(StoreError::Database(_))));
    assert_untouched(&store, &a, &b);
}

#[tokio::test]
async fn blocked_scope_times_out_and_rolls_back() {
    let (store, engine) = setup_with(config_with_timeout(Some("100")));
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));

    // another scope holds the destination row for the whole attempt
    let mut holder = MemoryScope::default();
    store.lock(&mut holder, b.id).await.unwrap();

    let err = engine
        .create(alice, request(&a, &b, "10", None))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Internal(StoreError::TimedOut)));
    assert_eq!(balance(&store, &a), dec!(100));
    assert_eq!(store.transfer_count(), 0);

    drop(holder);
    let transfer = engine
        .create(alice, request(&a, &b, "10", None))
        .await
        .unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);
}

#[tokio::test]
async fn get_is_visible_to_both_owners_only() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, bob, Currency::Usd, dec!(0));

    let transfer = engine
        .create(alice, request(&a, &b, "10", None))
        .await
        .unwrap();

    assert_eq!(engine.get(alice, transfer.id).await.unwrap().id, transfer.id);
    assert_eq!(engine.get(bob, transfer.id).await.unwrap().id, transfer.id);

    let err = engine.get(Uuid::new_v4(), transfer.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden));

    let err = engine.get(alice, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, LedgerError::TransferNotFound));
}

#[tokio::test]
async fn list_is_paged_newest_first() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, bob, Currency::Usd, dec!(0));

    let mut created = Vec::new();
    for amount in ["1", "2", "3"] {
        let transfer = engine
            .create(alice, request(&a, &b, amount, None))
            .await
            .unwrap();
        created.push(transfer.id);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let first = engine.list(alice, 1, 2).await.unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(first.total_pages, 2);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].id, created[2]);
    assert_eq!(first.items[1].id, created[1]);

    let second = engine.list(alice, 2, 2).await.unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].id, created[0]);

    // the receiving side sees them as well, strangers see nothing
    assert_eq!(engine.list(bob, 1, 10).await.unwrap().total, 3);
    let stranger = engine.list(Uuid::new_v4(), 1, 10).await.unwrap();
    assert_eq!(stranger.total, 0);
    assert!(stranger.items.is_empty());
}

#[tokio::test]
async fn list_clamps_paging_arguments() {
    let (store, engine) = setup();
    let alice = Uuid::new_v4();
    let a = open_account(&store, alice, Currency::Usd, dec!(100));
    let b = open_account(&store, Uuid::new_v4(), Currency::Usd, dec!(0));
    engine
        .create(alice, request(&a, &b, "1", None))
        .await
        .unwrap();

    let page = engine.list(alice, 0, 0).await.unwrap();
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 1);
    assert_eq!(page.items.len(), 1);

    let page = engine.list(alice, -3, 1_000).await.unwrap();
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 100);
}
