//! The same ledger scenarios run against every storage backend.

use std::sync::Arc;
use tempfile::TempDir;

use wallet_ledger::config::EngineConfig;
use wallet_ledger::{
    Amount, Config, CreditRequest, DebitRequest, IdempotencyKey, Ledger, LedgerError,
    MemoryStore, OwnerId, Request, SqliteStore, Store,
};

// test utils

fn key(key: &str) -> IdempotencyKey {
    IdempotencyKey::new(key).unwrap()
}

fn top_up(owner: OwnerId, amount: i64, k: &str) -> CreditRequest {
    CreditRequest::top_up(owner, "GOLD", Amount::from_units(amount), key(k), "order-1").unwrap()
}

fn bonus(owner: OwnerId, amount: i64, k: &str) -> CreditRequest {
    CreditRequest::bonus(owner, "GOLD", Amount::from_units(amount), key(k), None).unwrap()
}

fn purchase(owner: OwnerId, amount: i64, k: &str) -> DebitRequest {
    DebitRequest::purchase(owner, "GOLD", Amount::from_units(amount), key(k), "sword").unwrap()
}

async fn ledger<S: Store>(store: Arc<S>) -> Ledger<S> {
    store.ensure_asset("GOLD", "Gold Coins", 0).await.unwrap();
    store.ensure_asset("DIAMONDS", "Diamonds", 0).await.unwrap();
    let config = Config {
        engine: EngineConfig {
            max_retries: 10_000,
            storage_timeout_ms: 5_000,
        },
        ..Config::default()
    };
    Ledger::new(store, &config)
}

async fn memory() -> (Option<TempDir>, Arc<MemoryStore>) {
    (None, Arc::new(MemoryStore::new()))
}

async fn sqlite() -> (Option<TempDir>, Arc<SqliteStore>) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("ledger.db"), 4)
        .await
        .unwrap();
    (Some(dir), Arc::new(store))
}

// scenarios

async fn credit_then_replay<S: Store>(store: Arc<S>) {
    let ledger = ledger(store).await;
    ledger.engine.open_wallet(1, "GOLD").await.unwrap();

    let first = ledger.engine.credit(top_up(1, 1000, "k1")).await.unwrap();
    assert!(!first.duplicate);
    assert_eq!(first.previous_balance, Amount::ZERO);
    assert_eq!(first.new_balance, Amount::from_units(1000));
    assert_eq!(first.version, 1);

    let replay = ledger.engine.credit(top_up(1, 1000, "k1")).await.unwrap();
    assert!(replay.duplicate);
    assert_eq!(replay.transaction_id, first.transaction_id);
    assert_eq!(replay.new_balance, first.new_balance);
    assert_eq!(replay.previous_balance, first.previous_balance);

    let balance = ledger.engine.get_balance(1, "GOLD").await.unwrap();
    assert_eq!(balance.balance, Amount::from_units(1000));
    assert_eq!(balance.version, 1);
}

async fn insufficient_debit_writes_nothing<S: Store>(store: Arc<S>) {
    let ledger = ledger(store).await;
    ledger
        .engine
        .apply(Request::open(1, "GOLD", Amount::from_units(50)).unwrap())
        .await
        .unwrap();

    let err = ledger.engine.debit(purchase(1, 80, "p1")).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

    let balance = ledger.engine.get_balance(1, "GOLD").await.unwrap();
    assert_eq!(balance.balance, Amount::from_units(50));
    assert_eq!(balance.version, 1);

    // The rejected key was never recorded
    ledger.engine.credit(bonus(1, 30, "p1")).await.unwrap();
    let spent = ledger.engine.debit(purchase(1, 80, "p2")).await.unwrap();
    assert_eq!(spent.new_balance, Amount::ZERO);
    assert_eq!(spent.version, 3);
}

async fn keys_are_global<S: Store>(store: Arc<S>) {
    let ledger = ledger(store).await;
    ledger.engine.open_wallet(1, "GOLD").await.unwrap();
    ledger.engine.open_wallet(2, "GOLD").await.unwrap();

    let first = ledger.engine.credit(bonus(1, 10, "shared")).await.unwrap();
    let other = ledger.engine.credit(bonus(2, 10, "shared")).await.unwrap();
    assert!(other.duplicate);
    assert_eq!(other.wallet_id, first.wallet_id);

    let untouched = ledger.engine.get_balance(2, "GOLD").await.unwrap();
    assert_eq!(untouched.balance, Amount::ZERO);
}

async fn opening_balance_is_audited<S: Store>(store: Arc<S>) {
    let ledger = ledger(store).await;
    for _ in 0..2 {
        ledger
            .engine
            .apply(Request::open(4, "DIAMONDS", Amount::from_units(500)).unwrap())
            .await
            .unwrap();
    }

    let balances = ledger.engine.list_balances(4).await.unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].balance, Amount::from_units(500));
    assert_eq!(balances[0].version, 1);

    let report = ledger.audit.validate(balances[0].wallet_id).await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.calculated_balance, Amount::from_units(500));
}

async fn history_pages<S: Store>(store: Arc<S>) {
    let ledger = ledger(store).await;
    ledger.engine.open_wallet(1, "GOLD").await.unwrap();
    for i in 1..=5 {
        ledger
            .engine
            .credit(bonus(1, i, &format!("b{i}")))
            .await
            .unwrap();
    }
    ledger.engine.debit(purchase(1, 3, "p1")).await.unwrap();

    let page = ledger.history.history(1, "gold", Some(2), 0).await.unwrap();
    assert_eq!(page.total, 6);
    assert!(page.has_more);
    assert_eq!(page.transactions[0].amount, Amount::from_units(-3));
    assert_eq!(page.transactions[1].amount, Amount::from_units(5));

    let tail = ledger.history.history(1, "GOLD", Some(10), 4).await.unwrap();
    assert_eq!(tail.transactions.len(), 2);
    assert!(!tail.has_more);

    let empty = ledger.history.history(1, "GOLD", None, 50).await.unwrap();
    assert!(empty.transactions.is_empty());
    assert_eq!(empty.total, 6);
}

async fn concurrent_credits_sum_up<S: Store>(store: Arc<S>) {
    let ledger = ledger(store).await;
    ledger.engine.open_wallet(1, "GOLD").await.unwrap();
    let engine = Arc::new(ledger.engine);

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.credit(bonus(1, 2, &format!("c{i}"))).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let balance = engine.get_balance(1, "GOLD").await.unwrap();
    assert_eq!(balance.balance, Amount::from_units(80));
    assert_eq!(balance.version, 40);

    let reports = ledger.audit.validate_all().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_consistent());
}

macro_rules! backend_tests {
    ($backend:ident) => {
        mod $backend {
            #[tokio::test]
            async fn credit_then_replay() {
                let (_dir, store) = super::$backend().await;
                super::credit_then_replay(store).await;
            }

            #[tokio::test]
            async fn insufficient_debit_writes_nothing() {
                let (_dir, store) = super::$backend().await;
                super::insufficient_debit_writes_nothing(store).await;
            }

            #[tokio::test]
            async fn keys_are_global() {
                let (_dir, store) = super::$backend().await;
                super::keys_are_global(store).await;
            }

            #[tokio::test]
            async fn opening_balance_is_audited() {
                let (_dir, store) = super::$backend().await;
                super::opening_balance_is_audited(store).await;
            }

            #[tokio::test]
            async fn history_pages() {
                let (_dir, store) = super::$backend().await;
                super::history_pages(store).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_credits_sum_up() {
                let (_dir, store) = super::$backend().await;
                super::concurrent_credits_sum_up(store).await;
            }
        }
    };
}

backend_tests!(memory);
backend_tests!(sqlite);
