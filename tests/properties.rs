//! Property-based tests for ledger invariants
//!
//! Random sequences of credits and debits, with idempotency keys drawn from a
//! small pool so replays happen often, checked against a simple model.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use wallet_ledger::config::EngineConfig;
use wallet_ledger::{
    Amount, AuditValidator, CreditRequest, DebitRequest, IdempotencyKey, LedgerEngine,
    LedgerError, MemoryStore, Request,
};

#[derive(Debug, Clone)]
enum Op {
    Credit { amount: i64, key: u8 },
    Debit { amount: i64, key: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..500, 0u8..24).prop_map(|(amount, key)| Op::Credit { amount, key }),
        (1i64..500, 0u8..24).prop_map(|(amount, key)| Op::Debit { amount, key }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

/// Expected state after replaying `ops` with keyed deduplication.
struct Model {
    balance: i64,
    applied: u64,
    used: HashSet<u8>,
}

impl Model {
    fn new() -> Self {
        Self {
            balance: 0,
            applied: 0,
            used: HashSet::new(),
        }
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Credit { amount, key } => {
                if self.used.insert(key) {
                    self.balance += amount;
                    self.applied += 1;
                }
            }
            Op::Debit { amount, key } => {
                if !self.used.contains(&key) && self.balance >= amount {
                    self.used.insert(key);
                    self.balance -= amount;
                    self.applied += 1;
                }
            }
        }
    }
}

proptest! {
    /// Property: the wallet ends where the model says, never goes negative,
    /// and always passes its audit
    #[test]
    fn ledger_matches_model(ops in prop::collection::vec(op(), 1..60)) {
        let rt = runtime();
        let store = Arc::new(MemoryStore::new());
        store.register_asset("GOLD", "Gold Coins", 0);
        let engine = LedgerEngine::new(store.clone(), &EngineConfig::default());
        let audit = AuditValidator::new(store.clone(), &EngineConfig::default());
        rt.block_on(engine.apply(Request::open(1, "GOLD", Amount::ZERO).unwrap())).unwrap();

        let mut model = Model::new();
        for op in &ops {
            let result = rt.block_on(async {
                match *op {
                    Op::Credit { amount, key } => {
                        let key = IdempotencyKey::new(format!("k{key}")).unwrap();
                        let request = CreditRequest::bonus(1, "GOLD", Amount::from_units(amount), key, None).unwrap();
                        engine.credit(request).await
                    }
                    Op::Debit { amount, key } => {
                        let key = IdempotencyKey::new(format!("k{key}")).unwrap();
                        let request = DebitRequest::purchase(1, "GOLD", Amount::from_units(amount), key, "item").unwrap();
                        engine.debit(request).await
                    }
                }
            });
            model.apply(op);

            match result {
                Ok(outcome) => prop_assert!(!outcome.new_balance.is_negative()),
                Err(LedgerError::InsufficientBalance { .. }) => {}
                Err(e) => prop_assert!(false, "unexpected error: {}", e),
            }
            let balance = rt.block_on(engine.get_balance(1, "GOLD")).unwrap();
            prop_assert_eq!(balance.balance, Amount::from_units(model.balance));
        }

        let balance = rt.block_on(engine.get_balance(1, "GOLD")).unwrap();
        prop_assert_eq!(balance.version, model.applied);
        prop_assert_eq!(store.transaction_count() as u64, model.applied);

        let report = rt.block_on(audit.validate(balance.wallet_id)).unwrap();
        prop_assert!(report.is_consistent());
        prop_assert_eq!(report.calculated_balance, balance.balance);
    }

    /// Property: replaying any request returns the recorded outcome and
    /// leaves the wallet unchanged
    #[test]
    fn replay_is_a_no_op(amounts in prop::collection::vec(1i64..1_000, 1..20)) {
        let rt = runtime();
        let store = Arc::new(MemoryStore::new());
        store.register_asset("GOLD", "Gold Coins", 0);
        let engine = LedgerEngine::new(store.clone(), &EngineConfig::default());
        rt.block_on(engine.apply(Request::open(1, "GOLD", Amount::ZERO).unwrap())).unwrap();

        for (i, amount) in amounts.iter().enumerate() {
            let request = CreditRequest::bonus(
                1,
                "GOLD",
                Amount::from_units(*amount),
                IdempotencyKey::new(format!("k{i}")).unwrap(),
                None,
            ).unwrap();
            let first = rt.block_on(engine.credit(request.clone())).unwrap();
            let before = rt.block_on(engine.get_balance(1, "GOLD")).unwrap();
            let replay = rt.block_on(engine.credit(request)).unwrap();
            let after = rt.block_on(engine.get_balance(1, "GOLD")).unwrap();

            prop_assert!(replay.duplicate);
            prop_assert_eq!(replay.transaction_id, first.transaction_id);
            prop_assert_eq!(replay.new_balance, first.new_balance);
            prop_assert_eq!(replay.previous_balance, first.previous_balance);
            prop_assert_eq!(after, before);
        }
        prop_assert_eq!(store.transaction_count(), amounts.len());
    }

    /// Property: formatting an amount at its precision parses back to it
    #[test]
    fn scaled_amount_parses_back(units in -1_000_000_000i64..1_000_000_000i64, decimals in 0u8..9) {
        let text = Amount::from_units(units).scaled(decimals).to_string();
        prop_assert_eq!(Amount::parse(&text, decimals).unwrap(), Amount::from_units(units));
    }
}
