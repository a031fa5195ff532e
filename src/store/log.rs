use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::{LedgerTotals, NewTransaction, StoreError, StoreResult, TransactionPage};
use crate::model::{
    Receipt, SnapshotId, Transaction, TransactionStatus, TxId, Wallet, WalletId, WalletSnapshot,
};
use crate::request::IdempotencyKey;

/// Append-only transaction rows and the wallet snapshot trail.
///
/// Idempotency keys are unique across the whole log, whatever the wallet or
/// transaction kind.
#[derive(Debug, Default)]
pub struct TransactionLog {
    transactions: Vec<Transaction>,
    by_key: HashMap<IdempotencyKey, TxId>,
    /// Transaction ids per wallet, in commit order
    by_wallet: HashMap<WalletId, Vec<TxId>>,
    snapshots: Vec<WalletSnapshot>,
    snapshot_by_tx: HashMap<TxId, SnapshotId>,
    latest_snapshot: HashMap<WalletId, SnapshotId>,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: TxId) -> Option<&Transaction> {
        (id as usize)
            .checked_sub(1)
            .and_then(|idx| self.transactions.get(idx))
    }

    fn snapshot(&self, id: SnapshotId) -> Option<&WalletSnapshot> {
        (id as usize)
            .checked_sub(1)
            .and_then(|idx| self.snapshots.get(idx))
    }

    pub fn receipt(&self, key: &IdempotencyKey) -> Option<Receipt> {
        let tx_id = self.by_key.get(key)?;
        let transaction = self.get(*tx_id)?;
        let snapshot = self
            .snapshot_by_tx
            .get(tx_id)
            .and_then(|id| self.snapshot(*id))?;
        Some(Receipt {
            transaction: transaction.clone(),
            snapshot: snapshot.clone(),
        })
    }

    /// Append a transaction for `wallet` (already updated) and its snapshot.
    ///
    /// Fails with [`StoreError::DuplicateKey`] without writing anything if the
    /// key is taken.
    pub fn insert(
        &mut self,
        wallet: &Wallet,
        entry: NewTransaction,
        now: DateTime<Utc>,
    ) -> StoreResult<Receipt> {
        if let Some(existing) = self.receipt(&entry.idempotency_key) {
            return Err(StoreError::DuplicateKey(Box::new(existing)));
        }

        let transaction = Transaction {
            id: self.transactions.len() as TxId + 1,
            idempotency_key: entry.idempotency_key,
            wallet_id: wallet.id,
            amount: entry.amount,
            kind: entry.kind,
            reason: entry.reason,
            metadata: entry.metadata,
            status: TransactionStatus::Completed,
            created_at: now,
        };
        let snapshot = WalletSnapshot {
            id: self.snapshots.len() as SnapshotId + 1,
            wallet_id: wallet.id,
            balance: wallet.balance,
            version: wallet.version,
            transaction_id: transaction.id,
            recorded_at: now,
        };

        self.by_key
            .insert(transaction.idempotency_key.clone(), transaction.id);
        self.by_wallet
            .entry(wallet.id)
            .or_default()
            .push(transaction.id);
        self.snapshot_by_tx.insert(transaction.id, snapshot.id);
        self.latest_snapshot.insert(wallet.id, snapshot.id);
        self.transactions.push(transaction.clone());
        self.snapshots.push(snapshot.clone());

        Ok(Receipt {
            transaction,
            snapshot,
        })
    }

    /// Most recent first.
    pub fn page(&self, wallet: WalletId, limit: usize, offset: usize) -> TransactionPage {
        let ids = self.by_wallet.get(&wallet).map(Vec::as_slice).unwrap_or(&[]);
        let transactions = ids
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| self.get(*id))
            .cloned()
            .collect();
        TransactionPage {
            transactions,
            total: ids.len(),
        }
    }

    /// Fails with [`StoreError::SumOverflow`] rather than clamping the sum.
    pub fn totals(&self, wallet: WalletId) -> StoreResult<LedgerTotals> {
        let ids = self.by_wallet.get(&wallet).map(Vec::as_slice).unwrap_or(&[]);
        ids.iter()
            .filter_map(|id| self.get(*id))
            .filter(|tx| tx.status == TransactionStatus::Completed)
            .try_fold(LedgerTotals::default(), |totals, tx| {
                Ok(LedgerTotals {
                    sum: totals
                        .sum
                        .checked_add(tx.amount)
                        .ok_or(StoreError::SumOverflow(wallet))?,
                    count: totals.count + 1,
                })
            })
    }

    pub fn latest_snapshot(&self, wallet: WalletId) -> Option<&WalletSnapshot> {
        self.latest_snapshot
            .get(&wallet)
            .and_then(|id| self.snapshot(*id))
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
