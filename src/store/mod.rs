//! Storage seam for the ledger.
//!
//! A [`Store`] exposes reads plus exactly one write path for balances:
//! [`Store::commit`], which inserts a transaction, compare-and-sets the wallet
//! version and appends a snapshot as a single all-or-nothing unit. Any backend
//! plugged in here gets the same optimistic concurrency protocol from the
//! engine.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::Amount;
use crate::model::{
    AssetId, AssetType, Metadata, OwnerId, Receipt, Transaction, TransactionKind, Wallet,
    WalletId, WalletSnapshot,
};
use crate::request::IdempotencyKey;

mod log;
mod memory;
mod sqlite;
mod wallets;

pub use log::TransactionLog;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use wallets::WalletStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures reported by a [`Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The idempotency key is already recorded; carries the existing receipt.
    #[error("idempotency key '{}' already recorded", .0.transaction.idempotency_key)]
    DuplicateKey(Box<Receipt>),

    #[error("wallet {wallet} version conflict: expected {expected}, found {found}")]
    VersionConflict {
        wallet: WalletId,
        expected: u64,
        found: u64,
    },

    #[error("wallet {0} does not exist")]
    UnknownWallet(WalletId),

    #[error("asset {0} does not exist")]
    UnknownAsset(AssetId),

    #[error("wallet {wallet} balance would become negative ({balance})")]
    NegativeBalance { wallet: WalletId, balance: Amount },

    #[error("`{operation}` timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The recorded amounts of a wallet no longer fit in an [`Amount`].
    #[error("transaction sum of wallet {0} overflows")]
    SumOverflow(WalletId),

    #[error("{0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A transaction row before the store assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub idempotency_key: IdempotencyKey,
    pub amount: Amount,
    pub kind: TransactionKind,
    pub reason: String,
    pub metadata: Metadata,
}

/// A conditional wallet update and the transaction that justifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub wallet_id: WalletId,
    /// The commit only applies if the wallet is still at this version.
    pub expected_version: u64,
    pub new_balance: Amount,
    pub entry: NewTransaction,
}

/// One page of a wallet's transactions, most recent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub total: usize,
}

/// Aggregates over a wallet's completed transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerTotals {
    pub sum: Amount,
    pub count: u64,
}

/// A wallet, its totals and its latest snapshot, all read at the same point
/// in the commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditView {
    pub wallet: Wallet,
    pub totals: LedgerTotals,
    pub latest_snapshot: Option<WalletSnapshot>,
}

/// Storage backend for wallets, transactions and snapshots.
///
/// `commit` must be atomic even if its future is dropped before completion:
/// either every row of the mutation becomes visible or none does.
pub trait Store: Send + Sync + 'static {
    /// Register an asset type, or return the existing one with that code.
    fn ensure_asset(
        &self,
        code: &str,
        name: &str,
        decimals: u8,
    ) -> impl Future<Output = StoreResult<AssetType>> + Send;

    fn asset(&self, code: &str) -> impl Future<Output = StoreResult<Option<AssetType>>> + Send;

    fn asset_by_id(&self, id: AssetId)
    -> impl Future<Output = StoreResult<Option<AssetType>>> + Send;

    /// Create the (owner, asset) wallet at balance 0, or return the existing one.
    fn provision_wallet(
        &self,
        owner: OwnerId,
        asset: AssetId,
    ) -> impl Future<Output = StoreResult<Wallet>> + Send;

    fn wallet(
        &self,
        owner: OwnerId,
        asset: AssetId,
    ) -> impl Future<Output = StoreResult<Option<Wallet>>> + Send;

    fn wallet_by_id(&self, id: WalletId)
    -> impl Future<Output = StoreResult<Option<Wallet>>> + Send;

    fn wallets_for_owner(&self, owner: OwnerId)
    -> impl Future<Output = StoreResult<Vec<Wallet>>> + Send;

    fn wallets(&self) -> impl Future<Output = StoreResult<Vec<Wallet>>> + Send;

    /// Look up a recorded mutation by idempotency key.
    fn receipt(
        &self,
        key: &IdempotencyKey,
    ) -> impl Future<Output = StoreResult<Option<Receipt>>> + Send;

    /// Apply a mutation atomically.
    ///
    /// Fails with [`StoreError::DuplicateKey`] when the key already exists and
    /// with [`StoreError::VersionConflict`] when the wallet moved on; in both
    /// cases nothing is written.
    fn commit(&self, mutation: Mutation) -> impl Future<Output = StoreResult<Receipt>> + Send;

    fn transactions(
        &self,
        wallet: WalletId,
        limit: usize,
        offset: usize,
    ) -> impl Future<Output = StoreResult<TransactionPage>> + Send;

    fn totals(&self, wallet: WalletId) -> impl Future<Output = StoreResult<LedgerTotals>> + Send;

    fn latest_snapshot(
        &self,
        wallet: WalletId,
    ) -> impl Future<Output = StoreResult<Option<WalletSnapshot>>> + Send;

    /// Wallet, totals and latest snapshot from one consistent read; no
    /// commit can land between the three.
    fn audit_view(
        &self,
        wallet: WalletId,
    ) -> impl Future<Output = StoreResult<Option<AuditView>>> + Send;
}

/// Run a store call under a deadline.
pub async fn bounded<T>(
    operation: &'static str,
    after: Duration,
    call: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { operation, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_results_through() {
        let result = bounded("noop", Duration::from_millis(50), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn bounded_times_out_slow_calls() {
        let result: StoreResult<()> = bounded("slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(StoreError::Timeout {
                operation: "slow",
                ..
            })
        ));
    }
}
