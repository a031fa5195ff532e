use chrono::Utc;
use parking_lot::RwLock;

use super::{
    AuditView, LedgerTotals, Mutation, Store, StoreError, StoreResult, TransactionLog, TransactionPage,
    WalletStore,
};
use crate::model::{AssetId, AssetType, OwnerId, Receipt, Wallet, WalletId, WalletSnapshot};
use crate::request::IdempotencyKey;

#[derive(Debug, Default)]
struct Tables {
    wallets: WalletStore,
    log: TransactionLog,
}

/// In-process [`Store`] keeping every table behind one lock.
///
/// A commit validates the key and the wallet version, then writes all rows
/// while holding the write guard, so readers never observe a partial commit.
/// No call awaits while holding the lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asset type to the catalog.
    pub fn register_asset(&self, code: &str, name: &str, decimals: u8) -> AssetType {
        self.tables.write().wallets.register_asset(code, name, decimals)
    }

    /// Number of transactions recorded across all wallets.
    pub fn transaction_count(&self) -> usize {
        self.tables.read().log.len()
    }

    #[cfg(test)]
    pub(crate) fn overwrite_balance(&self, wallet: WalletId, balance: crate::Amount) {
        self.tables.write().wallets.overwrite_balance(wallet, balance);
    }
}

impl Store for MemoryStore {
    async fn ensure_asset(&self, code: &str, name: &str, decimals: u8) -> StoreResult<AssetType> {
        Ok(self.register_asset(code, name, decimals))
    }

    async fn asset(&self, code: &str) -> StoreResult<Option<AssetType>> {
        Ok(self.tables.read().wallets.asset(code).cloned())
    }

    async fn asset_by_id(&self, id: AssetId) -> StoreResult<Option<AssetType>> {
        Ok(self.tables.read().wallets.asset_by_id(id).cloned())
    }

    async fn provision_wallet(&self, owner: OwnerId, asset: AssetId) -> StoreResult<Wallet> {
        self.tables.write().wallets.provision(owner, asset, Utc::now())
    }

    async fn wallet(&self, owner: OwnerId, asset: AssetId) -> StoreResult<Option<Wallet>> {
        Ok(self.tables.read().wallets.find(owner, asset).cloned())
    }

    async fn wallet_by_id(&self, id: WalletId) -> StoreResult<Option<Wallet>> {
        Ok(self.tables.read().wallets.get(id).cloned())
    }

    async fn wallets_for_owner(&self, owner: OwnerId) -> StoreResult<Vec<Wallet>> {
        Ok(self.tables.read().wallets.for_owner(owner))
    }

    async fn wallets(&self) -> StoreResult<Vec<Wallet>> {
        Ok(self.tables.read().wallets.all())
    }

    async fn receipt(&self, key: &IdempotencyKey) -> StoreResult<Option<Receipt>> {
        Ok(self.tables.read().log.receipt(key))
    }

    async fn commit(&self, mutation: Mutation) -> StoreResult<Receipt> {
        let now = Utc::now();
        let mut guard = self.tables.write();
        let tables = &mut *guard;

        // Nothing is written until both checks pass
        if let Some(existing) = tables.log.receipt(&mutation.entry.idempotency_key) {
            return Err(StoreError::DuplicateKey(Box::new(existing)));
        }
        let wallet = tables.wallets.compare_and_set(
            mutation.wallet_id,
            mutation.expected_version,
            mutation.new_balance,
            now,
        )?;

        tables.log.insert(&wallet, mutation.entry, now)
    }

    async fn transactions(
        &self,
        wallet: WalletId,
        limit: usize,
        offset: usize,
    ) -> StoreResult<TransactionPage> {
        Ok(self.tables.read().log.page(wallet, limit, offset))
    }

    async fn totals(&self, wallet: WalletId) -> StoreResult<LedgerTotals> {
        self.tables.read().log.totals(wallet)
    }

    async fn latest_snapshot(&self, wallet: WalletId) -> StoreResult<Option<WalletSnapshot>> {
        Ok(self.tables.read().log.latest_snapshot(wallet).cloned())
    }

    async fn audit_view(&self, wallet: WalletId) -> StoreResult<Option<AuditView>> {
        let tables = self.tables.read();
        let Some(stored) = tables.wallets.get(wallet) else {
            return Ok(None);
        };
        Ok(Some(AuditView {
            wallet: stored.clone(),
            totals: tables.log.totals(wallet)?,
            latest_snapshot: tables.log.latest_snapshot(wallet).cloned(),
        }))
    }
}
