use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::{StoreError, StoreResult};
use crate::Amount;
use crate::model::{AssetId, AssetType, OwnerId, Wallet, WalletId};

/// Wallet rows keyed by id and by (owner, asset), plus the asset catalog.
///
/// Balances only change through [`WalletStore::compare_and_set`].
#[derive(Debug, Default)]
pub struct WalletStore {
    assets: Vec<AssetType>,
    asset_codes: HashMap<String, AssetId>,
    wallets: HashMap<WalletId, Wallet>,
    by_owner_asset: HashMap<(OwnerId, AssetId), WalletId>,
    next_wallet_id: WalletId,
}

impl WalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset type. Registering a known code returns the existing
    /// entry untouched, since assets are immutable once referenced.
    pub fn register_asset(&mut self, code: &str, name: &str, decimals: u8) -> AssetType {
        let code = code.trim().to_ascii_uppercase();
        if let Some(asset) = self.asset(&code) {
            return asset.clone();
        }
        let asset = AssetType {
            id: self.assets.len() as AssetId + 1,
            code: code.clone(),
            name: name.to_string(),
            decimals,
        };
        self.asset_codes.insert(code, asset.id);
        self.assets.push(asset.clone());
        asset
    }

    pub fn asset(&self, code: &str) -> Option<&AssetType> {
        self.asset_codes
            .get(code)
            .and_then(|id| self.asset_by_id(*id))
    }

    pub fn asset_by_id(&self, id: AssetId) -> Option<&AssetType> {
        (id as usize)
            .checked_sub(1)
            .and_then(|idx| self.assets.get(idx))
    }

    pub fn provision(
        &mut self,
        owner: OwnerId,
        asset: AssetId,
        now: DateTime<Utc>,
    ) -> StoreResult<Wallet> {
        if let Some(id) = self.by_owner_asset.get(&(owner, asset)) {
            return self.get(*id).cloned().ok_or(StoreError::UnknownWallet(*id));
        }
        if self.asset_by_id(asset).is_none() {
            return Err(StoreError::UnknownAsset(asset));
        }

        self.next_wallet_id += 1;
        let wallet = Wallet {
            id: self.next_wallet_id,
            owner,
            asset,
            balance: Amount::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.by_owner_asset.insert((owner, asset), wallet.id);
        self.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    pub fn get(&self, id: WalletId) -> Option<&Wallet> {
        self.wallets.get(&id)
    }

    pub fn find(&self, owner: OwnerId, asset: AssetId) -> Option<&Wallet> {
        self.by_owner_asset
            .get(&(owner, asset))
            .and_then(|id| self.get(*id))
    }

    pub fn for_owner(&self, owner: OwnerId) -> Vec<Wallet> {
        let mut wallets: Vec<_> = self
            .wallets
            .values()
            .filter(|w| w.owner == owner)
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.id);
        wallets
    }

    pub fn all(&self) -> Vec<Wallet> {
        let mut wallets: Vec<_> = self.wallets.values().cloned().collect();
        wallets.sort_by_key(|w| w.id);
        wallets
    }

    /// Set `balance = new_balance, version = expected + 1` iff the wallet is
    /// still at `expected`. A negative target balance is refused.
    pub fn compare_and_set(
        &mut self,
        id: WalletId,
        expected: u64,
        new_balance: Amount,
        now: DateTime<Utc>,
    ) -> StoreResult<Wallet> {
        let wallet = self
            .wallets
            .get_mut(&id)
            .ok_or(StoreError::UnknownWallet(id))?;

        if wallet.version != expected {
            return Err(StoreError::VersionConflict {
                wallet: id,
                expected,
                found: wallet.version,
            });
        }
        if new_balance.is_negative() {
            return Err(StoreError::NegativeBalance {
                wallet: id,
                balance: new_balance,
            });
        }

        wallet.balance = new_balance;
        wallet.version += 1;
        wallet.updated_at = now;
        Ok(wallet.clone())
    }

    #[cfg(test)]
    pub(crate) fn overwrite_balance(&mut self, id: WalletId, balance: Amount) {
        if let Some(wallet) = self.wallets.get_mut(&id) {
            wallet.balance = balance;
        }
    }
}
