//! Ledger engine.
//!
//! The engine is the only writer of wallet balances. Every credit and debit
//! runs the same protocol: dedupe on the idempotency key, load the wallet,
//! compute the new balance, then commit transaction, balance and snapshot in
//! one conditional store call. A commit that finds the wallet at another
//! version reruns the cycle; one that finds the key already taken is answered
//! with the recorded outcome.
//! Also supports async stream of requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::Amount;
use crate::config::EngineConfig;
use crate::model::{
    AssetId, AssetType, Metadata, MutationResult, OwnerId, Receipt, TransactionKind, Wallet,
    WalletBalance,
};
use crate::request::{
    CreditKind, CreditRequest, DebitRequest, IdempotencyKey, Request, normalize_asset_code,
};
use crate::store::{Mutation, NewTransaction, Store, StoreError, StoreResult, bounded};

mod error;
pub use error::{LedgerError, NotFound};

/// A credit or debit ready to go through the mutation protocol.
struct Draft {
    owner: OwnerId,
    asset_code: String,
    key: IdempotencyKey,
    /// Negative for debits
    amount: Amount,
    kind: TransactionKind,
    reason: String,
    metadata: Metadata,
}

/// The ledger engine.
///
/// Holds a shared store handle; clone the `Arc` to share the store with
/// [`HistoryReader`](crate::HistoryReader) and
/// [`AuditValidator`](crate::AuditValidator).
pub struct LedgerEngine<S> {
    store: Arc<S>,
    max_retries: u32,
    timeout: Duration,
}

/// Public API
impl<S: Store> LedgerEngine<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            store,
            max_retries: config.max_retries.max(1),
            timeout: config.storage_timeout(),
        }
    }

    /// Run the engine with the given request stream
    pub async fn run(&self, mut stream: impl Stream<Item = Request> + Unpin) {
        while let Some(request) = stream.next().await {
            // a failed request must not stop the run; `apply` already logged it
            let _ = self.apply(request).await;
        }
    }

    /// Apply a single request and log its outcome
    pub async fn apply(&self, request: Request) -> Result<(), LedgerError> {
        match request {
            Request::Open {
                owner,
                asset_code,
                opening,
            } => {
                let result = self.open_with_balance(owner, &asset_code, opening).await;
                match &result {
                    Ok(balance) => info!(
                        owner,
                        asset = %asset_code,
                        wallet = balance.wallet_id,
                        balance = %balance.balance,
                        "open applied"
                    ),
                    Err(e) => info!(owner, asset = %asset_code, reason = %e, "open skipped"),
                }
                result.map(|_| ())
            }
            Request::Credit(request) => {
                let op = match request.kind {
                    CreditKind::TopUp { .. } => "topup",
                    CreditKind::Bonus { .. } => "bonus",
                };
                let (owner, asset, key, amount) = (
                    request.owner,
                    request.asset_code.clone(),
                    request.key.clone(),
                    request.amount,
                );
                let result = self.credit(request).await;
                Self::log_result(op, owner, &asset, &key, amount, &result);
                result.map(|_| ())
            }
            Request::Debit(request) => {
                let (owner, asset, key, amount) = (
                    request.owner,
                    request.asset_code.clone(),
                    request.key.clone(),
                    request.amount,
                );
                let result = self.debit(request).await;
                Self::log_result("purchase", owner, &asset, &key, amount, &result);
                result.map(|_| ())
            }
        }
    }

    /// Credit a wallet (top-up or bonus).
    pub async fn credit(&self, request: CreditRequest) -> Result<MutationResult, LedgerError> {
        if !request.amount.is_positive() {
            return Err(LedgerError::Validation(format!(
                "credit amount must be positive, got {}",
                request.amount
            )));
        }

        let mut metadata = Metadata::new();
        metadata.insert("asset".to_string(), request.asset_code.as_str().into());
        let (kind, reason) = match request.kind {
            CreditKind::TopUp { order_id } => {
                metadata.insert("order_id".to_string(), order_id.into());
                (TransactionKind::TopUp, "User wallet top-up".to_string())
            }
            CreditKind::Bonus { reason } => {
                if let Some(reason) = &reason {
                    metadata.insert("reason".to_string(), reason.as_str().into());
                }
                (
                    TransactionKind::Bonus,
                    reason.unwrap_or_else(|| "System bonus".to_string()),
                )
            }
        };

        self.mutate(Draft {
            owner: request.owner,
            asset_code: request.asset_code,
            key: request.key,
            amount: request.amount,
            kind,
            reason,
            metadata,
        })
        .await
    }

    /// Debit a wallet for a purchase. Fails with
    /// [`LedgerError::InsufficientBalance`] instead of going below zero.
    pub async fn debit(&self, request: DebitRequest) -> Result<MutationResult, LedgerError> {
        if !request.amount.is_positive() {
            return Err(LedgerError::Validation(format!(
                "debit amount must be positive, got {}",
                request.amount
            )));
        }

        let mut metadata = Metadata::new();
        metadata.insert("asset".to_string(), request.asset_code.as_str().into());
        metadata.insert("item".to_string(), request.item_label.as_str().into());

        self.mutate(Draft {
            owner: request.owner,
            asset_code: request.asset_code,
            key: request.key,
            amount: -request.amount,
            kind: TransactionKind::Purchase,
            reason: format!("Purchase: {}", request.item_label),
            metadata,
        })
        .await
    }

    /// Provision the owner's wallet for `asset_code`, or return the existing one.
    pub async fn open_wallet(
        &self,
        owner: OwnerId,
        asset_code: &str,
    ) -> Result<Wallet, LedgerError> {
        let asset = self.asset(asset_code).await?;
        Ok(self
            .call("provision_wallet", self.store.provision_wallet(owner, asset.id))
            .await?)
    }

    pub async fn get_balance(
        &self,
        owner: OwnerId,
        asset_code: &str,
    ) -> Result<WalletBalance, LedgerError> {
        let asset = self.asset(asset_code).await?;
        let wallet = self.load_wallet(owner, &asset).await?;
        Ok(WalletBalance::new(&wallet, &asset))
    }

    /// All wallets of one owner, ordered by asset code.
    pub async fn list_balances(&self, owner: OwnerId) -> Result<Vec<WalletBalance>, LedgerError> {
        let wallets = self
            .call("wallets_for_owner", self.store.wallets_for_owner(owner))
            .await?;
        let mut balances = self.join_assets(wallets).await?;
        balances.sort_by(|a, b| a.asset_code.cmp(&b.asset_code));
        Ok(balances)
    }

    /// Every wallet, ordered by owner then asset code.
    pub async fn balances(&self) -> Result<Vec<WalletBalance>, LedgerError> {
        let wallets = self.call("wallets", self.store.wallets()).await?;
        let mut balances = self.join_assets(wallets).await?;
        balances.sort_by(|a, b| (a.owner, &a.asset_code).cmp(&(b.owner, &b.asset_code)));
        Ok(balances)
    }
}

/// Private API
impl<S: Store> LedgerEngine<S> {
    /// Small helper to log credit/debit results
    fn log_result(
        op: &str,
        owner: OwnerId,
        asset: &str,
        key: &IdempotencyKey,
        amount: Amount,
        result: &Result<MutationResult, LedgerError>,
    ) {
        match result {
            Ok(outcome) if outcome.duplicate => info!(
                owner,
                asset,
                key = %key,
                amount = %amount,
                tx = outcome.transaction_id,
                "{op} already applied"
            ),
            Ok(outcome) => info!(
                owner,
                asset,
                key = %key,
                amount = %amount,
                balance = %outcome.new_balance,
                version = outcome.version,
                "{op} applied"
            ),
            Err(e) => info!(
                owner,
                asset,
                key = %key,
                amount = %amount,
                reason = %e,
                "{op} skipped"
            ),
        }
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        call: impl std::future::Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        bounded(operation, self.timeout, call).await
    }

    async fn asset(&self, asset_code: &str) -> Result<AssetType, LedgerError> {
        let code = normalize_asset_code(asset_code)?;
        let asset = self.call("asset", self.store.asset(&code)).await?;
        asset.ok_or_else(|| NotFound::Asset(code).into())
    }

    async fn load_wallet(&self, owner: OwnerId, asset: &AssetType) -> Result<Wallet, LedgerError> {
        self.call("wallet", self.store.wallet(owner, asset.id))
            .await?
            .ok_or_else(|| {
                NotFound::Wallet {
                    owner,
                    asset: asset.code.clone(),
                }
                .into()
            })
    }

    async fn join_assets(&self, wallets: Vec<Wallet>) -> Result<Vec<WalletBalance>, LedgerError> {
        let mut assets: HashMap<AssetId, AssetType> = HashMap::new();
        let mut balances = Vec::with_capacity(wallets.len());
        for wallet in wallets {
            if !assets.contains_key(&wallet.asset) {
                let asset = self
                    .call("asset_by_id", self.store.asset_by_id(wallet.asset))
                    .await?
                    .ok_or(NotFound::AssetId(wallet.asset))?;
                assets.insert(asset.id, asset);
            }
            if let Some(asset) = assets.get(&wallet.asset) {
                balances.push(WalletBalance::new(&wallet, asset));
            }
        }
        Ok(balances)
    }

    /// Provision a wallet and credit a positive opening balance as a bonus.
    ///
    /// The opening credit uses a key derived from the wallet identity, so
    /// replaying the same `Open` request never credits twice.
    async fn open_with_balance(
        &self,
        owner: OwnerId,
        asset_code: &str,
        opening: Amount,
    ) -> Result<WalletBalance, LedgerError> {
        if opening.is_negative() {
            return Err(LedgerError::Validation(format!(
                "opening balance must not be negative, got {opening}"
            )));
        }
        self.open_wallet(owner, asset_code).await?;

        if opening.is_positive() {
            let key = IdempotencyKey::new(format!("open:{owner}:{asset_code}"))?;
            let request = CreditRequest::bonus(
                owner,
                asset_code,
                opening,
                key,
                Some("Opening balance".to_string()),
            )?;
            self.credit(request).await?;
        }

        self.get_balance(owner, asset_code).await
    }

    /// Run the dedupe, load, compute, commit cycle for one mutation.
    async fn mutate(&self, draft: Draft) -> Result<MutationResult, LedgerError> {
        if let Some(receipt) = self.call("receipt", self.store.receipt(&draft.key)).await? {
            return Ok(Self::replay(&draft, receipt));
        }

        let asset = self.asset(&draft.asset_code).await?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let wallet = self.load_wallet(draft.owner, &asset).await?;

            let new_balance = wallet.balance.checked_add(draft.amount).ok_or_else(|| {
                LedgerError::Validation(format!("balance of wallet {} would overflow", wallet.id))
            })?;
            if new_balance.is_negative() {
                return Err(LedgerError::InsufficientBalance {
                    wallet: wallet.id,
                    available: wallet.balance,
                    requested: -draft.amount,
                });
            }

            let mutation = Mutation {
                wallet_id: wallet.id,
                expected_version: wallet.version,
                new_balance,
                entry: NewTransaction {
                    idempotency_key: draft.key.clone(),
                    amount: draft.amount,
                    kind: draft.kind,
                    reason: draft.reason.clone(),
                    metadata: draft.metadata.clone(),
                },
            };

            match self.call("commit", self.store.commit(mutation)).await {
                Ok(receipt) => return Ok(receipt.outcome(false)),
                // Lost the race on the key to a concurrent writer
                Err(StoreError::DuplicateKey(receipt)) => return Ok(Self::replay(&draft, *receipt)),
                Err(StoreError::VersionConflict {
                    wallet,
                    expected,
                    found,
                }) => {
                    if attempt >= self.max_retries {
                        warn!(wallet, attempts = attempt, key = %draft.key, "giving up on contended wallet");
                        return Err(LedgerError::ConcurrencyConflict {
                            wallet,
                            attempts: attempt,
                        });
                    }
                    debug!(wallet, expected, found, attempt, "version conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn replay(draft: &Draft, receipt: Receipt) -> MutationResult {
        let recorded = &receipt.transaction;
        if recorded.amount != draft.amount || recorded.kind != draft.kind {
            warn!(
                key = %draft.key,
                recorded_kind = %recorded.kind,
                recorded_amount = %recorded.amount,
                requested_kind = %draft.kind,
                requested_amount = %draft.amount,
                "idempotency key reused with a different payload"
            );
        }
        receipt.outcome(true)
    }
}
