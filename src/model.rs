//! Core domain types for the wallet ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::Amount;
use crate::request::IdempotencyKey;

/// Owner (user) identifier.
pub type OwnerId = u64;

/// Asset type identifier.
pub type AssetId = u32;

/// Wallet identifier.
pub type WalletId = u64;

/// Transaction identifier.
pub type TxId = u64;

/// Wallet snapshot identifier.
pub type SnapshotId = u64;

/// A kind of balance a wallet can hold, e.g. an in-game currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetType {
    pub id: AssetId,
    /// Unique upper-case code such as `GOLD`.
    pub code: String,
    pub name: String,
    /// Decimal precision of the asset's minor units.
    pub decimals: u8,
}

/// Balance of one asset held by one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owner: OwnerId,
    pub asset: AssetId,
    /// Never negative.
    pub balance: Amount,
    /// Number of mutations applied since the wallet was provisioned.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a transaction did to its wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Credit bought with real money.
    TopUp,
    /// Credit granted by the system.
    Bonus,
    /// Debit spent on an item.
    Purchase,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::TopUp => "topup",
            TransactionKind::Bonus => "bonus",
            TransactionKind::Purchase => "purchase",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "topup" => Ok(TransactionKind::TopUp),
            "bonus" => Ok(TransactionKind::Bonus),
            "purchase" => Ok(TransactionKind::Purchase),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A stored transaction type that is not one of [`TransactionKind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transaction kind '{0}'")]
pub struct UnknownKind(pub String);

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a transaction. Only completed transactions exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Completed,
}

/// A primitive metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Str(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Str(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Int(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

/// Structured transaction metadata.
pub type Metadata = BTreeMap<String, MetaValue>;

/// An accepted balance mutation. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub idempotency_key: IdempotencyKey,
    pub wallet_id: WalletId,
    /// Positive for credits, negative for debits.
    pub amount: Amount,
    pub kind: TransactionKind,
    pub reason: String,
    pub metadata: Metadata,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// Wallet state captured at the moment a transaction was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub id: SnapshotId,
    pub wallet_id: WalletId,
    pub balance: Amount,
    pub version: u64,
    pub transaction_id: TxId,
    pub recorded_at: DateTime<Utc>,
}

/// A transaction together with the snapshot written by the same commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction: Transaction,
    pub snapshot: WalletSnapshot,
}

impl Receipt {
    /// The recorded outcome of the mutation this receipt belongs to.
    pub fn outcome(&self, duplicate: bool) -> MutationResult {
        MutationResult {
            duplicate,
            wallet_id: self.transaction.wallet_id,
            previous_balance: self.snapshot.balance.saturating_sub(self.transaction.amount),
            new_balance: self.snapshot.balance,
            version: self.snapshot.version,
            transaction_id: self.transaction.id,
        }
    }
}

/// Result of a credit or debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MutationResult {
    /// The idempotency key was already recorded; nothing changed.
    pub duplicate: bool,
    pub wallet_id: WalletId,
    pub previous_balance: Amount,
    pub new_balance: Amount,
    pub version: u64,
    pub transaction_id: TxId,
}

/// Read model of a wallet joined with its asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletBalance {
    pub wallet_id: WalletId,
    pub owner: OwnerId,
    pub asset_code: String,
    pub decimals: u8,
    pub balance: Amount,
    pub version: u64,
}

impl WalletBalance {
    pub fn new(wallet: &Wallet, asset: &AssetType) -> Self {
        Self {
            wallet_id: wallet.id,
            owner: wallet.owner,
            asset_code: asset.code.clone(),
            decimals: asset.decimals,
            balance: wallet.balance,
            version: wallet.version,
        }
    }
}
