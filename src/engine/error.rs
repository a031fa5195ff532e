//! Error types for ledger operations.

use std::time::Duration;
use thiserror::Error;

use crate::Amount;
use crate::model::{AssetId, OwnerId, WalletId};
use crate::store::StoreError;

/// Top-level error returned by the ledger services.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient balance in wallet {wallet}: available {available}, requested {requested}")]
    InsufficientBalance {
        wallet: WalletId,
        available: Amount,
        requested: Amount,
    },

    #[error("wallet {wallet} still contended after {attempts} attempts")]
    ConcurrencyConflict { wallet: WalletId, attempts: u32 },

    #[error("storage call `{operation}` timed out after {after:?}")]
    StorageTimeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage rejected the operation: {0}")]
    Storage(#[source] StoreError),
}

impl LedgerError {
    /// Transient failures the caller may retry with the same idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrencyConflict { .. }
                | LedgerError::StorageTimeout { .. }
                | LedgerError::StorageUnavailable(_)
        )
    }
}

/// Something the caller referred to does not exist.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotFound {
    #[error("asset {0} not found")]
    Asset(String),
    #[error("asset id {0} not found")]
    AssetId(AssetId),
    #[error("wallet not found for owner {owner} and asset {asset}")]
    Wallet { owner: OwnerId, asset: String },
    #[error("wallet {0} not found")]
    WalletId(WalletId),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout { operation, after } => {
                LedgerError::StorageTimeout { operation, after }
            }
            StoreError::Unavailable(reason) => LedgerError::StorageUnavailable(reason),
            StoreError::Database(
                e @ (sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed),
            ) => LedgerError::StorageUnavailable(e.to_string()),
            StoreError::UnknownWallet(id) => NotFound::WalletId(id).into(),
            StoreError::UnknownAsset(id) => NotFound::AssetId(id).into(),
            other => LedgerError::Storage(other),
        }
    }
}
