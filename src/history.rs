//! Paginated, read-only view of a wallet's transactions.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EngineConfig, HistoryConfig};
use crate::engine::{LedgerError, NotFound};
use crate::model::{OwnerId, Transaction};
use crate::request::normalize_asset_code;
use crate::store::{Store, bounded};

/// One page of history, most recent first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub transactions: Vec<Transaction>,
    pub total: usize,
    /// Effective page size after clamping
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

pub struct HistoryReader<S> {
    store: Arc<S>,
    default_limit: usize,
    max_limit: usize,
    timeout: Duration,
}

impl<S: Store> HistoryReader<S> {
    pub fn new(store: Arc<S>, history: &HistoryConfig, engine: &EngineConfig) -> Self {
        let max_limit = history.max_limit.max(1);
        Self {
            store,
            default_limit: history.default_limit.clamp(1, max_limit),
            max_limit,
            timeout: engine.storage_timeout(),
        }
    }

    /// Transactions of the owner's `asset_code` wallet. `limit` is clamped to
    /// `1..=max_limit`; `None` means the configured default.
    pub async fn history(
        &self,
        owner: OwnerId,
        asset_code: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<HistoryPage, LedgerError> {
        let code = normalize_asset_code(asset_code)?;
        let limit = limit
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit);

        let asset = bounded("asset", self.timeout, self.store.asset(&code))
            .await?
            .ok_or_else(|| NotFound::Asset(code.clone()))?;
        let wallet = bounded("wallet", self.timeout, self.store.wallet(owner, asset.id))
            .await?
            .ok_or_else(|| NotFound::Wallet {
                owner,
                asset: code.clone(),
            })?;

        let page = bounded(
            "transactions",
            self.timeout,
            self.store.transactions(wallet.id, limit, offset),
        )
        .await?;

        Ok(HistoryPage {
            has_more: offset.saturating_add(limit) < page.total,
            transactions: page.transactions,
            total: page.total,
            limit,
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CreditRequest, IdempotencyKey, Request};
    use crate::store::MemoryStore;
    use crate::{Amount, LedgerEngine};

    async fn wallet_with_transactions(count: usize) -> HistoryReader<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.register_asset("GOLD", "Gold Coins", 0);
        let engine = LedgerEngine::new(store.clone(), &EngineConfig::default());
        engine
            .apply(Request::open(1, "GOLD", Amount::ZERO).unwrap())
            .await
            .unwrap();
        for i in 1..=count {
            let request = CreditRequest::bonus(
                1,
                "GOLD",
                Amount::from_units(i as i64),
                IdempotencyKey::new(format!("k{i}")).unwrap(),
                None,
            )
            .unwrap();
            engine.credit(request).await.unwrap();
        }
        HistoryReader::new(store, &HistoryConfig::default(), &EngineConfig::default())
    }

    #[tokio::test]
    async fn first_page_of_fifteen() {
        let reader = wallet_with_transactions(15).await;

        let page = reader.history(1, "GOLD", Some(10), 0).await.unwrap();
        assert_eq!(page.transactions.len(), 10);
        assert_eq!(page.total, 15);
        assert!(page.has_more);
        // Most recent first
        assert_eq!(page.transactions[0].idempotency_key.as_str(), "k15");
        assert_eq!(page.transactions[9].idempotency_key.as_str(), "k6");
    }

    #[tokio::test]
    async fn last_page_has_no_more() {
        let reader = wallet_with_transactions(15).await;

        let page = reader.history(1, "gold", Some(10), 10).await.unwrap();
        assert_eq!(page.transactions.len(), 5);
        assert!(!page.has_more);

        let page = reader.history(1, "GOLD", Some(10), 40).await.unwrap();
        assert!(page.transactions.is_empty());
        assert_eq!(page.total, 15);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn limit_is_capped() {
        let reader = wallet_with_transactions(120).await;

        let page = reader.history(1, "GOLD", Some(1_000), 0).await.unwrap();
        assert_eq!(page.limit, 100);
        assert_eq!(page.transactions.len(), 100);
        assert!(page.has_more);

        let page = reader.history(1, "GOLD", Some(0), 0).await.unwrap();
        assert_eq!(page.limit, 1);

        let page = reader.history(1, "GOLD", None, 0).await.unwrap();
        assert_eq!(page.limit, 50);
    }

    #[tokio::test]
    async fn missing_wallet_is_not_found() {
        let reader = wallet_with_transactions(0).await;

        let result = reader.history(2, "GOLD", None, 0).await;
        assert!(matches!(
            result,
            Err(LedgerError::NotFound(NotFound::Wallet { owner: 2, .. }))
        ));
        let result = reader.history(1, "SILVER", None, 0).await;
        assert!(matches!(result, Err(LedgerError::NotFound(NotFound::Asset(_)))));
    }

    #[tokio::test]
    async fn empty_wallet_has_empty_history() {
        let reader = wallet_with_transactions(0).await;
        let page = reader.history(1, "GOLD", None, 0).await.unwrap();
        assert!(page.transactions.is_empty());
        assert_eq!(page.total, 0);
        assert!(!page.has_more);
    }
}
