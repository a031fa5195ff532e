//! Reconciliation of stored balances against the transaction log.
//!
//! Purely diagnostic: a discrepancy means some write updated the wallet
//! without the log (or the reverse). It is reported, never repaired.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::Amount;
use crate::config::EngineConfig;
use crate::engine::{LedgerError, NotFound};
use crate::model::WalletId;
use crate::store::{AuditView, Store, bounded};

/// Outcome of auditing one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub wallet_id: WalletId,
    pub stored_balance: Amount,
    /// Sum of completed transaction amounts
    pub calculated_balance: Amount,
    /// `stored_balance == calculated_balance`
    pub is_valid: bool,
    /// `stored_balance - calculated_balance`
    pub discrepancy: Amount,
    pub version: u64,
    pub transaction_count: u64,
    /// Latest snapshot agrees with the wallet's balance and version
    pub snapshot_matches: bool,
}

impl AuditReport {
    /// Balance, version counter and snapshot trail all agree with the log.
    pub fn is_consistent(&self) -> bool {
        self.is_valid && self.snapshot_matches && self.version == self.transaction_count
    }
}

pub struct AuditValidator<S> {
    store: Arc<S>,
    timeout: Duration,
}

impl<S: Store> AuditValidator<S> {
    pub fn new(store: Arc<S>, config: &EngineConfig) -> Self {
        Self {
            store,
            timeout: config.storage_timeout(),
        }
    }

    pub async fn validate(&self, wallet_id: WalletId) -> Result<AuditReport, LedgerError> {
        let view = bounded("audit_view", self.timeout, self.store.audit_view(wallet_id))
            .await?
            .ok_or(NotFound::WalletId(wallet_id))?;
        Ok(Self::report(view))
    }

    /// Audit every wallet in the store.
    pub async fn validate_all(&self) -> Result<Vec<AuditReport>, LedgerError> {
        let wallets = bounded("wallets", self.timeout, self.store.wallets()).await?;
        let mut reports = Vec::with_capacity(wallets.len());
        for wallet in &wallets {
            reports.push(self.validate(wallet.id).await?);
        }
        Ok(reports)
    }

    fn report(view: AuditView) -> AuditReport {
        let AuditView {
            wallet,
            totals,
            latest_snapshot,
        } = view;

        let snapshot_matches = match &latest_snapshot {
            Some(s) => s.balance == wallet.balance && s.version == wallet.version,
            None => wallet.version == 0,
        };
        let report = AuditReport {
            wallet_id: wallet.id,
            stored_balance: wallet.balance,
            calculated_balance: totals.sum,
            is_valid: wallet.balance == totals.sum,
            discrepancy: wallet.balance.saturating_sub(totals.sum),
            version: wallet.version,
            transaction_count: totals.count,
            snapshot_matches,
        };

        if !report.is_consistent() {
            warn!(
                wallet = wallet.id,
                stored = %report.stored_balance,
                calculated = %report.calculated_balance,
                discrepancy = %report.discrepancy,
                version = report.version,
                transactions = report.transaction_count,
                snapshot_matches,
                "wallet audit failed"
            );
        }
        report
    }
}
