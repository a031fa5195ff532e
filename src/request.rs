//! Typed requests accepted by the [`LedgerEngine`](crate::LedgerEngine).
//!
//! Constructors validate required fields once, at the boundary. The engine
//! itself only enforces domain rules (positive amounts, sufficient balance).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Amount;
use crate::engine::LedgerError;
use crate::model::OwnerId;

/// Longest accepted idempotency key, in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// Caller-supplied token that makes a mutation apply at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Result<Self, LedgerError> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(LedgerError::Validation(
                "idempotency key must not be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_KEY_LEN {
            return Err(LedgerError::Validation(format!(
                "idempotency key longer than {MAX_KEY_LEN} bytes"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize an asset code the way the asset catalog stores it.
pub fn normalize_asset_code(code: &str) -> Result<String, LedgerError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(LedgerError::Validation(
            "asset code must not be empty".to_string(),
        ));
    }
    Ok(code.to_ascii_uppercase())
}

fn required(field: &str, value: impl Into<String>) -> Result<String, LedgerError> {
    let value = value.into();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Why a wallet is being credited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditKind {
    /// Purchase of credits with real money, tied to an external order.
    TopUp { order_id: String },
    /// System-issued credits.
    Bonus { reason: Option<String> },
}

/// Credit `amount` to the owner's wallet for `asset_code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditRequest {
    pub owner: OwnerId,
    pub asset_code: String,
    pub amount: Amount,
    pub key: IdempotencyKey,
    pub kind: CreditKind,
}

impl CreditRequest {
    pub fn top_up(
        owner: OwnerId,
        asset_code: &str,
        amount: Amount,
        key: IdempotencyKey,
        order_id: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            owner,
            asset_code: normalize_asset_code(asset_code)?,
            amount,
            key,
            kind: CreditKind::TopUp {
                order_id: required("order id", order_id)?,
            },
        })
    }

    pub fn bonus(
        owner: OwnerId,
        asset_code: &str,
        amount: Amount,
        key: IdempotencyKey,
        reason: Option<String>,
    ) -> Result<Self, LedgerError> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        Ok(Self {
            owner,
            asset_code: normalize_asset_code(asset_code)?,
            amount,
            key,
            kind: CreditKind::Bonus { reason },
        })
    }
}

/// Debit `amount` from the owner's wallet for `asset_code` to buy an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebitRequest {
    pub owner: OwnerId,
    pub asset_code: String,
    pub amount: Amount,
    pub key: IdempotencyKey,
    pub item_label: String,
}

impl DebitRequest {
    pub fn purchase(
        owner: OwnerId,
        asset_code: &str,
        amount: Amount,
        key: IdempotencyKey,
        item_label: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            owner,
            asset_code: normalize_asset_code(asset_code)?,
            amount,
            key,
            item_label: required("item label", item_label)?,
        })
    }
}

/// A request representing the possible inputs of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Provision a wallet, crediting `opening` as a bonus when positive.
    Open {
        owner: OwnerId,
        asset_code: String,
        opening: Amount,
    },
    Credit(CreditRequest),
    Debit(DebitRequest),
}

impl Request {
    pub fn open(owner: OwnerId, asset_code: &str, opening: Amount) -> Result<Self, LedgerError> {
        Ok(Request::Open {
            owner,
            asset_code: normalize_asset_code(asset_code)?,
            opening,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_trimmed() {
        let key = IdempotencyKey::new("  order-1 ").unwrap();
        assert_eq!(key.as_str(), "order-1");
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            IdempotencyKey::new("   "),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn oversized_key_is_rejected() {
        let key = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            IdempotencyKey::new(key),
            Err(LedgerError::Validation(_))
        ));
        assert!(IdempotencyKey::new("k".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn asset_code_is_upper_cased() {
        let request = CreditRequest::bonus(
            1,
            " gold ",
            Amount::from_units(5),
            IdempotencyKey::new("k").unwrap(),
            None,
        )
        .unwrap();
        assert_eq!(request.asset_code, "GOLD");
    }

    #[test]
    fn top_up_requires_order_id() {
        let result = CreditRequest::top_up(
            1,
            "GOLD",
            Amount::from_units(5),
            IdempotencyKey::new("k").unwrap(),
            " ",
        );
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn purchase_requires_item_label() {
        let result = DebitRequest::purchase(
            1,
            "GOLD",
            Amount::from_units(5),
            IdempotencyKey::new("k").unwrap(),
            "",
        );
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn blank_bonus_reason_is_dropped() {
        let request = CreditRequest::bonus(
            1,
            "GOLD",
            Amount::from_units(5),
            IdempotencyKey::new("k").unwrap(),
            Some("  ".to_string()),
        )
        .unwrap();
        assert_eq!(request.kind, CreditKind::Bonus { reason: None });
    }

    #[test]
    fn open_rejects_blank_asset() {
        assert!(matches!(
            Request::open(1, "", Amount::ZERO),
            Err(LedgerError::Validation(_))
        ));
    }
}
