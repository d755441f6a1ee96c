/// Transaction ledger
///
/// Append-mostly log of point movements. Every record is immutable except
/// its `suspicious` flag and, for redemptions, the one-way `processed`
/// transition. Balance changes are applied in the same storage transaction
/// as the record that explains them.

mod engine;
mod pricing;
mod records;

pub use engine::Ledger;
pub use pricing::{base_points, promotion_bonus, quote, to_cents, PurchaseQuote};
pub(crate) use records::{load_transaction, mark_processed};

use crate::error::{RewardsError, RewardsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Purchase,
    Adjustment,
    Transfer,
    Redemption,
    Event,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Adjustment => "adjustment",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Redemption => "redemption",
            TransactionKind::Event => "event",
        }
    }

    pub fn from_str(s: &str) -> RewardsResult<Self> {
        match s {
            "purchase" => Ok(TransactionKind::Purchase),
            "adjustment" => Ok(TransactionKind::Adjustment),
            "transfer" => Ok(TransactionKind::Transfer),
            "redemption" => Ok(TransactionKind::Redemption),
            "event" => Ok(TransactionKind::Event),
            _ => Err(RewardsError::Validation(format!(
                "Invalid transaction type: {}",
                s
            ))),
        }
    }
}

/// Materialized ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub account_id: i64,
    /// Owner's utorid
    pub utorid: String,
    pub amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earned: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awarded: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<i64>,
    pub suspicious: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,
    pub remark: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub promotion_ids: Vec<i64>,
}

impl Transaction {
    /// Points this record moves on its owner's balance while not suspicious.
    ///
    /// Pending redemptions have not touched the balance yet.
    pub fn point_effect(&self) -> i64 {
        match self.kind {
            TransactionKind::Purchase | TransactionKind::Adjustment | TransactionKind::Transfer => {
                self.amount
            }
            TransactionKind::Event => self.awarded.unwrap_or(0),
            TransactionKind::Redemption => {
                if self.processed.unwrap_or(false) {
                    self.amount
                } else {
                    0
                }
            }
        }
    }

    pub fn is_pending_redemption(&self) -> bool {
        self.kind == TransactionKind::Redemption && !self.processed.unwrap_or(false)
    }
}

/// Purchase recorded by a cashier on behalf of `account_id`
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub account_id: i64,
    /// Dollars
    pub spent: f64,
    pub promotion_ids: Vec<i64>,
    pub remark: String,
}

/// Manager correction tied to an earlier transaction
#[derive(Debug, Clone)]
pub struct AdjustmentRequest {
    pub account_id: i64,
    pub amount: i64,
    pub related_id: i64,
    pub remark: String,
}

/// Points sent by the acting account to `recipient_id`
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub recipient_id: i64,
    pub amount: i64,
    pub remark: String,
}

/// Redemption request by the acting account
#[derive(Debug, Clone)]
pub struct RedemptionRequest {
    pub amount: i64,
    pub remark: String,
}

/// Who receives an event award
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardTarget {
    Guest(i64),
    AllGuests,
}

/// Disbursement from an event's point pool
#[derive(Debug, Clone)]
pub struct EventAwardRequest {
    pub event_id: i64,
    pub target: AwardTarget,
    /// Points per recipient
    pub amount: i64,
    pub remark: String,
}

/// Both halves of a transfer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub sent: Transaction,
    pub received: Transaction,
}
