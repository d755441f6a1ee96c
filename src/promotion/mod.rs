/// Promotion catalog
///
/// Time-windowed bonuses applied to purchases. A promotion is active over the
/// half-open window `[start_time, end_time)`; one-time promotions are consumed
/// per account through usage rows.

mod catalog;

pub use catalog::PromotionCatalog;
pub(crate) use catalog::{load_promotion, record_usage, usage_exists};

use crate::error::{RewardsError, RewardsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Promotion kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromotionKind {
    /// Applies every time it is referenced while active
    Automatic,
    /// Applies at most once per account
    OneTime,
}

impl PromotionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionKind::Automatic => "automatic",
            PromotionKind::OneTime => "one-time",
        }
    }

    pub fn from_str(s: &str) -> RewardsResult<Self> {
        match s {
            "automatic" => Ok(PromotionKind::Automatic),
            "one-time" => Ok(PromotionKind::OneTime),
            _ => Err(RewardsError::Validation(format!("Invalid promotion type: {}", s))),
        }
    }
}

/// Promotion definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: PromotionKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub min_spending: Option<f64>,
    pub rate: Option<f64>,
    pub points: Option<i64>,
}

impl Promotion {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_time
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// Whether `spent` dollars clears the minimum-spend threshold
    pub fn accepts_spend(&self, spent: f64) -> bool {
        self.min_spending.map_or(true, |min| spent >= min)
    }
}

/// Promotion creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePromotionRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: PromotionKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub min_spending: Option<f64>,
    pub rate: Option<f64>,
    pub points: Option<i64>,
}

/// Partial promotion update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePromotionRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<PromotionKind>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub min_spending: Option<f64>,
    pub rate: Option<f64>,
    pub points: Option<i64>,
}

impl UpdatePromotionRequest {
    /// Whether the patch touches anything other than `end_time`
    pub fn touches_frozen_fields(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.kind.is_some()
            || self.start_time.is_some()
            || self.min_spending.is_some()
            || self.rate.is_some()
            || self.points.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.touches_frozen_fields() && self.end_time.is_none()
    }
}
