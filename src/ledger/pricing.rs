/// Purchase pricing
///
/// One point per 25 cents spent, plus each applied promotion's rate bonus
/// (rounded on its own) and flat points. Rounding is to the nearest
/// integer with halves away from zero.
use crate::{
    error::{RewardsError, RewardsResult},
    promotion::Promotion,
};
use serde::Serialize;

const CENTS_PER_POINT: f64 = 25.0;

/// Breakdown of the points a purchase earns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseQuote {
    pub base: i64,
    pub bonus: i64,
}

impl PurchaseQuote {
    pub fn total(&self) -> i64 {
        self.base + self.bonus
    }
}

/// Dollars to whole cents
pub fn to_cents(spent: f64) -> RewardsResult<i64> {
    if !spent.is_finite() || spent <= 0.0 {
        return Err(RewardsError::Validation(
            "spent must be a positive number".to_string(),
        ));
    }
    Ok((spent * 100.0).round() as i64)
}

pub fn base_points(cents: i64) -> i64 {
    (cents as f64 / CENTS_PER_POINT).round() as i64
}

pub fn promotion_bonus(promotion: &Promotion, cents: i64) -> i64 {
    let rate_bonus = promotion
        .rate
        .map_or(0, |rate| (cents as f64 * rate).round() as i64);
    rate_bonus + promotion.points.unwrap_or(0)
}

/// Price a purchase against promotions that already passed eligibility checks
pub fn quote(spent: f64, promotions: &[Promotion]) -> RewardsResult<PurchaseQuote> {
    let cents = to_cents(spent)?;
    Ok(PurchaseQuote {
        base: base_points(cents),
        bonus: promotions.iter().map(|p| promotion_bonus(p, cents)).sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promotion::PromotionKind;
    use chrono::{Duration, Utc};

    fn promotion(rate: Option<f64>, points: Option<i64>) -> Promotion {
        let now = Utc::now();
        Promotion {
            id: 1,
            name: "Bonus".to_string(),
            description: String::new(),
            kind: PromotionKind::Automatic,
            start_time: now,
            end_time: now + Duration::days(1),
            min_spending: None,
            rate,
            points,
        }
    }

    #[test]
    fn test_base_rate() {
        assert_eq!(quote(20.0, &[]).unwrap().total(), 80);
        assert_eq!(quote(0.25, &[]).unwrap().total(), 1);
        // 19.99 is 1999 cents, 79.96 points
        assert_eq!(quote(19.99, &[]).unwrap().total(), 80);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(base_points(13), 1);
        assert_eq!(base_points(12), 0);
        assert_eq!(base_points(38), 2);

        // 1.5 bonus points round up
        let half = promotion(Some(0.5), None);
        assert_eq!(promotion_bonus(&half, 3), 2);
    }

    #[test]
    fn test_promotions_stack() {
        let rate = promotion(Some(0.01), None);
        let flat = promotion(None, Some(100));
        let both = promotion(Some(0.005), Some(10));

        let q = quote(20.0, &[rate.clone()]).unwrap();
        assert_eq!(q, PurchaseQuote { base: 80, bonus: 20 });

        let q = quote(20.0, &[rate, flat, both]).unwrap();
        assert_eq!(q.bonus, 20 + 100 + 10 + 10);
    }

    #[test]
    fn test_rejects_non_positive_spend() {
        assert!(quote(0.0, &[]).is_err());
        assert!(quote(-5.0, &[]).is_err());
        assert!(quote(f64::NAN, &[]).is_err());
    }
}
