/// Events and their point pools
///
/// An event carries a disbursable point budget split into `points_awarded`
/// and `points_remain`. Event transactions move budget from the latter to
/// the former; only a manager budget edit changes the total.

mod manager;
mod pool;

pub use manager::EventManager;
pub(crate) use manager::{guest_ids, is_guest, is_organizer, load_event};
pub use pool::EventPointPool;
pub(crate) use pool::{apply_budget, reserve_points};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event record with its membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Maximum guest count; `None` is unlimited
    pub capacity: Option<i64>,
    pub points_remain: i64,
    pub points_awarded: i64,
    pub published: bool,
    pub organizers: Vec<i64>,
    pub guests: Vec<i64>,
}

impl Event {
    pub fn budget(&self) -> PointBudget {
        PointBudget {
            points_awarded: self.points_awarded,
            points_remain: self.points_remain,
        }
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    pub fn is_full(&self) -> bool {
        self.capacity
            .map_or(false, |capacity| self.guests.len() as i64 >= capacity)
    }
}

/// Awarded/remaining split of an event's points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointBudget {
    pub points_awarded: i64,
    pub points_remain: i64,
}

impl PointBudget {
    pub fn total(&self) -> i64 {
        self.points_awarded + self.points_remain
    }
}

/// Event creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: Option<i64>,
    pub points: i64,
}

/// Partial event edit; absent fields are left alone
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateEventRequest {
    pub capacity: Option<i64>,
    /// New total for the point pool
    pub points: Option<i64>,
    pub published: Option<bool>,
}

impl UpdateEventRequest {
    pub fn is_empty(&self) -> bool {
        self.capacity.is_none() && self.points.is_none() && self.published.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_budget_total_and_capacity() {
        let now = Utc::now();
        let event = Event {
            id: 1,
            name: "Games Night".to_string(),
            description: String::new(),
            location: "BA 1160".to_string(),
            start_time: now,
            end_time: now + Duration::hours(3),
            capacity: Some(2),
            points_remain: 60,
            points_awarded: 40,
            published: true,
            organizers: vec![],
            guests: vec![10, 11],
        };

        assert_eq!(event.budget().total(), 100);
        assert!(event.is_full());
        assert!(!event.has_ended(now + Duration::hours(1)));
        assert!(event.has_ended(now + Duration::hours(3)));
    }
}
