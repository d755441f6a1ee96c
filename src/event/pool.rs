/// Event point pool
use crate::{
    account::{Actor, Role},
    db,
    error::{RewardsError, RewardsResult},
    event::PointBudget,
};
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Per-event disbursable point budget
#[derive(Clone)]
pub struct EventPointPool {
    db: SqlitePool,
}

impl EventPointPool {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Current awarded/remaining split
    pub async fn budget(&self, event_id: i64) -> RewardsResult<PointBudget> {
        let mut conn = self.db.acquire().await?;
        load_budget(&mut conn, event_id).await
    }

    /// Move `amount` from remaining to awarded
    pub async fn reserve(&self, event_id: i64, amount: i64) -> RewardsResult<PointBudget> {
        let mut tx = db::begin_write(&self.db).await?;
        let budget = reserve_points(&mut tx, event_id, amount).await?;
        tx.commit().await?;
        Ok(budget)
    }

    /// Set the pool total
    pub async fn set_budget(
        &self,
        actor: &Actor,
        event_id: i64,
        new_total: i64,
    ) -> RewardsResult<PointBudget> {
        actor.require(Role::Manager)?;

        let mut tx = db::begin_write(&self.db).await?;
        let budget = apply_budget(&mut tx, event_id, new_total).await?;
        tx.commit().await?;

        tracing::info!(
            event_id,
            points_awarded = budget.points_awarded,
            points_remain = budget.points_remain,
            updated_by = %actor.utorid,
            "event budget set"
        );

        Ok(budget)
    }
}

/// Set the pool total inside an open transaction. Already-awarded points
/// cannot be clawed back, so the new total must cover them.
pub(crate) async fn apply_budget(
    conn: &mut SqliteConnection,
    event_id: i64,
    new_total: i64,
) -> RewardsResult<PointBudget> {
    if new_total < 0 {
        return Err(RewardsError::Validation(
            "Point budget must be non-negative".to_string(),
        ));
    }

    let row = sqlx::query(
        r#"
        UPDATE event
        SET points_remain = ?1 - points_awarded
        WHERE id = ?2 AND points_awarded <= ?1
        RETURNING points_awarded, points_remain
        "#,
    )
    .bind(new_total)
    .bind(event_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(PointBudget {
            points_awarded: row.try_get("points_awarded")?,
            points_remain: row.try_get("points_remain")?,
        }),
        None => {
            let current = load_budget(conn, event_id).await?;
            Err(RewardsError::Validation(format!(
                "Budget {} is below the {} points already awarded",
                new_total, current.points_awarded
            )))
        }
    }
}

/// Reserve inside an open transaction. The guard is part of the UPDATE so
/// concurrent reservations cannot overdraw the pool.
pub(crate) async fn reserve_points(
    conn: &mut SqliteConnection,
    event_id: i64,
    amount: i64,
) -> RewardsResult<PointBudget> {
    if amount < 0 {
        return Err(RewardsError::Validation(
            "Reserved amount must be non-negative".to_string(),
        ));
    }

    let row = sqlx::query(
        r#"
        UPDATE event
        SET points_remain = points_remain - ?1,
            points_awarded = points_awarded + ?1
        WHERE id = ?2 AND points_remain >= ?1
        RETURNING points_awarded, points_remain
        "#,
    )
    .bind(amount)
    .bind(event_id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(PointBudget {
            points_awarded: row.try_get("points_awarded")?,
            points_remain: row.try_get("points_remain")?,
        }),
        None => {
            let current = load_budget(conn, event_id).await?;
            Err(RewardsError::InsufficientBudget(format!(
                "Event {} has {} points remaining, {} requested",
                event_id, current.points_remain, amount
            )))
        }
    }
}

async fn load_budget(conn: &mut SqliteConnection, event_id: i64) -> RewardsResult<PointBudget> {
    let row = sqlx::query("SELECT points_awarded, points_remain FROM event WHERE id = ?1")
        .bind(event_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Event {} not found", event_id)))?;

    Ok(PointBudget {
        points_awarded: row.try_get("points_awarded")?,
        points_remain: row.try_get("points_remain")?,
    })
}
