/// Promotion catalog storage and lifecycle rules
use crate::{
    account::{Actor, Role},
    clock::Clock,
    db::{self, decode_time, encode_time},
    error::{RewardsError, RewardsResult},
    promotion::{
        CreatePromotionRequest, Promotion, PromotionKind, UpdatePromotionRequest,
    },
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use std::sync::Arc;

const PROMOTION_COLUMNS: &str =
    "id, name, description, kind, start_time, end_time, min_spending, rate, points";

/// Promotion catalog
#[derive(Clone)]
pub struct PromotionCatalog {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl PromotionCatalog {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Create a promotion whose window has not yet opened
    pub async fn create(
        &self,
        actor: &Actor,
        req: CreatePromotionRequest,
    ) -> RewardsResult<Promotion> {
        actor.require(Role::Manager)?;

        let mut promotion = Promotion {
            id: 0,
            name: req.name,
            description: req.description,
            kind: req.kind,
            start_time: req.start_time,
            end_time: req.end_time,
            min_spending: req.min_spending,
            rate: req.rate,
            points: req.points,
        };
        validate_definition(&promotion, self.clock.now())?;

        let result = sqlx::query(
            r#"
            INSERT INTO promotion (name, description, kind, start_time, end_time, min_spending, rate, points)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&promotion.name)
        .bind(&promotion.description)
        .bind(promotion.kind.as_str())
        .bind(encode_time(promotion.start_time))
        .bind(encode_time(promotion.end_time))
        .bind(promotion.min_spending)
        .bind(promotion.rate)
        .bind(promotion.points)
        .execute(&self.db)
        .await?;

        promotion.id = result.last_insert_rowid();

        tracing::info!(
            promotion_id = promotion.id,
            kind = promotion.kind.as_str(),
            created_by = %actor.utorid,
            "promotion created"
        );

        Ok(promotion)
    }

    /// Get promotion by id
    pub async fn get(&self, id: i64) -> RewardsResult<Promotion> {
        let mut conn = self.db.acquire().await?;
        load_promotion(&mut conn, id).await
    }

    /// Apply a partial update, subject to the promotion's position in time
    ///
    /// Before the window opens anything may change. Once it has opened only
    /// `end_time` may move, and only later, until the old end passes.
    pub async fn update(
        &self,
        actor: &Actor,
        id: i64,
        patch: UpdatePromotionRequest,
    ) -> RewardsResult<Promotion> {
        actor.require(Role::Manager)?;

        if patch.is_empty() {
            return Err(RewardsError::Validation("No fields to update".to_string()));
        }

        let now = self.clock.now();
        let mut tx = db::begin_write(&self.db).await?;
        let current = load_promotion(&mut tx, id).await?;

        if current.has_ended(now) {
            return Err(RewardsError::State(format!(
                "Promotion {} has ended and can no longer be edited",
                id
            )));
        }

        let updated = if current.has_started(now) {
            if patch.touches_frozen_fields() {
                return Err(RewardsError::State(format!(
                    "Promotion {} has started; only its end time may change",
                    id
                )));
            }

            let mut updated = current.clone();
            if let Some(end_time) = patch.end_time {
                if end_time < current.end_time {
                    return Err(RewardsError::Validation(
                        "End time of a running promotion can only move later".to_string(),
                    ));
                }
                updated.end_time = end_time;
            }
            updated
        } else {
            let updated = Promotion {
                id: current.id,
                name: patch.name.unwrap_or(current.name),
                description: patch.description.unwrap_or(current.description),
                kind: patch.kind.unwrap_or(current.kind),
                start_time: patch.start_time.unwrap_or(current.start_time),
                end_time: patch.end_time.unwrap_or(current.end_time),
                min_spending: patch.min_spending.or(current.min_spending),
                rate: patch.rate.or(current.rate),
                points: patch.points.or(current.points),
            };
            validate_definition(&updated, now)?;
            updated
        };

        sqlx::query(
            r#"
            UPDATE promotion
            SET name = ?, description = ?, kind = ?, start_time = ?, end_time = ?,
                min_spending = ?, rate = ?, points = ?
            WHERE id = ?
            "#,
        )
        .bind(&updated.name)
        .bind(&updated.description)
        .bind(updated.kind.as_str())
        .bind(encode_time(updated.start_time))
        .bind(encode_time(updated.end_time))
        .bind(updated.min_spending)
        .bind(updated.rate)
        .bind(updated.points)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(promotion_id = id, updated_by = %actor.utorid, "promotion updated");

        Ok(updated)
    }

    /// Delete a promotion that has not started yet
    pub async fn delete(&self, actor: &Actor, id: i64) -> RewardsResult<()> {
        actor.require(Role::Manager)?;

        let now = self.clock.now();
        let mut tx = db::begin_write(&self.db).await?;
        let promotion = load_promotion(&mut tx, id).await?;

        if promotion.has_started(now) {
            return Err(RewardsError::State(format!(
                "Promotion {} has already started and cannot be deleted",
                id
            )));
        }

        sqlx::query("DELETE FROM promotion WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(promotion_id = id, deleted_by = %actor.utorid, "promotion deleted");

        Ok(())
    }

    /// Whether the promotion is active at `now`
    pub async fn is_active(&self, id: i64, now: DateTime<Utc>) -> RewardsResult<bool> {
        Ok(self.get(id).await?.is_active_at(now))
    }

    /// Whether `account_id` has consumed the promotion
    pub async fn has_been_used_by(&self, account_id: i64, id: i64) -> RewardsResult<bool> {
        let mut conn = self.db.acquire().await?;
        usage_exists(&mut conn, account_id, id).await
    }

    /// Promotions active right now
    pub async fn list_active(&self) -> RewardsResult<Vec<Promotion>> {
        let now = self.clock.now();
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|p| p.is_active_at(now))
            .collect())
    }

    /// Active promotions the account can still apply
    pub async fn list_available_for(&self, account_id: i64) -> RewardsResult<Vec<Promotion>> {
        let used: Vec<i64> =
            sqlx::query_scalar("SELECT promotion_id FROM promotion_usage WHERE account_id = ?")
                .bind(account_id)
                .fetch_all(&self.db)
                .await?;

        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|p| p.kind == PromotionKind::Automatic || !used.contains(&p.id))
            .collect())
    }

    async fn list_all(&self) -> RewardsResult<Vec<Promotion>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM promotion ORDER BY start_time, id",
            PROMOTION_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(promotion_from_row).collect()
    }
}

/// Field checks shared by create and pre-start update
fn validate_definition(promotion: &Promotion, now: DateTime<Utc>) -> RewardsResult<()> {
    if promotion.name.trim().is_empty() {
        return Err(RewardsError::Validation("Promotion name is required".to_string()));
    }

    if promotion.end_time <= promotion.start_time {
        return Err(RewardsError::Validation(
            "End time must be after start time".to_string(),
        ));
    }

    if promotion.start_time < now {
        return Err(RewardsError::Validation(
            "Start time cannot be in the past".to_string(),
        ));
    }

    if let Some(min) = promotion.min_spending {
        if !(min.is_finite() && min > 0.0) {
            return Err(RewardsError::Validation(
                "minSpending must be a positive number".to_string(),
            ));
        }
    }

    if let Some(rate) = promotion.rate {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(RewardsError::Validation(
                "rate must be a positive number".to_string(),
            ));
        }
    }

    if let Some(points) = promotion.points {
        if points < 0 {
            return Err(RewardsError::Validation(
                "points must be a non-negative integer".to_string(),
            ));
        }
    }

    Ok(())
}

/// Load a promotion inside an open transaction
pub(crate) async fn load_promotion(
    conn: &mut SqliteConnection,
    id: i64,
) -> RewardsResult<Promotion> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM promotion WHERE id = ?",
        PROMOTION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| RewardsError::NotFound(format!("Promotion {} not found", id)))?;

    promotion_from_row(&row)
}

pub(crate) async fn usage_exists(
    conn: &mut SqliteConnection,
    account_id: i64,
    promotion_id: i64,
) -> RewardsResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM promotion_usage WHERE account_id = ? AND promotion_id = ?",
    )
    .bind(account_id)
    .bind(promotion_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

/// Insert the usage row; a duplicate means a concurrent purchase won
pub(crate) async fn record_usage(
    conn: &mut SqliteConnection,
    account_id: i64,
    promotion_id: i64,
    transaction_id: i64,
    now: DateTime<Utc>,
) -> RewardsResult<()> {
    sqlx::query(
        "INSERT INTO promotion_usage (account_id, promotion_id, transaction_id, used_at)
         VALUES (?, ?, ?, ?)",
    )
    .bind(account_id)
    .bind(promotion_id)
    .bind(transaction_id)
    .bind(encode_time(now))
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            RewardsError::Conflict(format!(
                "Promotion {} already used by account {}",
                promotion_id, account_id
            ))
        } else {
            RewardsError::Database(e)
        }
    })?;

    Ok(())
}

fn promotion_from_row(row: &SqliteRow) -> RewardsResult<Promotion> {
    let kind: String = row.try_get("kind")?;
    let start_time: String = row.try_get("start_time")?;
    let end_time: String = row.try_get("end_time")?;

    Ok(Promotion {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        kind: PromotionKind::from_str(&kind)?,
        start_time: decode_time(&start_time)?,
        end_time: decode_time(&end_time)?,
        min_spending: row.try_get("min_spending")?,
        rate: row.try_get("rate")?,
        points: row.try_get("points")?,
    })
}
