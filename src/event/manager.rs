/// Event lifecycle and membership management
use crate::{
    account::{load_account, Actor, Role},
    clock::Clock,
    config::LedgerConfig,
    db::{self, decode_time, encode_time, retry_on_conflict},
    error::{RewardsError, RewardsResult},
    event::{apply_budget, CreateEventRequest, Event, UpdateEventRequest},
};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};
use std::sync::Arc;

const EVENT_COLUMNS: &str = "id, name, description, location, start_time, end_time, capacity, \
                             points_remain, points_awarded, published";

/// Event manager service
#[derive(Clone)]
pub struct EventManager {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl EventManager {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>, config: LedgerConfig) -> Self {
        Self { db, clock, config }
    }

    /// Create an unpublished event with its full point budget remaining
    pub async fn create(&self, actor: &Actor, req: CreateEventRequest) -> RewardsResult<Event> {
        actor.require(Role::Manager)?;

        if req.name.trim().is_empty() {
            return Err(RewardsError::Validation("Event name is required".to_string()));
        }
        if req.end_time <= req.start_time {
            return Err(RewardsError::Validation(
                "End time must be after start time".to_string(),
            ));
        }
        if req.start_time < self.clock.now() {
            return Err(RewardsError::Validation(
                "Start time cannot be in the past".to_string(),
            ));
        }
        if let Some(capacity) = req.capacity {
            if capacity <= 0 {
                return Err(RewardsError::Validation(
                    "Capacity must be a positive integer".to_string(),
                ));
            }
        }
        if req.points <= 0 {
            return Err(RewardsError::Validation(
                "Points must be a positive integer".to_string(),
            ));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO event (name, description, location, start_time, end_time, capacity,
                               points_remain, points_awarded, published, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(&req.name)
        .bind(&req.description)
        .bind(&req.location)
        .bind(encode_time(req.start_time))
        .bind(encode_time(req.end_time))
        .bind(req.capacity)
        .bind(req.points)
        .bind(&actor.utorid)
        .bind(encode_time(self.clock.now()))
        .execute(&self.db)
        .await?;

        let id = result.last_insert_rowid();
        tracing::info!(event_id = id, points = req.points, created_by = %actor.utorid, "event created");

        self.get(id).await
    }

    /// Get event with organizers and guests
    pub async fn get(&self, id: i64) -> RewardsResult<Event> {
        let mut conn = self.db.acquire().await?;
        load_event(&mut conn, id).await
    }

    /// Change the guest limit; `None` removes it
    pub async fn set_capacity(
        &self,
        actor: &Actor,
        id: i64,
        capacity: Option<i64>,
    ) -> RewardsResult<Event> {
        actor.require(Role::Manager)?;

        let mut tx = db::begin_write(&self.db).await?;
        apply_capacity(&mut tx, id, capacity).await?;
        let event = load_event(&mut tx, id).await?;
        tx.commit().await?;

        Ok(event)
    }

    /// Publish the event
    pub async fn publish(&self, actor: &Actor, id: i64) -> RewardsResult<Event> {
        actor.require(Role::Manager)?;

        let mut tx = db::begin_write(&self.db).await?;
        apply_publish(&mut tx, id).await?;
        let event = load_event(&mut tx, id).await?;
        tx.commit().await?;

        tracing::info!(event_id = id, published_by = %actor.utorid, "event published");
        Ok(event)
    }

    /// Apply a capacity, budget and publish edit as one unit
    pub async fn update(
        &self,
        actor: &Actor,
        id: i64,
        req: UpdateEventRequest,
    ) -> RewardsResult<Event> {
        actor.require(Role::Manager)?;

        if req.is_empty() {
            return Err(RewardsError::Validation("No fields to update".to_string()));
        }
        if req.published == Some(false) {
            return Err(RewardsError::Validation(
                "Events cannot be unpublished".to_string(),
            ));
        }

        let event = retry_on_conflict(&self.config, "update_event", || {
            self.try_update(id, &req)
        })
        .await?;

        tracing::info!(
            event_id = id,
            capacity = ?event.capacity,
            points_total = event.budget().total(),
            points_remain = event.points_remain,
            published = event.published,
            updated_by = %actor.utorid,
            "event updated"
        );

        Ok(event)
    }

    async fn try_update(&self, id: i64, req: &UpdateEventRequest) -> RewardsResult<Event> {
        let mut tx = db::begin_write(&self.db).await?;

        if let Some(capacity) = req.capacity {
            apply_capacity(&mut tx, id, Some(capacity)).await?;
        }
        if let Some(points) = req.points {
            apply_budget(&mut tx, id, points).await?;
        }
        if req.published == Some(true) {
            apply_publish(&mut tx, id).await?;
        }

        let event = load_event(&mut tx, id).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Delete an unpublished event that has awarded nothing
    pub async fn delete(&self, actor: &Actor, id: i64) -> RewardsResult<()> {
        actor.require(Role::Manager)?;

        retry_on_conflict(&self.config, "delete_event", || self.try_delete(id)).await?;

        tracing::info!(event_id = id, deleted_by = %actor.utorid, "event deleted");
        Ok(())
    }

    async fn try_delete(&self, id: i64) -> RewardsResult<()> {
        let mut tx = db::begin_write(&self.db).await?;
        let event = load_event(&mut tx, id).await?;

        if event.published {
            return Err(RewardsError::State(format!(
                "Event {} is published and cannot be deleted",
                id
            )));
        }
        if event.points_awarded > 0 {
            return Err(RewardsError::State(format!(
                "Event {} has already awarded points",
                id
            )));
        }

        sqlx::query("DELETE FROM event WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Add an organizer; organizers cannot also be guests
    pub async fn add_organizer(
        &self,
        actor: &Actor,
        id: i64,
        account_id: i64,
    ) -> RewardsResult<Event> {
        actor.require(Role::Manager)?;

        retry_on_conflict(&self.config, "add_organizer", || {
            self.try_add_organizer(id, account_id)
        })
        .await?;

        tracing::info!(event_id = id, account_id, "organizer added");
        self.get(id).await
    }

    async fn try_add_organizer(&self, id: i64, account_id: i64) -> RewardsResult<()> {
        let mut tx = db::begin_write(&self.db).await?;
        let event = load_event(&mut tx, id).await?;
        load_account(&mut tx, account_id).await?;

        if event.has_ended(self.clock.now()) {
            return Err(RewardsError::State(format!("Event {} has ended", id)));
        }
        if event.guests.contains(&account_id) {
            return Err(RewardsError::Conflict(format!(
                "Account {} is a guest of event {}",
                account_id, id
            )));
        }

        sqlx::query("INSERT INTO event_organizer (event_id, account_id) VALUES (?, ?)")
            .bind(id)
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| membership_error(e, account_id, id, "an organizer"))?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_organizer(
        &self,
        actor: &Actor,
        id: i64,
        account_id: i64,
    ) -> RewardsResult<Event> {
        actor.require(Role::Manager)?;

        let result = sqlx::query("DELETE FROM event_organizer WHERE event_id = ? AND account_id = ?")
            .bind(id)
            .bind(account_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RewardsError::NotFound(format!(
                "Account {} is not an organizer of event {}",
                account_id, id
            )));
        }

        self.get(id).await
    }

    /// Add a guest, enforcing capacity
    pub async fn add_guest(&self, actor: &Actor, id: i64, account_id: i64) -> RewardsResult<Event> {
        retry_on_conflict(&self.config, "add_guest", || {
            self.try_add_guest(actor, id, account_id)
        })
        .await?;

        tracing::info!(event_id = id, account_id, added_by = %actor.utorid, "guest added");
        self.get(id).await
    }

    async fn try_add_guest(&self, actor: &Actor, id: i64, account_id: i64) -> RewardsResult<()> {
        let mut tx = db::begin_write(&self.db).await?;
        let event = load_event(&mut tx, id).await?;

        if !actor.role.meets(Role::Manager) && !event.organizers.contains(&actor.id) {
            return Err(RewardsError::Authorization(
                "Only managers and event organizers can add guests".to_string(),
            ));
        }

        load_account(&mut tx, account_id).await?;

        if event.has_ended(self.clock.now()) {
            return Err(RewardsError::State(format!("Event {} has ended", id)));
        }
        if event.organizers.contains(&account_id) {
            return Err(RewardsError::Conflict(format!(
                "Account {} is an organizer of event {}",
                account_id, id
            )));
        }
        if event.guests.contains(&account_id) {
            return Err(RewardsError::Conflict(format!(
                "Account {} is already a guest of event {}",
                account_id, id
            )));
        }

        // Capacity is re-checked by the INSERT itself
        let result = sqlx::query(
            r#"
            INSERT INTO event_guest (event_id, account_id)
            SELECT ?1, ?2
            WHERE (SELECT capacity FROM event WHERE id = ?1) IS NULL
               OR (SELECT COUNT(*) FROM event_guest WHERE event_id = ?1)
                  < (SELECT capacity FROM event WHERE id = ?1)
            "#,
        )
        .bind(id)
        .bind(account_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| membership_error(e, account_id, id, "a guest"))?;

        if result.rows_affected() == 0 {
            return Err(RewardsError::InsufficientBudget(format!(
                "Event {} is at capacity",
                id
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_guest(
        &self,
        actor: &Actor,
        id: i64,
        account_id: i64,
    ) -> RewardsResult<Event> {
        actor.require(Role::Manager)?;

        let result = sqlx::query("DELETE FROM event_guest WHERE event_id = ? AND account_id = ?")
            .bind(id)
            .bind(account_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RewardsError::NotFound(format!(
                "Account {} is not a guest of event {}",
                account_id, id
            )));
        }

        self.get(id).await
    }
}

fn membership_error(e: sqlx::Error, account_id: i64, event_id: i64, what: &str) -> RewardsError {
    if db::is_unique_violation(&e) {
        RewardsError::Conflict(format!(
            "Account {} is already {} of event {}",
            account_id, what, event_id
        ))
    } else {
        RewardsError::Database(e)
    }
}

/// Load an event and its membership inside an open transaction
pub(crate) async fn load_event(conn: &mut SqliteConnection, id: i64) -> RewardsResult<Event> {
    let row = sqlx::query(&format!("SELECT {} FROM event WHERE id = ?", EVENT_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Event {} not found", id)))?;

    let organizers: Vec<i64> = sqlx::query_scalar(
        "SELECT account_id FROM event_organizer WHERE event_id = ? ORDER BY account_id",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let guests = guest_ids(conn, id).await?;

    event_from_row(&row, organizers, guests)
}

/// Current guests in id order
pub(crate) async fn guest_ids(conn: &mut SqliteConnection, event_id: i64) -> RewardsResult<Vec<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT account_id FROM event_guest WHERE event_id = ? ORDER BY account_id",
    )
    .bind(event_id)
    .fetch_all(&mut *conn)
    .await?)
}

pub(crate) async fn is_guest(
    conn: &mut SqliteConnection,
    event_id: i64,
    account_id: i64,
) -> RewardsResult<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM event_guest WHERE event_id = ? AND account_id = ?")
            .bind(event_id)
            .bind(account_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(count > 0)
}

pub(crate) async fn is_organizer(
    conn: &mut SqliteConnection,
    event_id: i64,
    account_id: i64,
) -> RewardsResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM event_organizer WHERE event_id = ? AND account_id = ?",
    )
    .bind(event_id)
    .bind(account_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}

/// Set the guest limit unless more guests are already registered
async fn apply_capacity(
    conn: &mut SqliteConnection,
    id: i64,
    capacity: Option<i64>,
) -> RewardsResult<()> {
    if let Some(capacity) = capacity {
        if capacity <= 0 {
            return Err(RewardsError::Validation(
                "Capacity must be a positive integer".to_string(),
            ));
        }
    }

    let result = sqlx::query(
        r#"
        UPDATE event SET capacity = ?1
        WHERE id = ?2
          AND (?1 IS NULL OR (SELECT COUNT(*) FROM event_guest WHERE event_id = ?2) <= ?1)
        "#,
    )
    .bind(capacity)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        // Either missing or too many guests already
        let event = load_event(conn, id).await?;
        return Err(RewardsError::Validation(format!(
            "Event {} already has {} guests",
            id,
            event.guests.len()
        )));
    }

    Ok(())
}

async fn apply_publish(conn: &mut SqliteConnection, id: i64) -> RewardsResult<()> {
    let result = sqlx::query("UPDATE event SET published = 1 WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RewardsError::NotFound(format!("Event {} not found", id)));
    }
    Ok(())
}

fn event_from_row(row: &SqliteRow, organizers: Vec<i64>, guests: Vec<i64>) -> RewardsResult<Event> {
    let start_time: String = row.try_get("start_time")?;
    let end_time: String = row.try_get("end_time")?;

    Ok(Event {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        start_time: decode_time(&start_time)?,
        end_time: decode_time(&end_time)?,
        capacity: row.try_get("capacity")?,
        points_remain: row.try_get("points_remain")?,
        points_awarded: row.try_get("points_awarded")?,
        published: row.try_get("published")?,
        organizers,
        guests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{AccountStore, CreateAccountRequest},
        clock::ManualClock,
    };
    use chrono::{Duration, Utc};

    struct Fixture {
        events: EventManager,
        accounts: AccountStore,
        clock: ManualClock,
        manager: Actor,
    }

    async fn setup() -> Fixture {
        let db = db::in_memory_pool().await.unwrap();
        let clock = ManualClock::new(Utc::now());
        let accounts = AccountStore::new(db.clone());
        let manager = accounts
            .seed("mgr00001", "Manager", "mgr@mail.example.com", Role::Manager)
            .await
            .unwrap();

        Fixture {
            events: EventManager::new(db, Arc::new(clock.clone()), LedgerConfig::default()),
            accounts,
            clock,
            manager: Actor::from(&manager),
        }
    }

    async fn member(f: &Fixture, utorid: &str) -> Actor {
        let account = f
            .accounts
            .create(
                &f.manager,
                CreateAccountRequest {
                    utorid: utorid.to_string(),
                    name: utorid.to_string(),
                    email: format!("{}@mail.example.com", utorid),
                },
            )
            .await
            .unwrap();
        Actor::from(&account)
    }

    fn request(f: &Fixture, capacity: Option<i64>) -> CreateEventRequest {
        let start = f.clock.now() + Duration::days(1);
        CreateEventRequest {
            name: "Career Fair".to_string(),
            description: "Meet employers".to_string(),
            location: "Sidney Smith".to_string(),
            start_time: start,
            end_time: start + Duration::hours(4),
            capacity,
            points: 500,
        }
    }

    #[tokio::test]
    async fn test_create_event() {
        let f = setup().await;
        let event = f.events.create(&f.manager, request(&f, Some(10))).await.unwrap();

        assert_eq!(event.points_remain, 500);
        assert_eq!(event.points_awarded, 0);
        assert!(!event.published);
        assert!(event.guests.is_empty());
    }

    #[tokio::test]
    async fn test_guest_capacity_enforced() {
        let f = setup().await;
        let event = f.events.create(&f.manager, request(&f, Some(1))).await.unwrap();
        let alice = member(&f, "alice001").await;
        let bob = member(&f, "bobby002").await;

        f.events.add_guest(&f.manager, event.id, alice.id).await.unwrap();
        let err = f.events.add_guest(&f.manager, event.id, bob.id).await.unwrap_err();
        assert!(matches!(err, RewardsError::InsufficientBudget(_)));

        let err = f.events.add_guest(&f.manager, event.id, alice.id).await.unwrap_err();
        assert!(matches!(err, RewardsError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_organizer_and_guest_are_exclusive() {
        let f = setup().await;
        let event = f.events.create(&f.manager, request(&f, None)).await.unwrap();
        let alice = member(&f, "alice001").await;
        let bob = member(&f, "bobby002").await;

        f.events.add_organizer(&f.manager, event.id, alice.id).await.unwrap();
        let err = f.events.add_guest(&f.manager, event.id, alice.id).await.unwrap_err();
        assert!(matches!(err, RewardsError::Conflict(_)));

        // Organizers may add guests themselves
        let event = f.events.add_guest(&alice, event.id, bob.id).await.unwrap();
        assert_eq!(event.guests, vec![bob.id]);

        let err = f.events.add_organizer(&f.manager, event.id, bob.id).await.unwrap_err();
        assert!(matches!(err, RewardsError::Conflict(_)));

        // Regular members cannot
        let carol = member(&f, "carol003").await;
        let err = f.events.add_guest(&bob, event.id, carol.id).await.unwrap_err();
        assert!(matches!(err, RewardsError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_capacity_cannot_drop_below_guest_count() {
        let f = setup().await;
        let event = f.events.create(&f.manager, request(&f, Some(5))).await.unwrap();
        let alice = member(&f, "alice001").await;
        let bob = member(&f, "bobby002").await;
        f.events.add_guest(&f.manager, event.id, alice.id).await.unwrap();
        f.events.add_guest(&f.manager, event.id, bob.id).await.unwrap();

        assert!(f.events.set_capacity(&f.manager, event.id, Some(1)).await.is_err());
        let event = f.events.set_capacity(&f.manager, event.id, Some(2)).await.unwrap();
        assert!(event.is_full());
        let event = f.events.set_capacity(&f.manager, event.id, None).await.unwrap();
        assert_eq!(event.capacity, None);
    }

    #[tokio::test]
    async fn test_published_event_cannot_be_deleted() {
        let f = setup().await;
        let draft = f.events.create(&f.manager, request(&f, None)).await.unwrap();
        let live = f.events.create(&f.manager, request(&f, None)).await.unwrap();

        f.events.delete(&f.manager, draft.id).await.unwrap();
        assert!(matches!(f.events.get(draft.id).await, Err(RewardsError::NotFound(_))));

        f.events.publish(&f.manager, live.id).await.unwrap();
        let err = f.events.delete(&f.manager, live.id).await.unwrap_err();
        assert!(matches!(err, RewardsError::State(_)));
    }

    #[tokio::test]
    async fn test_update_applies_all_fields_or_none() {
        let f = setup().await;
        let event = f.events.create(&f.manager, request(&f, None)).await.unwrap();
        {
            let mut conn = f.events.db.acquire().await.unwrap();
            crate::event::reserve_points(&mut conn, event.id, 300).await.unwrap();
        }

        // Budget below what was already awarded sinks the whole edit
        let bad = UpdateEventRequest {
            capacity: Some(10),
            points: Some(100),
            published: Some(true),
        };
        let err = f.events.update(&f.manager, event.id, bad).await.unwrap_err();
        assert!(matches!(err, RewardsError::Validation(_)));

        let unchanged = f.events.get(event.id).await.unwrap();
        assert_eq!(unchanged.capacity, None);
        assert_eq!(unchanged.points_remain, 200);
        assert!(!unchanged.published);

        let good = UpdateEventRequest {
            capacity: Some(10),
            points: Some(400),
            published: Some(true),
        };
        let updated = f.events.update(&f.manager, event.id, good).await.unwrap();
        assert_eq!(updated.capacity, Some(10));
        assert_eq!(updated.points_awarded, 300);
        assert_eq!(updated.points_remain, 100);
        assert!(updated.published);

        let err = f
            .events
            .update(&f.manager, event.id, UpdateEventRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RewardsError::Validation(_)));

        let unpublish = UpdateEventRequest {
            published: Some(false),
            ..Default::default()
        };
        let err = f.events.update(&f.manager, event.id, unpublish).await.unwrap_err();
        assert!(matches!(err, RewardsError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cannot_join_ended_event() {
        let f = setup().await;
        let event = f.events.create(&f.manager, request(&f, None)).await.unwrap();
        let alice = member(&f, "alice001").await;
        f.clock.advance(Duration::days(2));

        let err = f.events.add_guest(&f.manager, event.id, alice.id).await.unwrap_err();
        assert!(matches!(err, RewardsError::State(_)));
    }

    #[tokio::test]
    async fn test_remove_members() {
        let f = setup().await;
        let event = f.events.create(&f.manager, request(&f, None)).await.unwrap();
        let alice = member(&f, "alice001").await;

        f.events.add_guest(&f.manager, event.id, alice.id).await.unwrap();
        let event = f.events.remove_guest(&f.manager, event.id, alice.id).await.unwrap();
        assert!(event.guests.is_empty());

        assert!(matches!(
            f.events.remove_guest(&f.manager, event.id, alice.id).await,
            Err(RewardsError::NotFound(_))
        ));
        assert!(matches!(
            f.events.remove_organizer(&f.manager, event.id, alice.id).await,
            Err(RewardsError::NotFound(_))
        ));
    }
}
