/// Account store implementation using runtime queries
use crate::{
    account::{Account, Actor, CreateAccountRequest, Role, UpdateAccountRequest},
    db::{self, decode_time, encode_time},
    error::{RewardsError, RewardsResult},
};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

const ACCOUNT_COLUMNS: &str =
    "id, utorid, name, email, role, points, verified, suspicious, created_at";

/// Account store service
#[derive(Clone)]
pub struct AccountStore {
    db: SqlitePool,
}

impl AccountStore {
    /// Create a new account store
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Register a new regular account
    pub async fn create(&self, actor: &Actor, req: CreateAccountRequest) -> RewardsResult<Account> {
        actor.require(Role::Cashier)?;

        validate_utorid(&req.utorid)?;
        validate_name(&req.name)?;
        validate_email(&req.email)?;

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO account (utorid, name, email, role, points, verified, suspicious, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, 0, 0, ?5)",
        )
        .bind(&req.utorid)
        .bind(&req.name)
        .bind(&req.email)
        .bind(Role::Regular.as_str())
        .bind(encode_time(now))
        .execute(&self.db)
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                RewardsError::Conflict(format!("Account {} already exists", req.utorid))
            } else {
                RewardsError::Database(e)
            }
        })?;

        tracing::info!(utorid = %req.utorid, created_by = %actor.utorid, "account created");

        Ok(Account {
            id: result.last_insert_rowid(),
            utorid: req.utorid,
            name: req.name,
            email: req.email,
            role: Role::Regular,
            points: 0,
            verified: false,
            suspicious: false,
            created_at: now,
        })
    }

    /// Get account by id
    pub async fn get(&self, id: i64) -> RewardsResult<Account> {
        let mut conn = self.db.acquire().await?;
        load_account(&mut conn, id).await
    }

    /// Get account by utorid
    pub async fn get_by_utorid(&self, utorid: &str) -> RewardsResult<Account> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM account WHERE utorid = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(utorid)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Account {} not found", utorid)))?;

        account_from_row(&row)
    }

    /// Current point balance
    pub async fn get_balance(&self, id: i64) -> RewardsResult<i64> {
        sqlx::query_scalar("SELECT points FROM account WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| RewardsError::NotFound(format!("Account {} not found", id)))
    }

    /// Whether purchases processed by this account are suppressed
    pub async fn is_suspicious(&self, id: i64) -> RewardsResult<bool> {
        Ok(self.get(id).await?.is_suspicious_cashier())
    }

    /// Update verification, suspicion and role flags
    ///
    /// Managers may verify, flag cashiers, and move accounts between regular
    /// and cashier. Granting manager or superuser, or changing the role of a
    /// manager-level account, needs a superuser.
    pub async fn update(
        &self,
        actor: &Actor,
        id: i64,
        req: UpdateAccountRequest,
    ) -> RewardsResult<Account> {
        actor.require(Role::Manager)?;

        if req.verified.is_none() && req.suspicious.is_none() && req.role.is_none() {
            return Err(RewardsError::Validation("No fields to update".to_string()));
        }

        if req.verified == Some(false) {
            return Err(RewardsError::Validation(
                "Verification cannot be revoked".to_string(),
            ));
        }

        if let Some(role) = req.role {
            if role.meets(Role::Manager) {
                actor.require(Role::Superuser)?;
            }
        }

        let mut tx = db::begin_write(&self.db).await?;
        let mut account = load_account(&mut tx, id).await?;

        if let Some(verified) = req.verified {
            account.verified = verified;
        }

        if let Some(role) = req.role {
            // Only a superuser may change the role of manager-level accounts
            if account.role.meets(Role::Manager) {
                actor.require(Role::Superuser)?;
            }
            // Fresh cashiers start trusted
            if role == Role::Cashier && account.role != Role::Cashier {
                account.suspicious = false;
            }
            account.role = role;
        }

        if let Some(suspicious) = req.suspicious {
            if account.role != Role::Cashier && suspicious {
                return Err(RewardsError::Validation(
                    "Only cashiers can be flagged suspicious".to_string(),
                ));
            }
            account.suspicious = suspicious;
        }

        sqlx::query("UPDATE account SET verified = ?1, suspicious = ?2, role = ?3 WHERE id = ?4")
            .bind(account.verified)
            .bind(account.suspicious)
            .bind(account.role.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            utorid = %account.utorid,
            role = account.role.as_str(),
            verified = account.verified,
            suspicious = account.suspicious,
            updated_by = %actor.utorid,
            "account updated"
        );

        Ok(account)
    }

    /// List all accounts ordered by id
    pub async fn list(&self) -> RewardsResult<Vec<Account>> {
        let rows = sqlx::query(&format!("SELECT {} FROM account ORDER BY id", ACCOUNT_COLUMNS))
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(account_from_row).collect()
    }

    /// Bootstrap an account with an arbitrary role, bypassing actor checks.
    /// Used to seed the first superuser.
    pub async fn seed(
        &self,
        utorid: &str,
        name: &str,
        email: &str,
        role: Role,
    ) -> RewardsResult<Account> {
        validate_utorid(utorid)?;
        validate_email(email)?;

        let result = sqlx::query(
            "INSERT INTO account (utorid, name, email, role, points, verified, suspicious, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, 1, 0, ?5)",
        )
        .bind(utorid)
        .bind(name)
        .bind(email)
        .bind(role.as_str())
        .bind(encode_time(Utc::now()))
        .execute(&self.db)
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                RewardsError::Conflict(format!("Account {} already exists", utorid))
            } else {
                RewardsError::Database(e)
            }
        })?;

        self.get(result.last_insert_rowid()).await
    }
}

/// Load an account inside an open transaction
pub(crate) async fn load_account(conn: &mut SqliteConnection, id: i64) -> RewardsResult<Account> {
    let row = sqlx::query(&format!("SELECT {} FROM account WHERE id = ?1", ACCOUNT_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Account {} not found", id)))?;

    account_from_row(&row)
}

/// Add a signed delta to a balance. May leave the balance negative.
pub(crate) async fn apply_delta(
    conn: &mut SqliteConnection,
    id: i64,
    delta: i64,
) -> RewardsResult<i64> {
    sqlx::query_scalar("UPDATE account SET points = points + ?1 WHERE id = ?2 RETURNING points")
        .bind(delta)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Account {} not found", id)))
}

/// Add a signed delta, flooring the resulting balance at zero
pub(crate) async fn apply_delta_floored(
    conn: &mut SqliteConnection,
    id: i64,
    delta: i64,
) -> RewardsResult<i64> {
    sqlx::query_scalar(
        "UPDATE account SET points = MAX(0, points + ?1) WHERE id = ?2 RETURNING points",
    )
    .bind(delta)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| RewardsError::NotFound(format!("Account {} not found", id)))
}

/// Subtract `amount` only if the balance covers it.
///
/// The guard lives in the UPDATE so two writers cannot both pass a stale
/// balance check.
pub(crate) async fn debit_if_covered(
    conn: &mut SqliteConnection,
    id: i64,
    amount: i64,
) -> RewardsResult<i64> {
    let updated: Option<i64> = sqlx::query_scalar(
        "UPDATE account SET points = points - ?1 WHERE id = ?2 AND points >= ?1 RETURNING points",
    )
    .bind(amount)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match updated {
        Some(points) => Ok(points),
        None => {
            let account = load_account(conn, id).await?;
            Err(RewardsError::InsufficientBalance {
                requested: amount,
                available: account.points,
            })
        }
    }
}

fn account_from_row(row: &SqliteRow) -> RewardsResult<Account> {
    let role: String = row.try_get("role")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Account {
        id: row.try_get("id")?,
        utorid: row.try_get("utorid")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: Role::from_str(&role)?,
        points: row.try_get("points")?,
        verified: row.try_get("verified")?,
        suspicious: row.try_get("suspicious")?,
        created_at: decode_time(&created_at)?,
    })
}

/// Validate utorid format
fn validate_utorid(utorid: &str) -> RewardsResult<()> {
    if utorid.len() < 7 || utorid.len() > 8 {
        return Err(RewardsError::Validation(
            "utorid must be 7 or 8 characters".to_string(),
        ));
    }

    if !utorid.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RewardsError::Validation(
            "utorid must be alphanumeric".to_string(),
        ));
    }

    Ok(())
}

fn validate_name(name: &str) -> RewardsResult<()> {
    let len = name.trim().chars().count();
    if len == 0 || len > 50 {
        return Err(RewardsError::Validation(
            "Name must be between 1 and 50 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate email format
fn validate_email(email: &str) -> RewardsResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(RewardsError::Validation("Invalid email format".to_string())),
    }
}
