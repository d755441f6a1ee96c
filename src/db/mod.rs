/// Database layer for the rewards ledger
///
/// Manages the SQLite connection pool, embedded migrations, and the bounded
/// retry used when concurrent writers collide.

use crate::{
    config::LedgerConfig,
    error::{RewardsError, RewardsResult},
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::future::Future;
use std::path::Path;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> RewardsResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(if options.enable_wal {
                    SqliteJournalMode::Wal
                } else {
                    SqliteJournalMode::Delete
                })
                .foreign_keys(true)
                .busy_timeout(std::time::Duration::from_secs(5)),
        )
        .await?;

    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
///
/// Every connection to `:memory:` is its own database, so the pool is pinned
/// to one connection that never expires.
pub async fn in_memory_pool() -> RewardsResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(
            SqliteConnectOptions::new()
                .in_memory(true)
                .foreign_keys(true),
        )
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run migrations for a database
/// Migrations are embedded at compile time from ./migrations directory
pub async fn run_migrations(pool: &SqlitePool) -> RewardsResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| RewardsError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> RewardsResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Open a transaction that holds the write lock from its first statement.
///
/// A deferred transaction that reads and then writes fails with
/// BUSY_SNAPSHOT when another writer commits in between, and the busy
/// timeout does not apply to that case. `BEGIN IMMEDIATE` makes competing
/// writers queue on the busy timeout instead.
pub async fn begin_write(pool: &SqlitePool) -> RewardsResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Whether the error is SQLite reporting a competing writer
/// (BUSY, LOCKED and their extended codes).
pub fn is_write_conflict(err: &RewardsError) -> bool {
    match err {
        RewardsError::Database(sqlx::Error::Database(db_err)) => matches!(
            db_err.code().as_deref(),
            Some("5") | Some("6") | Some("261") | Some("262") | Some("517")
        ),
        _ => false,
    }
}

/// Whether the error is a UNIQUE / PRIMARY KEY violation
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// attempt budget is spent. Each attempt must open its own transaction.
pub async fn retry_on_conflict<T, F, Fut>(
    config: &LedgerConfig,
    operation: &str,
    mut op: F,
) -> RewardsResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RewardsResult<T>>,
{
    let attempts = config.max_retries.max(1);

    for attempt in 1..=attempts {
        match op().await {
            Err(e) if is_write_conflict(&e) => {
                tracing::debug!(operation, attempt, "storage conflict, retrying: {}", e);
                if attempt < attempts {
                    tokio::time::sleep(config.retry_backoff() * attempt).await;
                }
            }
            other => return other,
        }
    }

    tracing::warn!(operation, attempts, "giving up after repeated storage conflicts");
    Err(RewardsError::Transient { attempts })
}

/// Timestamps are stored as RFC 3339 text
pub fn encode_time(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339()
}

pub fn decode_time(raw: &str) -> RewardsResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RewardsError::Internal(format!("Invalid timestamp: {}", e)))
}
