/// Ledger row storage
use crate::{
    db::{decode_time, encode_time},
    error::{RewardsError, RewardsResult},
    ledger::{Transaction, TransactionKind},
};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

const TRANSACTION_SELECT: &str = r#"
    SELECT t.id, t.kind, t.account_id, a.utorid, t.amount, t.spent, t.earned, t.awarded,
           t.related_id, t.suspicious, t.processed, t.processed_by, t.remark,
           t.created_by, t.created_at
    FROM ledger_transaction t
    JOIN account a ON a.id = t.account_id
"#;

/// Row about to be appended
#[derive(Debug, Clone)]
pub(crate) struct NewTransaction<'a> {
    pub kind: TransactionKind,
    pub account_id: i64,
    pub amount: i64,
    pub spent: Option<f64>,
    pub earned: Option<i64>,
    pub awarded: Option<i64>,
    pub related_id: Option<i64>,
    pub suspicious: bool,
    pub processed: Option<bool>,
    pub remark: &'a str,
    pub created_by: &'a str,
    pub created_at: DateTime<Utc>,
}

impl<'a> NewTransaction<'a> {
    /// Bare row of `kind`; callers fill in the kind-specific fields
    pub fn new(
        kind: TransactionKind,
        account_id: i64,
        amount: i64,
        remark: &'a str,
        created_by: &'a str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            account_id,
            amount,
            spent: None,
            earned: None,
            awarded: None,
            related_id: None,
            suspicious: false,
            processed: None,
            remark,
            created_by,
            created_at,
        }
    }
}

pub(crate) async fn insert_transaction(
    conn: &mut SqliteConnection,
    row: &NewTransaction<'_>,
) -> RewardsResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO ledger_transaction
            (kind, account_id, amount, spent, earned, awarded, related_id, suspicious,
             processed, remark, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(row.kind.as_str())
    .bind(row.account_id)
    .bind(row.amount)
    .bind(row.spent)
    .bind(row.earned)
    .bind(row.awarded)
    .bind(row.related_id)
    .bind(row.suspicious)
    .bind(row.processed)
    .bind(row.remark)
    .bind(row.created_by)
    .bind(encode_time(row.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub(crate) async fn link_promotions(
    conn: &mut SqliteConnection,
    transaction_id: i64,
    promotion_ids: &[i64],
) -> RewardsResult<()> {
    for promotion_id in promotion_ids {
        sqlx::query("INSERT INTO transaction_promotion (transaction_id, promotion_id) VALUES (?, ?)")
            .bind(transaction_id)
            .bind(*promotion_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Flip the suspicious flag if it still holds `from`. Purchases keep
/// `earned` in step with what the owner was actually credited.
pub(crate) async fn swap_suspicious(
    conn: &mut SqliteConnection,
    id: i64,
    from: bool,
    to: bool,
) -> RewardsResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ledger_transaction
        SET suspicious = ?1,
            earned = CASE WHEN kind = 'purchase' THEN (CASE WHEN ?1 THEN 0 ELSE amount END)
                          ELSE earned END
        WHERE id = ?2 AND suspicious = ?3
        "#,
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// One-way `processed` transition, guarded against a concurrent processor
pub(crate) async fn mark_processed(
    conn: &mut SqliteConnection,
    id: i64,
    processed_by: &str,
) -> RewardsResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ledger_transaction
        SET processed = 1, processed_by = ?1
        WHERE id = ?2 AND kind = 'redemption' AND processed = 0
        "#,
    )
    .bind(processed_by)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn load_transaction(
    conn: &mut SqliteConnection,
    id: i64,
) -> RewardsResult<Transaction> {
    let row = sqlx::query(&format!("{} WHERE t.id = ?", TRANSACTION_SELECT))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RewardsError::NotFound(format!("Transaction {} not found", id)))?;

    let promotion_ids = promotion_ids(conn, id).await?;
    transaction_from_row(&row, promotion_ids)
}

/// Newest first
pub(crate) async fn list_for_account(
    conn: &mut SqliteConnection,
    account_id: i64,
) -> RewardsResult<Vec<Transaction>> {
    let rows = sqlx::query(&format!(
        "{} WHERE t.account_id = ? ORDER BY t.id DESC",
        TRANSACTION_SELECT
    ))
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut transactions = Vec::with_capacity(rows.len());
    for row in &rows {
        let id: i64 = row.try_get("id")?;
        let promotion_ids = promotion_ids(conn, id).await?;
        transactions.push(transaction_from_row(row, promotion_ids)?);
    }
    Ok(transactions)
}

async fn promotion_ids(conn: &mut SqliteConnection, transaction_id: i64) -> RewardsResult<Vec<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT promotion_id FROM transaction_promotion WHERE transaction_id = ? ORDER BY promotion_id",
    )
    .bind(transaction_id)
    .fetch_all(&mut *conn)
    .await?)
}

fn transaction_from_row(row: &SqliteRow, promotion_ids: Vec<i64>) -> RewardsResult<Transaction> {
    let kind: String = row.try_get("kind")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        kind: TransactionKind::from_str(&kind)?,
        account_id: row.try_get("account_id")?,
        utorid: row.try_get("utorid")?,
        amount: row.try_get("amount")?,
        spent: row.try_get("spent")?,
        earned: row.try_get("earned")?,
        awarded: row.try_get("awarded")?,
        related_id: row.try_get("related_id")?,
        suspicious: row.try_get("suspicious")?,
        processed: row.try_get("processed")?,
        processed_by: row.try_get("processed_by")?,
        remark: row.try_get("remark")?,
        created_by: row.try_get("created_by")?,
        created_at: decode_time(&created_at)?,
        promotion_ids,
    })
}
