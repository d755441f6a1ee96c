/// Transaction endpoints
use crate::{
    account::Role,
    auth::ActorContext,
    context::AppContext,
    error::{RewardsError, RewardsResult},
    ledger::{AdjustmentRequest, PurchaseRequest, Transaction, TransactionKind},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;

/// Build transaction routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/transactions", post(create_transaction))
        .route("/transactions/:id", get(get_transaction))
        .route("/transactions/:id/suspicious", patch(set_suspicious))
        .route("/transactions/:id/processed", patch(set_processed))
}

/// Purchase or adjustment submitted by staff
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransactionBody {
    #[serde(rename = "type")]
    kind: TransactionKind,
    utorid: String,
    spent: Option<f64>,
    amount: Option<i64>,
    related_id: Option<i64>,
    #[serde(default)]
    promotion_ids: Vec<i64>,
    #[serde(default)]
    remark: String,
}

#[derive(Debug, Deserialize)]
struct SuspiciousBody {
    suspicious: bool,
}

#[derive(Debug, Deserialize)]
struct ProcessedBody {
    processed: bool,
}

async fn create_transaction(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Json(body): Json<CreateTransactionBody>,
) -> RewardsResult<(StatusCode, Json<Transaction>)> {
    // Checked before the utorid lookup
    auth.actor.require(Role::Cashier)?;
    let account = ctx.accounts.get_by_utorid(&body.utorid).await?;

    let txn = match body.kind {
        TransactionKind::Purchase => {
            let spent = body
                .spent
                .ok_or_else(|| RewardsError::Validation("spent is required".to_string()))?;
            ctx.ledger
                .purchase(
                    &auth.actor,
                    PurchaseRequest {
                        account_id: account.id,
                        spent,
                        promotion_ids: body.promotion_ids,
                        remark: body.remark,
                    },
                )
                .await?
        }
        TransactionKind::Adjustment => {
            let amount = body
                .amount
                .ok_or_else(|| RewardsError::Validation("amount is required".to_string()))?;
            let related_id = body
                .related_id
                .ok_or_else(|| RewardsError::Validation("relatedId is required".to_string()))?;
            ctx.ledger
                .adjustment(
                    &auth.actor,
                    AdjustmentRequest {
                        account_id: account.id,
                        amount,
                        related_id,
                        remark: body.remark,
                    },
                )
                .await?
        }
        other => {
            return Err(RewardsError::Validation(format!(
                "{} transactions cannot be created here",
                other.as_str()
            )))
        }
    };

    Ok((StatusCode::CREATED, Json(txn)))
}

async fn get_transaction(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
) -> RewardsResult<Json<Transaction>> {
    let txn = ctx.ledger.get(id).await?;
    auth.require_self_or(txn.account_id, Role::Manager)?;
    Ok(Json(txn))
}

async fn set_suspicious(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
    Json(body): Json<SuspiciousBody>,
) -> RewardsResult<Json<Transaction>> {
    Ok(Json(
        ctx.ledger
            .set_suspicious(&auth.actor, id, body.suspicious)
            .await?,
    ))
}

async fn set_processed(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
    Json(body): Json<ProcessedBody>,
) -> RewardsResult<Json<Transaction>> {
    if !body.processed {
        return Err(RewardsError::Validation(
            "processed can only be set to true".to_string(),
        ));
    }

    Ok(Json(ctx.redemptions.process(&auth.actor, id).await?))
}
