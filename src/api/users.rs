/// Account endpoints, plus the transfer and redemption routes that hang off them
use crate::{
    account::{Account, CreateAccountRequest, Role, UpdateAccountRequest},
    auth::ActorContext,
    context::AppContext,
    error::{RewardsError, RewardsResult},
    ledger::{RedemptionRequest, Transaction, TransferReceipt, TransferRequest},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build user routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/me", get(get_me))
        .route("/users/me/transactions", post(create_redemption))
        .route("/users/:id", get(get_user).patch(update_user))
        .route(
            "/users/:id/transactions",
            post(create_transfer).get(list_user_transactions),
        )
}

/// Body of a transfer or redemption request
#[derive(Debug, Deserialize)]
struct PointsBody {
    #[serde(rename = "type")]
    kind: String,
    amount: i64,
    #[serde(default)]
    remark: String,
}

impl PointsBody {
    fn expect_kind(&self, expected: &str) -> RewardsResult<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(RewardsError::Validation(format!(
                "Expected a {} transaction, got {}",
                expected, self.kind
            )))
        }
    }
}

async fn create_user(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Json(req): Json<CreateAccountRequest>,
) -> RewardsResult<(StatusCode, Json<Account>)> {
    let account = ctx.accounts.create(&auth.actor, req).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_me(auth: ActorContext) -> Json<Account> {
    Json(auth.account)
}

async fn get_user(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
) -> RewardsResult<Json<Account>> {
    auth.require_self_or(id, Role::Cashier)?;
    Ok(Json(ctx.accounts.get(id).await?))
}

async fn update_user(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAccountRequest>,
) -> RewardsResult<Json<Account>> {
    Ok(Json(ctx.accounts.update(&auth.actor, id, req).await?))
}

/// Transfer from the caller to account `id`
async fn create_transfer(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
    Json(body): Json<PointsBody>,
) -> RewardsResult<(StatusCode, Json<TransferReceipt>)> {
    body.expect_kind("transfer")?;

    let receipt = ctx
        .ledger
        .transfer(
            &auth.actor,
            TransferRequest {
                recipient_id: id,
                amount: body.amount,
                remark: body.remark,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn create_redemption(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Json(body): Json<PointsBody>,
) -> RewardsResult<(StatusCode, Json<Transaction>)> {
    body.expect_kind("redemption")?;

    let txn = ctx
        .ledger
        .redemption(
            &auth.actor,
            RedemptionRequest {
                amount: body.amount,
                remark: body.remark,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(txn)))
}

async fn list_user_transactions(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
) -> RewardsResult<Json<Vec<Transaction>>> {
    auth.require_self_or(id, Role::Manager)?;
    Ok(Json(ctx.ledger.list_for_account(id).await?))
}
