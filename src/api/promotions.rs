/// Promotion endpoints
use crate::{
    account::Role,
    auth::ActorContext,
    context::AppContext,
    error::RewardsResult,
    promotion::{CreatePromotionRequest, Promotion, UpdatePromotionRequest},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

/// Build promotion routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/promotions", get(list_promotions).post(create_promotion))
        .route(
            "/promotions/:id",
            get(get_promotion)
                .patch(update_promotion)
                .delete(delete_promotion),
        )
}

async fn create_promotion(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Json(req): Json<CreatePromotionRequest>,
) -> RewardsResult<(StatusCode, Json<Promotion>)> {
    let promotion = ctx.promotions.create(&auth.actor, req).await?;
    Ok((StatusCode::CREATED, Json(promotion)))
}

/// Staff see every active promotion; members see the ones they can still use
async fn list_promotions(
    State(ctx): State<AppContext>,
    auth: ActorContext,
) -> RewardsResult<Json<Vec<Promotion>>> {
    let promotions = if auth.actor.role.meets(Role::Cashier) {
        ctx.promotions.list_active().await?
    } else {
        ctx.promotions.list_available_for(auth.actor.id).await?
    };
    Ok(Json(promotions))
}

async fn get_promotion(
    State(ctx): State<AppContext>,
    _auth: ActorContext,
    Path(id): Path<i64>,
) -> RewardsResult<Json<Promotion>> {
    Ok(Json(ctx.promotions.get(id).await?))
}

async fn update_promotion(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
    Json(patch): Json<UpdatePromotionRequest>,
) -> RewardsResult<Json<Promotion>> {
    Ok(Json(ctx.promotions.update(&auth.actor, id, patch).await?))
}

async fn delete_promotion(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
) -> RewardsResult<StatusCode> {
    ctx.promotions.delete(&auth.actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
