/// Event endpoints: lifecycle, membership and point awards
use crate::{
    auth::ActorContext,
    context::AppContext,
    error::{RewardsError, RewardsResult},
    event::{CreateEventRequest, Event, UpdateEventRequest},
    ledger::{AwardTarget, EventAwardRequest, Transaction},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build event routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/events", post(create_event))
        .route(
            "/events/:id",
            get(get_event)
                .patch(update_event)
                .delete(delete_event),
        )
        .route("/events/:id/organizers", post(add_organizer))
        .route("/events/:id/organizers/:user_id", delete(remove_organizer))
        .route("/events/:id/guests", post(add_guest))
        .route("/events/:id/guests/:user_id", delete(remove_guest))
        .route("/events/:id/transactions", post(award_points))
}

#[derive(Debug, Deserialize)]
struct MemberBody {
    utorid: String,
}

/// Award body; no utorid means every guest
#[derive(Debug, Deserialize)]
struct AwardBody {
    #[serde(rename = "type")]
    kind: String,
    utorid: Option<String>,
    amount: i64,
    #[serde(default)]
    remark: String,
}

async fn create_event(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Json(req): Json<CreateEventRequest>,
) -> RewardsResult<(StatusCode, Json<Event>)> {
    let event = ctx.events.create(&auth.actor, req).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_event(
    State(ctx): State<AppContext>,
    _auth: ActorContext,
    Path(id): Path<i64>,
) -> RewardsResult<Json<Event>> {
    Ok(Json(ctx.events.get(id).await?))
}

async fn update_event(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
    Json(req): Json<UpdateEventRequest>,
) -> RewardsResult<Json<Event>> {
    Ok(Json(ctx.events.update(&auth.actor, id, req).await?))
}

async fn delete_event(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
) -> RewardsResult<StatusCode> {
    ctx.events.delete(&auth.actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_organizer(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
    Json(body): Json<MemberBody>,
) -> RewardsResult<(StatusCode, Json<Event>)> {
    let account = ctx.accounts.get_by_utorid(&body.utorid).await?;
    let event = ctx.events.add_organizer(&auth.actor, id, account.id).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn remove_organizer(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path((id, user_id)): Path<(i64, i64)>,
) -> RewardsResult<StatusCode> {
    ctx.events.remove_organizer(&auth.actor, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_guest(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
    Json(body): Json<MemberBody>,
) -> RewardsResult<(StatusCode, Json<Event>)> {
    let account = ctx.accounts.get_by_utorid(&body.utorid).await?;
    let event = ctx.events.add_guest(&auth.actor, id, account.id).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn remove_guest(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path((id, user_id)): Path<(i64, i64)>,
) -> RewardsResult<StatusCode> {
    ctx.events.remove_guest(&auth.actor, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn award_points(
    State(ctx): State<AppContext>,
    auth: ActorContext,
    Path(id): Path<i64>,
    Json(body): Json<AwardBody>,
) -> RewardsResult<(StatusCode, Json<Vec<Transaction>>)> {
    if body.kind != "event" {
        return Err(RewardsError::Validation(format!(
            "Expected an event transaction, got {}",
            body.kind
        )));
    }

    let target = match &body.utorid {
        Some(utorid) => AwardTarget::Guest(ctx.accounts.get_by_utorid(utorid).await?.id),
        None => AwardTarget::AllGuests,
    };

    let txns = ctx
        .ledger
        .award_event_points(
            &auth.actor,
            EventAwardRequest {
                event_id: id,
                target,
                amount: body.amount,
                remark: body.remark,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(txns)))
}
