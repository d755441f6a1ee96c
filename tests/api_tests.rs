/// HTTP-level tests driving the router in-process
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use campus_rewards::{
    account::Role,
    clock::SystemClock,
    config::ServerConfig,
    context::AppContext,
    db,
    server::build_router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "test-secret-key-for-testing-only-0123";

async fn setup_with(config: ServerConfig) -> (Router, AppContext) {
    let pool = db::in_memory_pool().await.unwrap();
    let ctx = AppContext::with_pool(config, pool, Arc::new(SystemClock));

    ctx.accounts
        .seed("super001", "Super", "super@mail.example.com", Role::Superuser)
        .await
        .unwrap();
    ctx.accounts
        .seed("mgr00001", "Manager", "mgr@mail.example.com", Role::Manager)
        .await
        .unwrap();
    ctx.accounts
        .seed("cash0001", "Cashier", "cash@mail.example.com", Role::Cashier)
        .await
        .unwrap();

    (build_router(ctx.clone()), ctx)
}

async fn setup() -> (Router, AppContext) {
    setup_with(ServerConfig::with_database(":memory:", SECRET)).await
}

fn token_for(utorid: &str) -> String {
    let claims = json!({
        "sub": utorid,
        "exp": (Utc::now() + Duration::hours(1)).timestamp(),
    });
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    utorid: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(utorid) = utorid {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(utorid)));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Register `utorid` through the API and verify it
async fn register(app: &Router, utorid: &str) -> i64 {
    let (status, body) = send(
        app,
        Method::POST,
        "/users",
        Some("cash0001"),
        Some(json!({
            "utorid": utorid,
            "name": utorid,
            "email": format!("{}@mail.example.com", utorid),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_i64().unwrap();

    let (status, _) = send(
        app,
        Method::PATCH,
        &format!("/users/{}", id),
        Some("mgr00001"),
        Some(json!({ "verified": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    id
}

async fn buy(app: &Router, utorid: &str, spent: f64) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/transactions",
        Some("cash0001"),
        Some(json!({ "type": "purchase", "utorid": utorid, "spent": spent })),
    )
    .await
}

#[tokio::test]
async fn test_health_check() {
    let (app, _ctx) = setup().await;
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (app, _ctx) = setup().await;
    let (status, body) = send(&app, Method::GET, "/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn test_missing_or_forged_token_is_unauthorized() {
    let (app, _ctx) = setup().await;

    let (status, body) = send(&app, Method::GET, "/users/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AuthenticationRequired");

    let forged = encode(
        &Header::default(),
        &json!({ "sub": "super001", "exp": (Utc::now() + Duration::hours(1)).timestamp() }),
        &EncodingKey::from_secret(b"some-other-secret-that-is-long-enough"),
    )
    .unwrap();
    let request = Request::builder()
        .uri("/users/me")
        .header(header::AUTHORIZATION, format!("Bearer {}", forged))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_purchase_then_balance() {
    let (app, _ctx) = setup().await;
    register(&app, "alice001").await;

    let (status, txn) = buy(&app, "alice001", 20.0).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(txn["type"], "purchase");
    assert_eq!(txn["amount"], 80);
    assert_eq!(txn["createdBy"], "cash0001");

    let (status, me) = send(&app, Method::GET, "/users/me", Some("alice001"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["points"], 80);
}

#[tokio::test]
async fn test_regular_user_cannot_record_purchase() {
    let (app, _ctx) = setup().await;
    register(&app, "alice001").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/transactions",
        Some("alice001"),
        Some(json!({ "type": "purchase", "utorid": "alice001", "spent": 100.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Forbidden");
}

#[tokio::test]
async fn test_transfer_and_insufficient_balance() {
    let (app, _ctx) = setup().await;
    register(&app, "alice001").await;
    let bob = register(&app, "bobby002").await;
    buy(&app, "alice001", 25.0).await;

    let uri = format!("/users/{}/transactions", bob);
    let (status, receipt) = send(
        &app,
        Method::POST,
        &uri,
        Some("alice001"),
        Some(json!({ "type": "transfer", "amount": 60 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["sent"]["amount"], -60);
    assert_eq!(receipt["received"]["amount"], 60);

    let (status, body) = send(
        &app,
        Method::POST,
        &uri,
        Some("alice001"),
        Some(json!({ "type": "transfer", "amount": 41 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InsufficientBalance");

    let (_, bob_view) = send(&app, Method::GET, "/users/me", Some("bobby002"), None).await;
    assert_eq!(bob_view["points"], 60);
}

#[tokio::test]
async fn test_redemption_lifecycle() {
    let (app, _ctx) = setup().await;
    let alice = register(&app, "alice001").await;
    buy(&app, "alice001", 25.0).await;

    let (status, pending) = send(
        &app,
        Method::POST,
        "/users/me/transactions",
        Some("alice001"),
        Some(json!({ "type": "redemption", "amount": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(pending["processed"], false);
    let id = pending["id"].as_i64().unwrap();

    let uri = format!("/transactions/{}/processed", id);
    let (status, _) = send(
        &app,
        Method::PATCH,
        &uri,
        Some("alice001"),
        Some(json!({ "processed": true })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, done) = send(
        &app,
        Method::PATCH,
        &uri,
        Some("cash0001"),
        Some(json!({ "processed": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["processed"], true);
    assert_eq!(done["processedBy"], "cash0001");

    let (status, body) = send(
        &app,
        Method::PATCH,
        &uri,
        Some("cash0001"),
        Some(json!({ "processed": true })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "InvalidState");

    let (_, history) = send(
        &app,
        Method::GET,
        &format!("/users/{}/transactions", alice),
        Some("alice001"),
        None,
    )
    .await;
    assert_eq!(history.as_array().unwrap().len(), 2);
    let (_, me) = send(&app, Method::GET, "/users/me", Some("alice001"), None).await;
    assert_eq!(me["points"], 70);
}

#[tokio::test]
async fn test_event_award_over_http() {
    let (app, _ctx) = setup().await;
    register(&app, "guest001").await;
    register(&app, "guest002").await;

    let start = Utc::now() + Duration::days(2);
    let (status, event) = send(
        &app,
        Method::POST,
        "/events",
        Some("mgr00001"),
        Some(json!({
            "name": "Career Fair",
            "location": "Bahen Centre",
            "startTime": start,
            "endTime": start + Duration::hours(4),
            "points": 50,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let event_id = event["id"].as_i64().unwrap();

    for guest in ["guest001", "guest002"] {
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/events/{}/guests", event_id),
            Some("mgr00001"),
            Some(json!({ "utorid": guest })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let award_uri = format!("/events/{}/transactions", event_id);
    let (status, body) = send(
        &app,
        Method::POST,
        &award_uri,
        Some("mgr00001"),
        Some(json!({ "type": "event", "amount": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InsufficientBudget");

    let (status, awards) = send(
        &app,
        Method::POST,
        &award_uri,
        Some("mgr00001"),
        Some(json!({ "type": "event", "amount": 20 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(awards.as_array().unwrap().len(), 2);

    let (_, event) = send(
        &app,
        Method::GET,
        &format!("/events/{}", event_id),
        Some("guest001"),
        None,
    )
    .await;
    assert_eq!(event["pointsRemain"], 10);
    assert_eq!(event["pointsAwarded"], 40);
}

#[tokio::test]
async fn test_rate_limit_rejects_with_retry_after() {
    let mut config = ServerConfig::with_database(":memory:", SECRET);
    config.rate_limit.requests_per_minute = 2;
    let (app, _ctx) = setup_with(config).await;

    for _ in 0..2 {
        let (status, _) = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
}

#[tokio::test]
async fn test_rejected_event_edit_changes_nothing() {
    let (app, _ctx) = setup().await;
    register(&app, "guest001").await;

    let start = Utc::now() + Duration::days(3);
    let (_, event) = send(
        &app,
        Method::POST,
        "/events",
        Some("mgr00001"),
        Some(json!({
            "name": "Study Jam",
            "location": "Robarts",
            "startTime": start,
            "endTime": start + Duration::hours(2),
            "points": 50,
        })),
    )
    .await;
    let event_id = event["id"].as_i64().unwrap();
    let uri = format!("/events/{}", event_id);

    send(
        &app,
        Method::POST,
        &format!("/events/{}/guests", event_id),
        Some("mgr00001"),
        Some(json!({ "utorid": "guest001" })),
    )
    .await;
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/events/{}/transactions", event_id),
        Some("mgr00001"),
        Some(json!({ "type": "event", "utorid": "guest001", "amount": 20 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        Method::PATCH,
        &uri,
        Some("mgr00001"),
        Some(json!({ "capacity": 5, "points": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidRequest");

    let (_, after) = send(&app, Method::GET, &uri, Some("mgr00001"), None).await;
    assert_eq!(after["capacity"], Value::Null);
    assert_eq!(after["pointsRemain"], 30);

    let (status, after) = send(
        &app,
        Method::PATCH,
        &uri,
        Some("mgr00001"),
        Some(json!({ "capacity": 5, "points": 60 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["capacity"], 5);
    assert_eq!(after["pointsRemain"], 40);
}
