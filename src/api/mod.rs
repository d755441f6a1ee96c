/// API routes and handlers
pub mod events;
pub mod middleware;
pub mod promotions;
pub mod transactions;
pub mod users;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(users::routes())
        .merge(transactions::routes())
        .merge(promotions::routes())
        .merge(events::routes())
}
