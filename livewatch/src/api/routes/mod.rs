//! API route modules.

pub mod health;

use axum::Router;

use crate::api::server::AppState;

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new().merge(health::router()).with_state(state)
}
