//! Liveness probe route.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;

use crate::api::server::AppState;
use crate::metrics::LivenessStatus;

/// Body of a healthy probe response.
#[derive(Debug, Serialize)]
pub struct HealthzResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<&'static str>,
}

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Returns 200 while the poll loop is making progress and 503 once it has
/// stalled, so the platform restarts the instance.
async fn healthz(State(state): State<AppState>) -> Response {
    let status = state.liveness.evaluate();

    match status {
        LivenessStatus::Booting => Json(HealthzResponse {
            status: "ok",
            detail: Some("worker booting"),
        })
        .into_response(),
        LivenessStatus::Healthy { .. } => Json(HealthzResponse {
            status: "ok",
            detail: None,
        })
        .into_response(),
        LivenessStatus::Unhealthy { .. } => {
            let message = status.message().unwrap_or_default();
            tracing::warn!("{}", message);
            (StatusCode::SERVICE_UNAVAILABLE, message).into_response()
        }
    }
}
