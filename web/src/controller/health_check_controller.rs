use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    /// Number of websocket connections currently registered with the broker.
    pub connections: usize,
}

/// GET liveness of the notification server
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is up and accepting websocket connections", body = HealthStatus),
        (status = 500, description = "Internal Server Error")
    )
)]
pub async fn health_check(State(app_state): State<AppState>) -> impl IntoResponse {
    let health = HealthStatus {
        status: "healthy".to_string(),
        connections: app_state.stomp_manager_ref().connection_count(),
    };
    (StatusCode::OK, Json(health))
}
