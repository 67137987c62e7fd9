use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.metrics.snapshot();
    let online = state.hub.online_users().await;

    let status = match &online {
        Ok(_) if metrics.errors.websocket == 0 => "healthy",
        _ => "degraded",
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        online_users: online.map(|users| users.len() as u64).unwrap_or(0),
        connections: metrics.connections.active,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - returns 200 if the database and presence hub are reachable
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let db_ok = state.db.pool.acquire().await.is_ok();
    let hub_ok = state.hub.online_users().await.is_ok();

    if db_ok && hub_ok {
        Json(serde_json::json!({
            "status": "ready",
            "database": "connected",
            "presence": "running"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": if db_ok { "connected" } else { "disconnected" },
                "presence": if hub_ok { "running" } else { "stopped" }
            })),
        )
            .into_response()
    }
}
