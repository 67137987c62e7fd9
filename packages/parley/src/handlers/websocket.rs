use axum::{
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use parley_presence::{ConnectionHandle, ConnectionId, ConnectionLifecycle};
use tokio::sync::mpsc;
use tracing::debug;

use crate::AppState;
use crate::auth::{SessionVerifier, session_token};
use crate::error::ApiError;
use crate::ws;

/// Real-time presence endpoint.
///
/// The session cookie is verified before the upgrade, so a failed handshake
/// gets a plain 401 and never reaches the presence hub.
pub async fn presence_websocket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let (outbox_tx, outbox_rx) = mpsc::channel(state.presence_config.outbox_capacity);
    let handle = ConnectionHandle::new(ConnectionId::new(), &outbox_tx);
    let mut lifecycle = ConnectionLifecycle::new(state.hub.clone(), handle);

    let verifier = SessionVerifier::new(state.repository.clone());
    if let Err(e) = lifecycle
        .authenticate(&verifier, &session_token(&headers))
        .await
    {
        debug!(conn_id = %lifecycle.connection_id(), "WebSocket handshake refused: {}", e);
        state.metrics.auth_failed();
        return ApiError::Unauthorized("Unauthorized - Invalid Token".into()).into_response();
    }

    let hub = state.hub.clone();
    let metrics = state.metrics.clone();
    let shutdown = state.shutdown.clone();

    ws.on_upgrade(move |socket| {
        ws::handle_presence_ws(
            socket,
            ws::ConnectionParts {
                lifecycle,
                outbox_tx,
                outbox_rx,
            },
            hub,
            metrics,
            shutdown,
        )
    })
}
