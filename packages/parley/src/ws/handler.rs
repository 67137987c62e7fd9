//! WebSocket Handler
//!
//! Drives one authenticated connection from open to close.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use parley_presence::{ClientEvent, ConnectionLifecycle, HubHandle, ServerEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::ServerMetrics;

/// Per-connection state built during the handshake.
///
/// `outbox_tx` is the only strong sender for the connection's outbox. The
/// registry holds a weak handle, so dropping this closes the connection for
/// every pusher at once.
pub struct ConnectionParts {
    pub lifecycle: ConnectionLifecycle,
    pub outbox_tx: mpsc::Sender<ServerEvent>,
    pub outbox_rx: mpsc::Receiver<ServerEvent>,
}

/// Handle an authenticated presence WebSocket connection
pub async fn handle_presence_ws(
    socket: WebSocket,
    parts: ConnectionParts,
    hub: HubHandle,
    metrics: Arc<ServerMetrics>,
    shutdown: CancellationToken,
) {
    let ConnectionParts {
        mut lifecycle,
        outbox_tx,
        mut outbox_rx,
    } = parts;
    let conn_id = lifecycle.connection_id();

    // Subscribe first so our own registration broadcast is not missed
    let mut presence_rx = hub.subscribe();

    if let Err(e) = lifecycle.open().await {
        warn!(conn_id = %conn_id, "Failed to open connection: {}", e);
        return;
    }
    metrics.connection_opened();
    info!(
        conn_id = %conn_id,
        user = %lifecycle.user().map(|u| u.as_str()).unwrap_or("?"),
        "Presence WebSocket connected"
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Forward presence broadcasts into this connection's outbox
    let tx_presence = outbox_tx.clone();
    let presence_metrics = metrics.clone();
    let presence_task = async move {
        loop {
            match presence_rx.recv().await {
                Ok(event) => {
                    presence_metrics.presence_broadcast();
                    if tx_presence.send(event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Snapshots are complete; the next one supersedes what was missed
                    warn!(conn_id = %conn_id, "Presence broadcast lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    // Task to send events to the WebSocket
    let sender_metrics = metrics.clone();
    let sender_task = async move {
        while let Some(event) = outbox_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize {} event: {}", event.name(), e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                sender_metrics.websocket_error();
                break;
            }
        }
    };

    // Task to handle incoming frames
    let input_metrics = metrics.clone();
    let lifecycle_ref = &lifecycle;
    let input_task = async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    input_metrics.frame_received();
                    let event = match serde_json::from_str::<ClientEvent>(text.as_str()) {
                        Ok(event) => event,
                        Err(e) => {
                            debug!(conn_id = %conn_id, "Ignoring unparseable frame: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = lifecycle_ref.handle_client_event(event).await {
                        if e.is_delivery_failure() {
                            debug!(conn_id = %conn_id, "Reply dropped: {}", e);
                        } else {
                            warn!(conn_id = %conn_id, "Client event failed: {}", e);
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!(conn_id = %conn_id, "Client closed connection");
                    break;
                }
                Err(e) => {
                    input_metrics.websocket_error();
                    error!(conn_id = %conn_id, "WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = presence_task => debug!(conn_id = %conn_id, "Presence task ended"),
        _ = sender_task => debug!(conn_id = %conn_id, "Sender task ended"),
        _ = input_task => debug!(conn_id = %conn_id, "Input task ended"),
        _ = shutdown.cancelled() => debug!(conn_id = %conn_id, "Server shutting down"),
    }

    // Close the outbox before unregistering so in-flight deliveries see a stale handle
    drop(outbox_tx);
    lifecycle.disconnect().await;
    metrics.connection_closed();
    info!(conn_id = %conn_id, "Presence WebSocket disconnected");
}
