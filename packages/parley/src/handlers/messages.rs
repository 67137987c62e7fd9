use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use parley_presence::{DeliveryOutcome, Message};
use serde::Deserialize;
use tracing::debug;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::UserInfo;

/// Contacts for the sidebar: every user except the caller.
pub async fn list_contacts_handler(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<UserInfo>>> {
    let users = state.repository.list_users_except(auth.id()).await?;
    Ok(Json(users.into_iter().map(UserInfo::from).collect()))
}

pub async fn get_conversation_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(other_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .repository
        .get_conversation(auth.id(), &other_id)
        .await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    text: Option<String>,
    image: Option<String>,
}

/// Persist a message, then hand it to the presence hub for live delivery.
///
/// Delivery runs detached: the response reflects the durable write only.
pub async fn send_message_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(receiver_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let text = req.text.filter(|t| !t.trim().is_empty());
    let image = req.image.filter(|i| !i.trim().is_empty());
    if text.is_none() && image.is_none() {
        return Err(ApiError::BadRequest(
            "Message must include text or an image".into(),
        ));
    }

    if state.repository.get_user_by_id(&receiver_id).await?.is_none() {
        return Err(ApiError::NotFound("Recipient not found".into()));
    }

    let message = state
        .repository
        .insert_message(auth.id(), &receiver_id, text.as_deref(), image.as_deref())
        .await?;
    state.metrics.message_persisted();

    let hub = state.hub.clone();
    let metrics = state.metrics.clone();
    let outgoing = message.clone();
    tokio::spawn(async move {
        let id = outgoing.id.clone();
        match hub.deliver(outgoing).await {
            DeliveryOutcome::Delivered => metrics.message_delivered(),
            DeliveryOutcome::Queued => {
                debug!(message = %id, "Recipient offline, message left for next fetch");
                metrics.message_queued();
            }
        }
    });

    Ok((StatusCode::CREATED, Json(message)))
}
