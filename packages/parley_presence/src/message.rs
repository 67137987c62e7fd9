use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// A persisted direct message, exactly as the send path stored it.
///
/// The hub only ever forwards copies of this; it never creates or deletes one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default)]
    pub text: Option<String>,
    /// Attachment reference (image URL).
    #[serde(default)]
    pub image: Option<String>,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

/// Result of a live delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Pushed onto the recipient's live connection.
    Delivered,
    /// Recipient offline or its connection went stale; it will fetch on next load.
    Queued,
}
