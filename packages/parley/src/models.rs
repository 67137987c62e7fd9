use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// === Auth models ===

/// User account row
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub profile_pic: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Public user info (no password hash)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub profile_pic: Option<String>,
    pub created_at: i64,
}

impl From<User> for UserInfo {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            full_name: u.full_name,
            profile_pic: u.profile_pic,
            created_at: u.created_at,
        }
    }
}

// === Message models ===

/// Row shape of the `messages` table.
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub created_at: i64,
}

impl From<MessageRow> for parley_presence::Message {
    fn from(r: MessageRow) -> Self {
        Self {
            id: r.id,
            sender_id: r.sender_id.into(),
            receiver_id: r.receiver_id.into(),
            text: r.text,
            image: r.image,
            created_at: r.created_at,
        }
    }
}
