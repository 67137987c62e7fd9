//! Wire events exchanged with clients over a live connection.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::message::Message;

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    /// Full set of online users. Order carries no meaning.
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(Vec<UserId>),
    /// A message addressed to this connection's user.
    #[serde(rename = "newMessage")]
    NewMessage(Message),
    #[serde(rename = "pong")]
    Pong,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OnlineUsers(_) => "getOnlineUsers",
            Self::NewMessage(_) => "newMessage",
            Self::Pong => "pong",
        }
    }
}

/// Events clients may send once their connection is open.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "ping")]
    Ping,
    /// Ask for a fresh presence snapshot on this connection only.
    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers,
}
