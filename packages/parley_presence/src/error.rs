//! Error taxonomy for the presence core. None of these are fatal to the process.

use crate::ids::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// Handshake identity verification failed; the registry was never touched.
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// A push targeted a connection that has since closed.
    #[error("connection {0} is no longer open")]
    StaleHandle(ConnectionId),

    /// The connection's outbound queue is full.
    #[error("connection {0} outbox is full")]
    OutboxFull(ConnectionId),

    /// Disconnect for a connection that is already closed or superseded.
    #[error("connection {0} already disconnected")]
    DuplicateDisconnect(ConnectionId),

    /// A lifecycle step was requested from a state that does not allow it.
    #[error("invalid lifecycle transition: {0}")]
    InvalidTransition(&'static str),

    #[error("presence hub is not running")]
    HubUnavailable,
}

impl PresenceError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::AuthenticationFailure(_) => "authentication_failure",
            Self::StaleHandle(_) => "stale_handle",
            Self::OutboxFull(_) => "outbox_full",
            Self::DuplicateDisconnect(_) => "duplicate_disconnect",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::HubUnavailable => "hub_unavailable",
        }
    }

    /// Delivery failures that degrade to "queued" rather than being reported.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::StaleHandle(_) | Self::OutboxFull(_))
    }
}
