//! Per-connection lifecycle state machine.
//!
//! ```text
//! Connecting ──Verified──▶ Authenticated ──Opened──▶ Open ──Disconnected──▶ Closed
//!      │                                                                    ▲
//!      └──────────────────────────────Rejected──────────────────────────────┘
//! ```
//!
//! [`transition`] is pure: it maps `(state, event)` to the next state plus the
//! effects to run. [`ConnectionLifecycle`] runs those effects against the hub,
//! which applies each registry change and its presence broadcast in one step.

use std::future::Future;
use tracing::{debug, info, warn};

use crate::error::PresenceError;
use crate::event::{ClientEvent, ServerEvent};
use crate::hub::HubHandle;
use crate::ids::{ConnectionId, UserId};
use crate::registry::ConnectionHandle;

/// Handshake identity verification, provided by the auth layer.
pub trait VerifyIdentity: Send + Sync {
    type Credentials: ?Sized + Sync;

    fn verify_identity(
        &self,
        credentials: &Self::Credentials,
    ) -> impl Future<Output = Result<UserId, PresenceError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated(UserId),
    Open(UserId),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Verified(UserId),
    Rejected(String),
    Opened,
    Disconnected,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Register the user on this connection, then broadcast presence.
    Register(UserId),
    /// Unregister the user if this connection is still current, then broadcast presence.
    Unregister(UserId),
    /// Refuse the connection.
    Reject(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: ConnectionState) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    fn with(next: ConnectionState, effect: Effect) -> Self {
        Self {
            next,
            effects: vec![effect],
        }
    }
}

/// Compute the next state and effects. Disconnect is accepted from every
/// state; a second disconnect yields no effects.
pub fn transition(
    state: &ConnectionState,
    event: &LifecycleEvent,
) -> Result<Transition, PresenceError> {
    use ConnectionState::*;
    use LifecycleEvent::*;

    match (state, event) {
        (Connecting, Verified(user)) => Ok(Transition::to(Authenticated(user.clone()))),
        (Connecting, Rejected(reason)) => {
            Ok(Transition::with(Closed, Effect::Reject(reason.clone())))
        }
        (Authenticated(user), Opened) => Ok(Transition::with(
            Open(user.clone()),
            Effect::Register(user.clone()),
        )),
        (Open(user), Disconnected) => {
            Ok(Transition::with(Closed, Effect::Unregister(user.clone())))
        }
        (Connecting | Authenticated(_) | Closed, Disconnected) => Ok(Transition::to(Closed)),
        (Connecting, Opened) => Err(PresenceError::InvalidTransition(
            "cannot open an unauthenticated connection",
        )),
        (Closed, _) => Err(PresenceError::InvalidTransition("connection is closed")),
        (Authenticated(_) | Open(_), Verified(_) | Rejected(_)) => Err(
            PresenceError::InvalidTransition("connection is already authenticated"),
        ),
        (Open(_), Opened) => Err(PresenceError::InvalidTransition("connection is already open")),
    }
}

/// Drives one connection through its lifecycle.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    hub: HubHandle,
    handle: ConnectionHandle,
    state: ConnectionState,
}

impl ConnectionLifecycle {
    pub fn new(hub: HubHandle, handle: ConnectionHandle) -> Self {
        Self {
            hub,
            handle,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn user(&self) -> Option<&UserId> {
        match &self.state {
            ConnectionState::Authenticated(user) | ConnectionState::Open(user) => Some(user),
            _ => None,
        }
    }

    /// Verify handshake credentials. On failure the connection is closed
    /// without the registry ever being touched.
    pub async fn authenticate<V: VerifyIdentity>(
        &mut self,
        verifier: &V,
        credentials: &V::Credentials,
    ) -> Result<UserId, PresenceError> {
        let event = match verifier.verify_identity(credentials).await {
            Ok(user) => LifecycleEvent::Verified(user),
            Err(e) => LifecycleEvent::Rejected(match e {
                PresenceError::AuthenticationFailure(reason) => reason,
                other => other.to_string(),
            }),
        };
        self.apply(event).await?;
        self.user().cloned().ok_or(PresenceError::InvalidTransition(
            "authentication did not yield a user",
        ))
    }

    /// Open the connection: register the user and broadcast presence.
    pub async fn open(&mut self) -> Result<(), PresenceError> {
        self.apply(LifecycleEvent::Opened).await
    }

    /// Handle a transport disconnect. Safe to call any number of times.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Closed {
            debug!(
                conn_id = %self.handle.id(),
                "{}",
                PresenceError::DuplicateDisconnect(self.handle.id())
            );
            return;
        }
        if let Err(e) = self.apply(LifecycleEvent::Disconnected).await {
            warn!(conn_id = %self.handle.id(), "Disconnect cleanup failed: {}", e);
        }
    }

    /// Respond to an event sent by the client on this connection.
    pub async fn handle_client_event(&self, event: ClientEvent) -> Result<(), PresenceError> {
        if !matches!(self.state, ConnectionState::Open(_)) {
            return Err(PresenceError::InvalidTransition(
                "client events require an open connection",
            ));
        }
        match event {
            ClientEvent::Ping => self.handle.push(ServerEvent::Pong),
            ClientEvent::GetOnlineUsers => self.hub.send_online_users(self.handle.clone()).await,
        }
    }

    async fn apply(&mut self, event: LifecycleEvent) -> Result<(), PresenceError> {
        let Transition { next, effects } = transition(&self.state, &event)?;
        debug!(conn_id = %self.handle.id(), from = ?self.state, to = ?next, "Lifecycle transition");
        self.state = next;

        for effect in effects {
            match effect {
                Effect::Register(user) => {
                    self.hub.register(user, self.handle.clone()).await?;
                }
                Effect::Unregister(user) => match self.hub.unregister(user, self.handle.id()).await {
                    Ok(_) => {}
                    // Hub already torn down; its registry went with it
                    Err(PresenceError::HubUnavailable) => {
                        debug!(conn_id = %self.handle.id(), "Hub gone during disconnect");
                    }
                    Err(e) => return Err(e),
                },
                Effect::Reject(reason) => {
                    info!(conn_id = %self.handle.id(), "Connection rejected: {}", reason);
                    return Err(PresenceError::AuthenticationFailure(reason));
                }
            }
        }
        Ok(())
    }
}

impl Drop for ConnectionLifecycle {
    fn drop(&mut self) {
        // A task aborted while open must not leave its user registered
        if let ConnectionState::Open(user) = &self.state {
            self.hub.unregister_detached(user.clone(), self.handle.id());
        }
    }
}
