//! Connection registry: which connection currently speaks for each online user.

use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::PresenceError;
use crate::event::ServerEvent;
use crate::ids::{ConnectionId, UserId};

/// Non-owning reference to one live connection.
///
/// The transport owns the strong outbox sender. Once it drops it, every
/// handle for that connection goes stale and pushes fail.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbox: mpsc::WeakSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbox: &mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id,
            outbox: outbox.downgrade(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event on this connection without waiting.
    pub fn push(&self, event: ServerEvent) -> Result<(), PresenceError> {
        let outbox = self
            .outbox
            .upgrade()
            .ok_or(PresenceError::StaleHandle(self.id))?;
        outbox.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => PresenceError::OutboxFull(self.id),
            TrySendError::Closed(_) => PresenceError::StaleHandle(self.id),
        })
    }

    pub fn is_open(&self) -> bool {
        self.outbox.upgrade().is_some_and(|tx| !tx.is_closed())
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// In-memory map of online users. At most one entry per user; last connection wins.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: HashMap<UserId, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `user`. Returns the superseded handle, if any.
    /// The superseded connection is not closed here.
    pub fn register(&mut self, user: UserId, conn: ConnectionHandle) -> Option<ConnectionHandle> {
        self.entries.insert(user, conn)
    }

    /// Remove the entry for `user`. Absent is not an error.
    pub fn unregister(&mut self, user: &UserId) -> Option<ConnectionHandle> {
        self.entries.remove(user)
    }

    /// Remove the entry for `user` only if it still points at `conn_id`.
    ///
    /// A connection that was superseded by a reconnect must not take the
    /// newer connection offline when its own disconnect arrives late.
    pub fn unregister_if_current(&mut self, user: &UserId, conn_id: ConnectionId) -> bool {
        match self.entries.get(user) {
            Some(current) if current.id() == conn_id => {
                self.entries.remove(user);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, user: &UserId) -> Option<&ConnectionHandle> {
        self.entries.get(user)
    }

    /// Point-in-time copy of the online user set.
    pub fn snapshot_user_ids(&self) -> BTreeSet<UserId> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
