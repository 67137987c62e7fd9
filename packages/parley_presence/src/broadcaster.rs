//! Presence fan-out to every open connection.

use tokio::sync::broadcast;
use tracing::debug;

use crate::event::ServerEvent;
use crate::registry::PresenceRegistry;

/// Broadcast side of the presence channel. Every open connection holds a
/// receiver from [`PresenceBroadcaster::subscribe`].
#[derive(Debug, Clone)]
pub struct PresenceBroadcaster {
    tx: broadcast::Sender<ServerEvent>,
}

impl PresenceBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Send the full online set to all subscribers. Returns how many received it.
    pub fn broadcast_online_users(&self, registry: &PresenceRegistry) -> usize {
        let online: Vec<_> = registry.snapshot_user_ids().into_iter().collect();
        let count = online.len();
        match self.tx.send(ServerEvent::OnlineUsers(online)) {
            Ok(receivers) => {
                debug!(online = count, receivers, "Broadcast presence");
                receivers
            }
            Err(_) => {
                debug!(online = count, "Presence broadcast had no receivers");
                0
            }
        }
    }
}
