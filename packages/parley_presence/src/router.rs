//! Live delivery of persisted messages.

use tracing::{debug, warn};

use crate::event::ServerEvent;
use crate::message::{DeliveryOutcome, Message};
use crate::registry::PresenceRegistry;

/// Routes a persisted message to its recipient's live connection, if any.
///
/// Delivery is best-effort: persistence already succeeded, so every failure
/// here degrades to [`DeliveryOutcome::Queued`] and the recipient picks the
/// message up on its next fetch.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageRouter;

impl MessageRouter {
    pub fn new() -> Self {
        Self
    }

    pub fn deliver(&self, registry: &PresenceRegistry, message: &Message) -> DeliveryOutcome {
        let Some(conn) = registry.lookup(&message.receiver_id) else {
            debug!(message = %message.id, recipient = %message.receiver_id, "Recipient offline, queued");
            return DeliveryOutcome::Queued;
        };

        match conn.push(ServerEvent::NewMessage(message.clone())) {
            Ok(()) => {
                debug!(message = %message.id, conn_id = %conn.id(), "Delivered live");
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                warn!(
                    message = %message.id,
                    recipient = %message.receiver_id,
                    "Live delivery failed, treating as queued: {}", e
                );
                DeliveryOutcome::Queued
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ConnectionId;
    use crate::registry::ConnectionHandle;
    use tokio::sync::mpsc;

    fn message(to: &str) -> Message {
        Message {
            id: "m-1".into(),
            sender_id: "alice".into(),
            receiver_id: to.into(),
            text: Some("hello".into()),
            image: None,
            created_at: 1,
        }
    }

    #[test]
    fn online_recipient_gets_exactly_one_push() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut reg = PresenceRegistry::new();
        reg.register("bob".into(), ConnectionHandle::new(ConnectionId::new(), &tx));

        let msg = message("bob");
        assert_eq!(MessageRouter.deliver(&reg, &msg), DeliveryOutcome::Delivered);
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::NewMessage(msg));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn offline_recipient_is_queued() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut reg = PresenceRegistry::new();
        reg.register("carol".into(), ConnectionHandle::new(ConnectionId::new(), &tx));

        assert_eq!(
            MessageRouter.deliver(&reg, &message("bob")),
            DeliveryOutcome::Queued
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stale_handle_is_queued() {
        let (tx, rx) = mpsc::channel(8);
        let mut reg = PresenceRegistry::new();
        reg.register("bob".into(), ConnectionHandle::new(ConnectionId::new(), &tx));
        drop(tx);
        drop(rx);

        assert_eq!(
            MessageRouter.deliver(&reg, &message("bob")),
            DeliveryOutcome::Queued
        );
    }

    #[test]
    fn saturated_outbox_is_queued() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut reg = PresenceRegistry::new();
        reg.register("bob".into(), ConnectionHandle::new(ConnectionId::new(), &tx));
        tx.try_send(ServerEvent::Pong).unwrap();

        assert_eq!(
            MessageRouter.deliver(&reg, &message("bob")),
            DeliveryOutcome::Queued
        );
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::Pong);
        assert!(rx.try_recv().is_err());
    }
}
