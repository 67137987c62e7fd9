//! Presence hub actor.
//!
//! One task owns the registry. Every registry mutation, the presence broadcast
//! that follows it, and every delivery attempt run as a single step of that
//! task, so no reader ever sees a half-applied change and no lock is needed.

use std::collections::BTreeSet;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::broadcaster::PresenceBroadcaster;
use crate::error::PresenceError;
use crate::event::ServerEvent;
use crate::ids::{ConnectionId, UserId};
use crate::message::{DeliveryOutcome, Message};
use crate::registry::{ConnectionHandle, PresenceRegistry};
use crate::router::MessageRouter;

/// Channel sizes for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Pending commands before callers start waiting.
    pub queue_capacity: usize,
    /// Presence events buffered per subscriber before it lags.
    pub broadcast_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            broadcast_capacity: 256,
        }
    }
}

#[derive(Debug)]
enum HubCommand {
    Register {
        user: UserId,
        handle: ConnectionHandle,
        respond_to: oneshot::Sender<()>,
    },
    Unregister {
        user: UserId,
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<bool>,
    },
    Deliver {
        message: Message,
        respond_to: oneshot::Sender<DeliveryOutcome>,
    },
    Lookup {
        user: UserId,
        respond_to: oneshot::Sender<Option<ConnectionHandle>>,
    },
    OnlineUsers {
        respond_to: oneshot::Sender<BTreeSet<UserId>>,
    },
    SendOnlineUsers {
        handle: ConnectionHandle,
        respond_to: oneshot::Sender<Result<(), PresenceError>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<usize>,
    },
}

/// Handle to the presence hub. Cheap to clone; the hub stops once every
/// handle is dropped or [`HubHandle::shutdown`] is called.
#[derive(Debug, Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    broadcaster: PresenceBroadcaster,
}

impl HubHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, PresenceError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| PresenceError::HubUnavailable)?;
        rx.await.map_err(|_| PresenceError::HubUnavailable)
    }

    /// Register `user` on `handle` (last connection wins) and broadcast presence.
    pub async fn register(&self, user: UserId, handle: ConnectionHandle) -> Result<(), PresenceError> {
        self.request(|respond_to| HubCommand::Register {
            user,
            handle,
            respond_to,
        })
        .await
    }

    /// Remove `user` if its current connection is still `connection_id`.
    /// Broadcasts presence and returns true only when an entry was removed.
    pub async fn unregister(
        &self,
        user: UserId,
        connection_id: ConnectionId,
    ) -> Result<bool, PresenceError> {
        self.request(|respond_to| HubCommand::Unregister {
            user,
            connection_id,
            respond_to,
        })
        .await
    }

    /// Fire-and-forget unregister for contexts that cannot await (e.g. `Drop`).
    ///
    /// A full queue falls back to a spawned send on the current runtime.
    pub(crate) fn unregister_detached(&self, user: UserId, connection_id: ConnectionId) {
        let (respond_to, _) = oneshot::channel();
        let cmd = HubCommand::Unregister {
            user,
            connection_id,
            respond_to,
        };
        match self.sender.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(cmd)) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let sender = self.sender.clone();
                    runtime.spawn(async move {
                        if sender.send(cmd).await.is_err() {
                            debug!(conn_id = %connection_id, "Hub gone before deferred unregister");
                        }
                    });
                }
                Err(_) => {
                    warn!(conn_id = %connection_id, "Hub queue full and no runtime, unregister lost");
                }
            },
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %connection_id, "Hub gone, nothing to unregister");
            }
        }
    }

    /// Attempt live delivery of an already-persisted message.
    ///
    /// Never fails: if the hub is gone the message is simply left for the
    /// recipient's next fetch.
    pub async fn deliver(&self, message: Message) -> DeliveryOutcome {
        let id = message.id.clone();
        match self
            .request(|respond_to| HubCommand::Deliver {
                message,
                respond_to,
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(message = %id, "Delivery skipped: {}", e);
                DeliveryOutcome::Queued
            }
        }
    }

    pub async fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.request(|respond_to| HubCommand::Lookup { user, respond_to })
            .await
            .ok()
            .flatten()
    }

    pub async fn online_users(&self) -> Result<BTreeSet<UserId>, PresenceError> {
        self.request(|respond_to| HubCommand::OnlineUsers { respond_to })
            .await
    }

    /// Push the current online set onto `handle` from inside the hub, so the
    /// reply is queued before any broadcast caused by a later change.
    pub async fn send_online_users(&self, handle: ConnectionHandle) -> Result<(), PresenceError> {
        self.request(|respond_to| HubCommand::SendOnlineUsers { handle, respond_to })
            .await?
    }

    /// Subscribe to presence broadcasts. Subscribe before registering so the
    /// broadcast triggered by your own registration is not missed.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.broadcaster.subscribe()
    }

    /// Stop the hub, dropping every registry entry. Returns how many were dropped.
    pub async fn shutdown(&self) -> Result<usize, PresenceError> {
        self.request(|respond_to| HubCommand::Shutdown { respond_to })
            .await
    }
}

/// The actor that owns the registry.
pub struct PresenceHub {
    registry: PresenceRegistry,
    broadcaster: PresenceBroadcaster,
    router: MessageRouter,
    receiver: mpsc::Receiver<HubCommand>,
}

impl PresenceHub {
    /// Spawn the hub on the current tokio runtime and return its handle.
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let broadcaster = PresenceBroadcaster::new(config.broadcast_capacity);
        let hub = PresenceHub {
            registry: PresenceRegistry::new(),
            broadcaster: broadcaster.clone(),
            router: MessageRouter::new(),
            receiver,
        };
        tokio::spawn(hub.run());
        HubHandle {
            sender,
            broadcaster,
        }
    }

    async fn run(mut self) {
        debug!("Presence hub started");
        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                HubCommand::Register {
                    user,
                    handle,
                    respond_to,
                } => {
                    self.register(user, handle);
                    let _ = respond_to.send(());
                }
                HubCommand::Unregister {
                    user,
                    connection_id,
                    respond_to,
                } => {
                    let removed = self.unregister(&user, connection_id);
                    let _ = respond_to.send(removed);
                }
                HubCommand::Deliver {
                    message,
                    respond_to,
                } => {
                    let outcome = self.router.deliver(&self.registry, &message);
                    let _ = respond_to.send(outcome);
                }
                HubCommand::Lookup { user, respond_to } => {
                    let _ = respond_to.send(self.registry.lookup(&user).cloned());
                }
                HubCommand::OnlineUsers { respond_to } => {
                    let _ = respond_to.send(self.registry.snapshot_user_ids());
                }
                HubCommand::SendOnlineUsers { handle, respond_to } => {
                    let online = self.registry.snapshot_user_ids().into_iter().collect();
                    let _ = respond_to.send(handle.push(ServerEvent::OnlineUsers(online)));
                }
                HubCommand::Shutdown { respond_to } => {
                    let dropped = self.registry.len();
                    info!(dropped, "Presence hub shutting down");
                    let _ = respond_to.send(dropped);
                    return;
                }
            }
        }
        debug!(
            dropped = self.registry.len(),
            "Presence hub stopped (all handles dropped)"
        );
    }

    fn register(&mut self, user: UserId, handle: ConnectionHandle) {
        let conn_id = handle.id();
        if let Some(previous) = self.registry.register(user.clone(), handle) {
            if previous.id() != conn_id {
                debug!(user = %user, stale = %previous.id(), conn_id = %conn_id, "Connection superseded");
            }
        }
        info!(user = %user, conn_id = %conn_id, online = self.registry.len(), "User online");
        self.broadcaster.broadcast_online_users(&self.registry);
    }

    fn unregister(&mut self, user: &UserId, connection_id: ConnectionId) -> bool {
        if self.registry.unregister_if_current(user, connection_id) {
            info!(user = %user, conn_id = %connection_id, online = self.registry.len(), "User offline");
            self.broadcaster.broadcast_online_users(&self.registry);
            true
        } else {
            debug!(
                user = %user,
                conn_id = %connection_id,
                "Ignoring disconnect: {}",
                PresenceError::DuplicateDisconnect(connection_id)
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> (ConnectionHandle, mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle::new(ConnectionId::new(), &tx), tx, rx)
    }

    fn msg(to: &str) -> Message {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: "alice".into(),
            receiver_id: to.into(),
            text: Some("hey".into()),
            image: None,
            created_at: 7,
        }
    }

    #[tokio::test]
    async fn register_is_visible_in_online_users() {
        let hub = PresenceHub::spawn(HubConfig::default());
        let (h, _tx, _rx) = conn();
        hub.register("alice".into(), h).await.unwrap();

        let online = hub.online_users().await.unwrap();
        assert!(online.contains(&UserId::from("alice")));
    }

    #[tokio::test]
    async fn register_fans_out_one_event_per_open_connection() {
        let hub = PresenceHub::spawn(HubConfig::default());
        let mut subscribers: Vec<_> = (0..3).map(|_| hub.subscribe()).collect();

        let (h, _tx, _rx) = conn();
        hub.register("alice".into(), h).await.unwrap();

        for rx in subscribers.iter_mut() {
            assert_eq!(
                rx.try_recv().unwrap(),
                ServerEvent::OnlineUsers(vec![UserId::from("alice")])
            );
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn stale_disconnect_after_reconnect_is_noop() {
        let hub = PresenceHub::spawn(HubConfig::default());
        let (h1, _tx1, _rx1) = conn();
        let (h2, _tx2, _rx2) = conn();

        hub.register("alice".into(), h1.clone()).await.unwrap();
        hub.register("alice".into(), h2.clone()).await.unwrap();

        let mut rx = hub.subscribe();
        assert!(!hub.unregister("alice".into(), h1.id()).await.unwrap());
        assert_eq!(hub.lookup("alice".into()).await, Some(h2));
        // No presence change, no broadcast
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_disconnect_broadcasts_once() {
        let hub = PresenceHub::spawn(HubConfig::default());
        let (h, _tx, _rx) = conn();
        hub.register("alice".into(), h.clone()).await.unwrap();

        let mut rx = hub.subscribe();
        assert!(hub.unregister("alice".into(), h.id()).await.unwrap());
        assert!(!hub.unregister("alice".into(), h.id()).await.unwrap());

        assert_eq!(rx.try_recv().unwrap(), ServerEvent::OnlineUsers(vec![]));
        assert!(rx.try_recv().is_err());
        assert!(hub.lookup("alice".into()).await.is_none());
    }

    #[tokio::test]
    async fn deliver_to_online_recipient() {
        let hub = PresenceHub::spawn(HubConfig::default());
        let (h, _tx, mut rx) = conn();
        hub.register("bob".into(), h).await.unwrap();

        let m = msg("bob");
        assert_eq!(hub.deliver(m.clone()).await, DeliveryOutcome::Delivered);
        assert_eq!(rx.recv().await.unwrap(), ServerEvent::NewMessage(m));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_to_absent_recipient_is_queued() {
        let hub = PresenceHub::spawn(HubConfig::default());
        let (h, _tx, mut rx) = conn();
        hub.register("carol".into(), h).await.unwrap();

        assert_eq!(hub.deliver(msg("bob")).await, DeliveryOutcome::Queued);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_after_transport_closed_is_queued() {
        let hub = PresenceHub::spawn(HubConfig::default());
        let (h, tx, rx) = conn();
        hub.register("bob".into(), h).await.unwrap();
        drop(tx);
        drop(rx);

        assert_eq!(hub.deliver(msg("bob")).await, DeliveryOutcome::Queued);
    }

    #[tokio::test]
    async fn online_users_reply_is_pushed_to_the_requesting_connection() {
        let hub = PresenceHub::spawn(HubConfig::default());
        let (alice, _tx_a, mut out_a) = conn();
        let (bob, _tx_b, mut out_b) = conn();
        hub.register("alice".into(), alice.clone()).await.unwrap();
        hub.register("bob".into(), bob).await.unwrap();

        hub.send_online_users(alice).await.unwrap();

        assert_eq!(
            out_a.try_recv().unwrap(),
            ServerEvent::OnlineUsers(vec!["alice".into(), "bob".into()])
        );
        assert!(out_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn online_users_reply_to_closed_connection_is_a_delivery_failure() {
        let hub = PresenceHub::spawn(HubConfig::default());
        let (h, tx, rx) = conn();
        drop(tx);
        drop(rx);

        let err = hub.send_online_users(h).await.unwrap_err();
        assert!(err.is_delivery_failure());
    }

    #[tokio::test]
    async fn detached_unregister_survives_a_full_queue() {
        let hub = PresenceHub::spawn(HubConfig {
            queue_capacity: 1,
            ..HubConfig::default()
        });
        let (h, _tx, _rx) = conn();
        hub.register("alice".into(), h.clone()).await.unwrap();

        // Occupy the only queue slot before the hub task gets to run again
        let (respond_to, _) = oneshot::channel();
        hub.sender
            .try_send(HubCommand::Lookup {
                user: "nobody".into(),
                respond_to,
            })
            .unwrap();
        hub.unregister_detached("alice".into(), h.id());

        for _ in 0..100 {
            if hub.online_users().await.unwrap().is_empty() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("alice is still registered");
    }

    #[tokio::test]
    async fn shutdown_drops_entries_and_stops() {
        let hub = PresenceHub::spawn(HubConfig::default());
        let (h, _tx, _rx) = conn();
        hub.register("alice".into(), h).await.unwrap();

        assert_eq!(hub.shutdown().await.unwrap(), 1);
        assert_eq!(hub.online_users().await, Err(PresenceError::HubUnavailable));
        assert_eq!(hub.deliver(msg("alice")).await, DeliveryOutcome::Queued);
    }
}
