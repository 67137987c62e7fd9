//! Real-time presence and live delivery for Parley.
//!
//! A single hub task owns the [`PresenceRegistry`] (user → live connection).
//! Connection tasks drive a [`ConnectionLifecycle`] that registers and
//! unregisters through the hub, and the HTTP send path hands persisted
//! messages to [`HubHandle::deliver`].

pub mod broadcaster;
pub mod error;
pub mod event;
pub mod hub;
pub mod ids;
pub mod lifecycle;
pub mod message;
pub mod registry;
pub mod router;

pub use broadcaster::PresenceBroadcaster;
pub use error::PresenceError;
pub use event::{ClientEvent, ServerEvent};
pub use hub::{HubConfig, HubHandle, PresenceHub};
pub use ids::{ConnectionId, UserId};
pub use lifecycle::{ConnectionLifecycle, ConnectionState, Effect, LifecycleEvent, VerifyIdentity};
pub use message::{DeliveryOutcome, Message};
pub use registry::{ConnectionHandle, PresenceRegistry};
pub use router::MessageRouter;
