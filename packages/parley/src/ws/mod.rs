//! Real-time WebSocket transport
//!
//! One connection per signed-in client that:
//! - Receives presence snapshots whenever anyone comes online or goes offline
//! - Receives `newMessage` pushes addressed to its user
//! - Answers `ping` and `getOnlineUsers` requests

mod handler;

pub use handler::{ConnectionParts, handle_presence_ws};
