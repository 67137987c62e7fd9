pub mod health;
pub mod messages;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use messages::{get_conversation_handler, list_contacts_handler, send_message_handler};
pub use websocket::presence_websocket_handler;
