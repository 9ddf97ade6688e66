//! Mailbox event hub for Ephimail.
//!
//! This module provides:
//! - Viewer registration with bounded outbound queues
//! - Per-mailbox subscriptions (one mailbox per viewer)
//! - Best-effort `new_email` notifications and broadcasts
//! - The JSON frames spoken over the viewer WebSocket

mod event_hub;
mod messages;

pub use event_hub::{HubLoop, MailboxHub, Viewer, DEFAULT_QUEUE_CAPACITY};
pub use messages::{ClientMessage, ServerMessage};
