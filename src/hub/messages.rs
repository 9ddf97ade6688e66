//! WebSocket frames exchanged with inbox viewers.
//!
//! Every frame is a JSON object `{"type": ..., "payload": {...}}`.

use serde::{Deserialize, Serialize};

/// Frames sent from a viewer to the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Watch a mailbox, replacing any previous subscription.
    Subscribe {
        /// Mailbox address.
        email: String,
    },
    /// Stop watching a mailbox.
    Unsubscribe {
        /// Mailbox address.
        email: String,
    },
}

/// Frames sent from the server to a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A message arrived in the watched mailbox.
    NewEmail {
        /// Mailbox address.
        email: String,
        /// Storage key of the new message, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
}

impl ServerMessage {
    /// Build a `new_email` event; an empty id is omitted from the frame.
    pub fn new_email(email: impl Into<String>, message_id: &str) -> Self {
        ServerMessage::NewEmail {
            email: email.into(),
            message_id: (!message_id.is_empty()).then(|| message_id.to_string()),
        }
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
