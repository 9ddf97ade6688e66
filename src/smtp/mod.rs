//! SMTP ingestion for Ephimail.
//!
//! This module provides:
//! - The SMTP listener and protocol host (greeting, command order, DATA)
//! - The hook traits the host drives per transaction
//! - The ingestion backend storing accepted mail and notifying viewers

mod address;
mod backend;
mod command;
mod ingest;
mod message;
mod response;
mod server;

pub use address::{normalize_mailbox, parse_address, DomainAllowList};
pub use backend::{MailBackend, MailSession};
pub use command::{Command, CommandError, COMMAND_LINE_MAX};
pub use ingest::{IngestBackend, IngestSession};
pub use message::validate_message;
pub use response::SmtpReply;
pub use server::SmtpServer;
