//! Ephimail - disposable email service
//!
//! Accepts mail over SMTP for a set of allowed domains, keeps it in a
//! key-value store for a limited time and pushes new-mail events to
//! browser viewers over WebSocket.

pub mod config;
pub mod crypto;
pub mod error;
pub mod hub;
pub mod logging;
pub mod smtp;
pub mod storage;
pub mod web;

pub use config::Config;
pub use crypto::{BodyEncryptor, RsaOaepEncryptor};
pub use error::{EphimailError, Result};
pub use hub::MailboxHub;
pub use smtp::{DomainAllowList, IngestBackend, SmtpServer};
pub use storage::{KvStore, MailStorage, MemoryStore};
pub use web::{AppState, WebServer};
