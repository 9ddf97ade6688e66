//! Hooks between the SMTP host and the mail pipeline.
//!
//! The host owns the protocol (greeting, command order, data transfer) and
//! calls into a [`MailSession`] once per transaction step. A hook error is
//! turned into an SMTP reply and the transaction is rejected.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::Result;

/// Creates one [`MailSession`] per accepted connection.
pub trait MailBackend: Send + Sync + 'static {
    type Session: MailSession;

    /// Called once the client has greeted with HELO/EHLO.
    fn new_session(&self, peer: SocketAddr) -> Self::Session;
}

/// Per-connection transaction hooks.
#[async_trait]
pub trait MailSession: Send {
    /// `MAIL FROM` was received; `from` is empty for the null sender.
    async fn mail(&mut self, from: &str) -> Result<()>;

    /// `RCPT TO` was received.
    async fn rcpt(&mut self, to: &str) -> Result<()>;

    /// The complete, dot-unstuffed payload of a `DATA` transfer.
    async fn data(&mut self, payload: &[u8]) -> Result<()>;

    /// The current transaction ended (RSET, new greeting, or after DATA).
    fn reset(&mut self);

    /// The connection is closing.
    fn logout(&mut self);
}
