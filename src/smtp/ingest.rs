//! Mail ingestion: recipient checks, storage and viewer notification.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::address::DomainAllowList;
use super::backend::{MailBackend, MailSession};
use super::message::validate_message;
use crate::crypto::BodyEncryptor;
use crate::hub::MailboxHub;
use crate::storage::MailStorage;
use crate::Result;

struct IngestContext {
    allowed: DomainAllowList,
    storage: MailStorage,
    encryptor: Arc<dyn BodyEncryptor>,
    hub: MailboxHub,
}

/// [`MailBackend`] delivering into mailbox storage.
#[derive(Clone)]
pub struct IngestBackend {
    ctx: Arc<IngestContext>,
}

impl IngestBackend {
    pub fn new(
        allowed: DomainAllowList,
        storage: MailStorage,
        encryptor: Arc<dyn BodyEncryptor>,
        hub: MailboxHub,
    ) -> Self {
        Self {
            ctx: Arc::new(IngestContext {
                allowed,
                storage,
                encryptor,
                hub,
            }),
        }
    }
}

impl MailBackend for IngestBackend {
    type Session = IngestSession;

    fn new_session(&self, peer: SocketAddr) -> IngestSession {
        IngestSession {
            ctx: Arc::clone(&self.ctx),
            peer,
            from: None,
            recipients: Vec::new(),
        }
    }
}

/// One SMTP connection's transaction state.
pub struct IngestSession {
    ctx: Arc<IngestContext>,
    peer: SocketAddr,
    from: Option<String>,
    recipients: Vec<String>,
}

impl IngestSession {
    /// Recipients accepted in the current transaction.
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Store `body` for `mailbox` and tell its viewers.
    ///
    /// Failures are logged; the sender has already been told the message
    /// was accepted.
    async fn deliver(&self, mailbox: &str, body: &[u8]) {
        let stored = self.prepare_body(mailbox, body).await;

        match self.ctx.storage.store_email(mailbox, &stored).await {
            Ok(key) => {
                let viewers = self.ctx.hub.notify(mailbox, &key).await;
                info!(
                    "Delivered {} bytes to {} from {} ({} viewers notified)",
                    stored.len(),
                    mailbox,
                    self.peer,
                    viewers
                );
            }
            Err(e) => warn!("Failed to store message for {}: {}", mailbox, e),
        }
    }

    /// Body to store: ciphertext for encrypted reservations, else the
    /// payload bytes untouched.
    async fn prepare_body<'a>(&self, mailbox: &str, body: &'a [u8]) -> Cow<'a, [u8]> {
        let reservation = match self.ctx.storage.get_reservation(mailbox).await {
            Ok(Some(r)) if r.requires_encryption() => r,
            Ok(_) => return Cow::Borrowed(body),
            Err(e) => {
                warn!("Reservation lookup for {} failed: {}", mailbox, e);
                return Cow::Borrowed(body);
            }
        };

        match self.ctx.encryptor.encrypt(body, &reservation.public_key) {
            Ok(ciphertext) => {
                debug!("Encrypted message for {}", mailbox);
                Cow::Owned(ciphertext.into_bytes())
            }
            Err(e) => {
                // Delivery wins over confidentiality
                warn!("Storing plaintext for {}: {}", mailbox, e);
                Cow::Borrowed(body)
            }
        }
    }
}

#[async_trait]
impl MailSession for IngestSession {
    async fn mail(&mut self, from: &str) -> Result<()> {
        self.from = Some(from.to_string());
        self.recipients.clear();
        Ok(())
    }

    async fn rcpt(&mut self, to: &str) -> Result<()> {
        let mailbox = match self.ctx.allowed.check_recipient(to) {
            Ok(mailbox) => mailbox,
            Err(e) => {
                debug!("Rejected recipient {} from {}: {}", to, self.peer, e);
                return Err(e);
            }
        };
        if !self.recipients.contains(&mailbox) {
            self.recipients.push(mailbox);
        }
        Ok(())
    }

    async fn data(&mut self, payload: &[u8]) -> Result<()> {
        validate_message(payload)?;

        for mailbox in &self.recipients {
            self.deliver(mailbox, payload).await;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.from = None;
        self.recipients.clear();
    }

    fn logout(&mut self) {
        self.reset();
        debug!("Session from {} closed", self.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RsaOaepEncryptor;
    use crate::hub::DEFAULT_QUEUE_CAPACITY;
    use crate::storage::testing::FaultyStore;
    use crate::storage::{KvStore, MemoryStore, ReservationDuration, DEFAULT_EMAIL_TTL};
    use tokio::time::{timeout, Duration};
    use crate::EphimailError;

    struct FailingEncryptor;

    impl BodyEncryptor for FailingEncryptor {
        fn encrypt(&self, _body: &[u8], _public_key: &str) -> Result<String> {
            Err(EphimailError::Encryption("boom".to_string()))
        }
    }

    struct ReversingEncryptor;

    impl BodyEncryptor for ReversingEncryptor {
        fn encrypt(&self, body: &[u8], _public_key: &str) -> Result<String> {
            Ok(String::from_utf8_lossy(body).chars().rev().collect())
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn setup(encryptor: Arc<dyn BodyEncryptor>) -> (IngestBackend, MailStorage, MailboxHub) {
        setup_with_store(Arc::new(MemoryStore::new()), encryptor)
    }

    fn setup_with_store(
        store: Arc<dyn KvStore>,
        encryptor: Arc<dyn BodyEncryptor>,
    ) -> (IngestBackend, MailStorage, MailboxHub) {
        let storage = MailStorage::new(store, DEFAULT_EMAIL_TTL);
        let (hub, _task) = MailboxHub::spawn(DEFAULT_QUEUE_CAPACITY);
        let backend = IngestBackend::new(
            DomainAllowList::new(["example.com"]),
            storage.clone(),
            encryptor,
            hub.clone(),
        );
        (backend, storage, hub)
    }

    const MESSAGE: &[u8] = b"Subject: Hi\r\n\r\nhello\r\n";

    #[tokio::test]
    async fn test_deliver_plaintext() {
        let (backend, storage, _hub) = setup(Arc::new(RsaOaepEncryptor::new()));
        let mut session = backend.new_session(peer());

        session.mail("sender@other.org").await.unwrap();
        session.rcpt("user@example.com").await.unwrap();
        session.data(MESSAGE).await.unwrap();

        let emails = storage.retrieve_emails("user@example.com").await.unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(
            emails.values().next().map(Vec::as_slice),
            Some(MESSAGE)
        );
    }

    #[tokio::test]
    async fn test_rejects_disallowed_domain() {
        let (backend, storage, _hub) = setup(Arc::new(RsaOaepEncryptor::new()));
        let mut session = backend.new_session(peer());

        let result = session.rcpt("user@other.com").await;
        assert!(matches!(result, Err(EphimailError::DomainNotAllowed(_))));
        assert!(session.recipients().is_empty());
        assert!(storage.retrieve_emails("user@other.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_recipient() {
        let (backend, _storage, _hub) = setup(Arc::new(RsaOaepEncryptor::new()));
        let mut session = backend.new_session(peer());

        let result = session.rcpt("not-an-address").await;
        assert!(matches!(result, Err(EphimailError::InvalidRecipient(_))));
    }

    #[tokio::test]
    async fn test_rejects_malformed_message() {
        let (backend, storage, _hub) = setup(Arc::new(RsaOaepEncryptor::new()));
        let mut session = backend.new_session(peer());
        session.rcpt("user@example.com").await.unwrap();

        let result = session.data(b"no headers here").await;
        assert!(matches!(result, Err(EphimailError::MalformedMessage(_))));
        assert!(storage.retrieve_emails("user@example.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multiple_recipients_stored_independently() {
        let (backend, storage, _hub) = setup(Arc::new(RsaOaepEncryptor::new()));
        let mut session = backend.new_session(peer());
        session.rcpt("a@example.com").await.unwrap();
        session.rcpt("b@example.com").await.unwrap();
        session.rcpt("A@example.com").await.unwrap();
        assert_eq!(session.recipients().len(), 2);

        session.data(MESSAGE).await.unwrap();
        assert_eq!(storage.retrieve_emails("a@example.com").await.unwrap().len(), 1);
        assert_eq!(storage.retrieve_emails("b@example.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notifies_subscribers_with_key() {
        let (backend, storage, hub) = setup(Arc::new(RsaOaepEncryptor::new()));
        let (viewer, mut rx) = hub.register().await;
        hub.subscribe(&viewer, "user@example.com").await;

        let mut session = backend.new_session(peer());
        session.rcpt("user@example.com").await.unwrap();
        session.data(MESSAGE).await.unwrap();

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        let key = storage
            .retrieve_emails("user@example.com")
            .await
            .unwrap()
            .into_keys()
            .next()
            .unwrap();
        assert_eq!(frame["type"], "new_email");
        assert_eq!(frame["payload"]["message_id"], key.as_str());
    }

    #[tokio::test]
    async fn test_encrypts_for_encrypted_reservation() {
        let (backend, storage, _hub) = setup(Arc::new(ReversingEncryptor));
        storage
            .reserve(
                "b@example.com",
                ReservationDuration::OneDay,
                Some("key".to_string()),
            )
            .await
            .unwrap();

        let mut session = backend.new_session(peer());
        session.rcpt("b@example.com").await.unwrap();
        session.data(MESSAGE).await.unwrap();

        let emails = storage.retrieve_emails("b@example.com").await.unwrap();
        let stored = emails.values().next().unwrap();
        let expected: String = String::from_utf8_lossy(MESSAGE).chars().rev().collect();
        assert_eq!(stored, expected.as_bytes());
    }

    #[tokio::test]
    async fn test_plaintext_for_unencrypted_reservation() {
        let (backend, storage, _hub) = setup(Arc::new(ReversingEncryptor));
        storage
            .reserve("a@example.com", ReservationDuration::OneHour, None)
            .await
            .unwrap();

        let mut session = backend.new_session(peer());
        session.rcpt("a@example.com").await.unwrap();
        session.data(MESSAGE).await.unwrap();

        let emails = storage.retrieve_emails("a@example.com").await.unwrap();
        assert_eq!(emails.values().next().map(Vec::as_slice), Some(MESSAGE));
    }

    #[tokio::test]
    async fn test_encryption_failure_falls_back_to_plaintext() {
        let (backend, storage, _hub) = setup(Arc::new(FailingEncryptor));
        storage
            .reserve(
                "b@example.com",
                ReservationDuration::OneDay,
                Some("key".to_string()),
            )
            .await
            .unwrap();

        let mut session = backend.new_session(peer());
        session.rcpt("b@example.com").await.unwrap();
        session.data(MESSAGE).await.unwrap();

        let emails = storage.retrieve_emails("b@example.com").await.unwrap();
        assert_eq!(emails.values().next().map(Vec::as_slice), Some(MESSAGE));
    }

    #[tokio::test]
    async fn test_reset_clears_recipients() {
        let (backend, storage, _hub) = setup(Arc::new(RsaOaepEncryptor::new()));
        let mut session = backend.new_session(peer());
        session.rcpt("user@example.com").await.unwrap();

        session.reset();
        assert!(session.recipients().is_empty());

        session.data(MESSAGE).await.unwrap();
        assert!(storage.retrieve_emails("user@example.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_8bit_body_is_stored_byte_exact() {
        let (backend, storage, _hub) = setup(Arc::new(RsaOaepEncryptor::new()));
        let mut session = backend.new_session(peer());
        session.rcpt("user@example.com").await.unwrap();

        let payload = b"Subject: caf\xe9\r\n\r\ncaf\xe9 body\r\n";
        session.data(payload).await.unwrap();

        let emails = storage.retrieve_emails("user@example.com").await.unwrap();
        let (key, stored) = emails.iter().next().unwrap();
        assert_eq!(stored.as_slice(), &payload[..]);
        assert!(key.starts_with("user@example.com:"));
    }

    #[tokio::test]
    async fn test_store_failure_is_accepted_without_notify() {
        let store = Arc::new(FaultyStore::new());
        store.fail_puts();
        let (backend, storage, hub) = setup_with_store(store, Arc::new(RsaOaepEncryptor::new()));
        let (viewer, mut rx) = hub.register().await;
        hub.subscribe(&viewer, "user@example.com").await;

        let mut session = backend.new_session(peer());
        session.rcpt("user@example.com").await.unwrap();
        // Ok here is what the SMTP host turns into 250
        assert!(session.data(MESSAGE).await.is_ok());

        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
        assert!(storage.retrieve_emails("user@example.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reservation_lookup_error_stores_plaintext() {
        let store = Arc::new(FaultyStore::new());
        let (backend, storage, hub) =
            setup_with_store(store.clone(), Arc::new(ReversingEncryptor));
        storage
            .reserve(
                "b@example.com",
                ReservationDuration::OneDay,
                Some("key".to_string()),
            )
            .await
            .unwrap();
        store.fail_hash_reads();
        let (viewer, mut rx) = hub.register().await;
        hub.subscribe(&viewer, "b@example.com").await;

        let mut session = backend.new_session(peer());
        session.rcpt("b@example.com").await.unwrap();
        session.data(MESSAGE).await.unwrap();

        let emails = storage.retrieve_emails("b@example.com").await.unwrap();
        assert_eq!(emails.values().next().map(Vec::as_slice), Some(MESSAGE));
        assert!(rx.recv().await.is_some());
    }
}
