//! Storage contract for messages and reservations.
//!
//! Messages are stored under content-addressed keys
//! `"<mailbox>:<sha256(body:timestamp)>"` with the configured TTL;
//! reservations are hashes under `"reservation:<mailbox>"` whose expiry is
//! enforced by the store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::reservation::{reservation_key, Reservation, ReservationDuration};
use super::traits::KvStore;
use crate::{EphimailError, Result};

/// Default message time-to-live.
pub const DEFAULT_EMAIL_TTL: Duration = Duration::from_secs(24 * 3600);

/// Hex-encoded SHA-256 of `parts` joined with `:`.
pub fn generate_hash<P: AsRef<[u8]>>(parts: &[P]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_ref());
    }
    format!("{:x}", hasher.finalize())
}

/// Storage key for `body` delivered to `mailbox` at `stored_at`.
pub fn message_key(mailbox: &str, body: &[u8], stored_at: &str) -> String {
    format!("{}:{}", mailbox, generate_hash(&[body, stored_at.as_bytes()]))
}

/// Delivery timestamp as embedded in message keys.
pub fn delivery_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Mailbox storage on top of any [`KvStore`].
#[derive(Clone)]
pub struct MailStorage {
    store: Arc<dyn KvStore>,
    email_ttl: Duration,
}

impl MailStorage {
    /// Create a storage contract over `store` with the given message TTL
    /// (zero = messages never expire).
    pub fn new(store: Arc<dyn KvStore>, email_ttl: Duration) -> Self {
        Self { store, email_ttl }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Message time-to-live.
    pub fn email_ttl(&self) -> Duration {
        self.email_ttl
    }

    /// Store `body` byte for byte for `mailbox`, returning the message key.
    pub async fn store_email(&self, mailbox: &str, body: &[u8]) -> Result<String> {
        self.store_email_at(mailbox, body, Utc::now()).await
    }

    /// Store `body` for `mailbox` as delivered at `stored_at`.
    pub async fn store_email_at(
        &self,
        mailbox: &str,
        body: &[u8],
        stored_at: DateTime<Utc>,
    ) -> Result<String> {
        let key = message_key(mailbox, body, &delivery_timestamp(stored_at));
        self.store.put(&key, body, self.email_ttl).await?;
        debug!("Stored {} bytes under {}", body.len(), key);
        Ok(key)
    }

    /// Every stored message of `mailbox`, keyed by message key.
    ///
    /// Keys that vanish between the scan and the read (expiry, deletion) or
    /// fail to load are skipped.
    pub async fn retrieve_emails(&self, mailbox: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let keys = self.store.scan_prefix(&format!("{mailbox}:")).await?;

        let mut emails = BTreeMap::new();
        for key in keys {
            match self.store.get(&key).await {
                Ok(Some(body)) => {
                    emails.insert(key, body);
                }
                Ok(None) => {}
                Err(e) => debug!("Skipping {}: {}", key, e),
            }
        }
        Ok(emails)
    }

    /// Reserve `mailbox` for `duration`.
    ///
    /// Fails with [`EphimailError::AlreadyReserved`] while another reservation
    /// is active. The record expires with the store TTL.
    pub async fn reserve(
        &self,
        mailbox: &str,
        duration: ReservationDuration,
        public_key: Option<String>,
    ) -> Result<Reservation> {
        let key = reservation_key(mailbox);
        if self.store.exists(&key).await? {
            return Err(EphimailError::AlreadyReserved(mailbox.to_string()));
        }

        let reservation = Reservation::new(mailbox, duration, public_key, Utc::now());
        let fields = reservation.to_fields();
        let created = self
            .store
            .hash_create(&key, &fields, duration.as_duration())
            .await?;
        if !created {
            return Err(EphimailError::AlreadyReserved(mailbox.to_string()));
        }

        info!(
            "Reserved {} for {} (encrypted: {})",
            mailbox, duration, reservation.encrypted
        );
        Ok(reservation)
    }

    /// Whether `mailbox` has an active reservation.
    pub async fn is_reserved(&self, mailbox: &str) -> Result<bool> {
        self.store.exists(&reservation_key(mailbox)).await
    }

    /// The active reservation of `mailbox`, if any.
    pub async fn get_reservation(&self, mailbox: &str) -> Result<Option<Reservation>> {
        let fields = self.store.hash_get_all(&reservation_key(mailbox)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let reservation = Reservation::from_fields(&fields)?;
        // Store TTL and recorded expiry should agree; trust the stricter one
        if !reservation.is_active(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(reservation))
    }

    /// Delete the reservation of `mailbox` before it expires.
    pub async fn delete_reservation(&self, mailbox: &str) -> Result<()> {
        if self.store.delete(&reservation_key(mailbox)).await? {
            info!("Released reservation of {}", mailbox);
            Ok(())
        } else {
            Err(EphimailError::ReservationNotFound(mailbox.to_string()))
        }
    }
}
