//! Mailbox reservation types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::{EphimailError, Result};

/// Key prefix for reservation records.
pub const RESERVATION_PREFIX: &str = "reservation:";

/// Build the storage key of a mailbox reservation.
pub fn reservation_key(mailbox: &str) -> String {
    format!("{RESERVATION_PREFIX}{mailbox}")
}

/// Allowed reservation lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationDuration {
    /// One hour ("1h").
    OneHour,
    /// One day ("24h").
    OneDay,
    /// One week ("168h").
    OneWeek,
}

impl ReservationDuration {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationDuration::OneHour => "1h",
            ReservationDuration::OneDay => "24h",
            ReservationDuration::OneWeek => "168h",
        }
    }

    /// Length of the reservation.
    pub fn as_duration(&self) -> Duration {
        let hours = match self {
            ReservationDuration::OneHour => 1,
            ReservationDuration::OneDay => 24,
            ReservationDuration::OneWeek => 168,
        };
        Duration::from_secs(hours * 3600)
    }
}

impl FromStr for ReservationDuration {
    type Err = EphimailError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1h" => Ok(ReservationDuration::OneHour),
            "24h" => Ok(ReservationDuration::OneDay),
            "168h" => Ok(ReservationDuration::OneWeek),
            other => Err(EphimailError::InvalidDuration(other.to_string())),
        }
    }
}

impl fmt::Display for ReservationDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A time-bounded claim on a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    /// Reserved mailbox address.
    pub email: String,
    /// Expiry instant (second precision).
    pub expires_at: DateTime<Utc>,
    /// Public key for encrypted delivery; empty when not encrypted.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub public_key: String,
    /// True iff `public_key` is non-empty.
    pub encrypted: bool,
    /// Creation instant (second precision).
    pub reserved_at: DateTime<Utc>,
}

impl Reservation {
    /// Create a reservation starting at `now`.
    pub fn new(
        email: impl Into<String>,
        duration: ReservationDuration,
        public_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let public_key = public_key.unwrap_or_default();
        // Stored timestamps are whole seconds; keep the in-memory value identical
        let reserved_at = truncate_to_secs(now);
        let expires_at = reserved_at
            + chrono::Duration::from_std(duration.as_duration()).unwrap_or(chrono::Duration::zero());
        Self {
            email: email.into(),
            expires_at,
            encrypted: !public_key.is_empty(),
            public_key,
            reserved_at,
        }
    }

    /// Whether the reservation is still in force at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whether messages to this mailbox must be encrypted.
    pub fn requires_encryption(&self) -> bool {
        self.encrypted && !self.public_key.is_empty()
    }

    /// Hash fields written to the store.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("email", self.email.clone()),
            ("expires_at", self.expires_at.timestamp().to_string()),
            ("public_key", self.public_key.clone()),
            ("encrypted", self.encrypted.to_string()),
            ("created_at", self.reserved_at.timestamp().to_string()),
        ]
    }

    /// Rebuild a reservation from stored hash fields.
    ///
    /// `created_at` is optional for records written without it; `encrypted`
    /// accepts both "true" and "1".
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let email = fields
            .get("email")
            .cloned()
            .ok_or_else(|| EphimailError::Storage("reservation without email".to_string()))?;
        let expires_at = fields
            .get("expires_at")
            .and_then(|v| parse_unix(v))
            .ok_or_else(|| EphimailError::Storage("invalid expiration timestamp".to_string()))?;
        let reserved_at = fields
            .get("created_at")
            .and_then(|v| parse_unix(v))
            .unwrap_or(expires_at);
        let public_key = fields.get("public_key").cloned().unwrap_or_default();
        let encrypted = matches!(
            fields.get("encrypted").map(String::as_str),
            Some("true") | Some("1")
        );

        Ok(Self {
            email,
            expires_at,
            public_key,
            encrypted,
            reserved_at,
        })
    }
}

fn parse_unix(value: &str) -> Option<DateTime<Utc>> {
    let secs = value.trim().parse::<i64>().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

fn truncate_to_secs(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(t.timestamp(), 0).single().unwrap_or(t)
}
