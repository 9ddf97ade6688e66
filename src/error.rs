//! Error types for Ephimail.

use thiserror::Error;

/// Common error type for Ephimail.
#[derive(Error, Debug)]
pub enum EphimailError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key-value store error.
    ///
    /// Wraps errors from any storage backend (connection, protocol or
    /// pool failures).
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Recipient address is not a syntactically valid email address.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Recipient domain is not in the allow-list.
    #[error("{0} is not allowed")]
    DomainNotAllowed(String),

    /// Message payload has no well-formed header block.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Mailbox already has an active reservation.
    #[error("mailbox {0} is already reserved")]
    AlreadyReserved(String),

    /// No reservation exists for the mailbox.
    #[error("reservation for {0} not found")]
    ReservationNotFound(String),

    /// Reservation duration outside of the allowed set.
    #[error("invalid duration {0:?}, allowed values: 1h, 24h, 168h")]
    InvalidDuration(String),

    /// Body encryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::redis::RedisError> for EphimailError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        EphimailError::Storage(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for EphimailError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        EphimailError::Storage(e.to_string())
    }
}

/// Result type alias for Ephimail operations.
pub type Result<T> = std::result::Result<T, EphimailError>;
