//! Storage module for Ephimail.
//!
//! This module provides:
//! - The [`KvStore`] abstraction over a TTL-capable key-value store
//! - Redis and in-memory backends
//! - [`MailStorage`], the message and reservation contract built on top

mod mail;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod reservation;
#[cfg(test)]
pub(crate) mod testing;
mod traits;

pub use mail::{delivery_timestamp, generate_hash, message_key, MailStorage, DEFAULT_EMAIL_TTL};
pub use memory::{MemoryStore, DEFAULT_SWEEP_INTERVAL};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use reservation::{reservation_key, Reservation, ReservationDuration, RESERVATION_PREFIX};
pub use traits::KvStore;

use std::sync::Arc;

use tracing::warn;

use crate::config::{StorageBackend, StorageConfig};
use crate::Result;

/// Open the store selected by `config`.
///
/// The Redis backend is pinged once so an unreachable server fails startup.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn KvStore>> {
    match config.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; messages are lost on restart");
            let store = Arc::new(MemoryStore::new());
            store.spawn_sweeper(DEFAULT_SWEEP_INTERVAL);
            Ok(store)
        }
        #[cfg(feature = "redis")]
        StorageBackend::Redis => {
            let store = RedisStore::connect(&config.redis_url())?;
            store.ping().await?;
            tracing::info!("Connected to redis at {}:{}", config.redis_host, config.redis_port);
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StorageBackend::Redis => {
            Err(crate::EphimailError::Config(
                "redis backend requested but the `redis` feature is disabled".to_string(),
            ))
        }
    }
}
