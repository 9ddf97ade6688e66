//! Key-value store abstraction for Ephimail.
//!
//! The mail pipeline only needs a small set of TTL-aware operations, so any
//! backend exposing them can hold mailboxes, messages and reservations.
//! Implementations must be shareable across tasks (`Send + Sync`); the
//! storage contract is built on `Arc<dyn KvStore>`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// A TTL-capable key-value store.
///
/// A `ttl` of [`Duration::ZERO`] means the key never expires. Keys whose TTL
/// has elapsed must be indistinguishable from keys that never existed.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the name of the backend.
    fn backend_name(&self) -> &'static str;

    /// Set `key` to the raw bytes `value`, overwriting any previous value.
    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Get the bytes stored at `key`, exactly as written.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Check whether `key` exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// List every key starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete `key`. Returns true if a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Write `fields` into the hash at `key` and set the key's TTL.
    ///
    /// Field writes and the TTL must be applied atomically.
    async fn hash_set(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<()>;

    /// Create the hash at `key` with `fields` and TTL only if `key` does not exist.
    ///
    /// Returns false, leaving the store untouched, when the key already exists.
    /// The existence check and the write must be a single atomic step.
    async fn hash_create(&self, key: &str, fields: &[(&str, String)], ttl: Duration)
        -> Result<bool>;

    /// Read every field of the hash at `key`; empty if the key is absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;
}
