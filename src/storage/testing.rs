//! A [`KvStore`] with injectable faults, for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::memory::MemoryStore;
use super::traits::KvStore;
use crate::{EphimailError, Result};

/// Wraps a [`MemoryStore`]; each fault is switched on independently.
#[derive(Default)]
pub(crate) struct FaultyStore {
    inner: MemoryStore,
    fail_puts: AtomicBool,
    fail_hash_reads: AtomicBool,
    /// `get` on these keys fails.
    broken: Mutex<HashSet<String>>,
    /// `get` on these keys finds nothing, as if they expired after the scan.
    vanished: Mutex<HashSet<String>>,
}

impl FaultyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_hash_reads(&self) {
        self.fail_hash_reads.store(true, Ordering::SeqCst);
    }

    pub(crate) fn break_key(&self, key: &str) {
        self.broken.lock().unwrap().insert(key.to_string());
    }

    pub(crate) fn vanish_key(&self, key: &str) {
        self.vanished.lock().unwrap().insert(key.to_string());
    }

    fn down(what: &str) -> EphimailError {
        EphimailError::Storage(format!("{what}: connection reset"))
    }
}

#[async_trait]
impl KvStore for FaultyStore {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Self::down("put"));
        }
        self.inner.put(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.broken.lock().unwrap().contains(key) {
            return Err(Self::down("get"));
        }
        if self.vanished.lock().unwrap().contains(key) {
            return Ok(None);
        }
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.scan_prefix(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<()> {
        self.inner.hash_set(key, fields, ttl).await
    }

    async fn hash_create(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<bool> {
        self.inner.hash_create(key, fields, ttl).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        if self.fail_hash_reads.load(Ordering::SeqCst) {
            return Err(Self::down("hgetall"));
        }
        self.inner.hash_get_all(key).await
    }
}
