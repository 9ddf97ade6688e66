//! In-process key-value store.
//!
//! Backs tests and `backend = "memory"` deployments. Expiry is enforced on
//! every read. A read that finds an expired key removes that key only;
//! everything else is left to [`MemoryStore::purge_expired`], which
//! [`MemoryStore::spawn_sweeper`] runs periodically.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::traits::KvStore;
use crate::Result;

/// Interval of the background expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
enum Value {
    Scalar(Vec<u8>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// None = never expires.
    deadline: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Duration) -> Self {
        let deadline = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        Self { value, deadline }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.deadline.map_or(true, |d| now < d)
    }
}

/// A [`KvStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of held entries, expired ones included.
    pub async fn raw_len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Run [`purge_expired`](Self::purge_expired) every `every` until the
    /// store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired().await;
                if purged > 0 {
                    debug!("Purged {} expired keys", purged);
                }
            }
        })
    }

    /// Live entry at `key`. An expired entry found here is removed.
    async fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(e) if e.is_live(now) => return Some(e.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        // Re-check: the key may have been rewritten since the read lock dropped
        if entries.get(key).is_some_and(|e| !e.is_live(Instant::now())) {
            entries.remove(key);
        }
        None
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.entries.write().await.insert(
            key.to_string(),
            Entry::new(Value::Scalar(value.to_vec()), ttl),
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(match self.live(key).await {
            Some(Entry {
                value: Value::Scalar(v),
                ..
            }) => Some(v),
            _ => None,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).await.is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let now = Instant::now();

        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .remove(key)
            .is_some_and(|e| e.is_live(Instant::now())))
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<()> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();

        let mut hash = match entries.remove(key) {
            Some(Entry {
                value: Value::Hash(h),
                deadline,
            }) if deadline.map_or(true, |d| now < d) => h,
            _ => HashMap::new(),
        };
        for (field, value) in fields {
            hash.insert((*field).to_string(), value.clone());
        }

        entries.insert(key.to_string(), Entry::new(Value::Hash(hash), ttl));
        Ok(())
    }

    async fn hash_create(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_live(Instant::now())) {
            return Ok(false);
        }

        let hash = fields
            .iter()
            .map(|(f, v)| ((*f).to_string(), v.clone()))
            .collect();
        entries.insert(key.to_string(), Entry::new(Value::Hash(hash), ttl));
        Ok(true)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(match self.live(key).await {
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => h,
            _ => HashMap::new(),
        })
    }
}
