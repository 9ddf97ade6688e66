//! Redis-backed key-value store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use tracing::info;

use super::traits::KvStore;
use crate::{EphimailError, Result};

/// Keys requested per SCAN round trip.
const SCAN_COUNT: usize = 100;

/// KEYS[1] = hash key, ARGV[1] = TTL in ms (0 = none), ARGV[2..] = field/value pairs.
const CREATE_HASH_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
if tonumber(ARGV[1]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return 1
";

/// A [`KvStore`] backed by a pooled Redis connection.
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Create a connection pool for `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// No connection is opened until the first command; call [`ping`](Self::ping)
    /// to fail fast on an unreachable server.
    pub fn connect(url: &str) -> Result<Self> {
        info!("Connecting to redis at {}", url);
        let pool = PoolConfig::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| EphimailError::Storage(format!("failed to create redis pool: {e}")))?;
        Ok(Self { pool })
    }

    /// Check that the server answers.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn conn(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn ttl_millis(ttl: Duration) -> u64 {
    // Sub-millisecond TTLs would round to "no expiry"
    ttl.as_millis().max(1) as u64
}

/// `EVAL` of [`CREATE_HASH_SCRIPT`] for `key`.
fn create_hash_cmd(key: &str, fields: &[(&str, String)], ttl: Duration) -> redis::Cmd {
    let ttl_ms = if ttl.is_zero() { 0 } else { ttl_millis(ttl) };

    let mut cmd = redis::cmd("EVAL");
    cmd.arg(CREATE_HASH_SCRIPT).arg(1).arg(key).arg(ttl_ms);
    for (field, value) in fields {
        cmd.arg(*field).arg(value);
    }
    cmd
}

#[async_trait]
impl KvStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", escape_glob(prefix));

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)], ttl: Duration) -> Result<()> {
        if fields.is_empty() {
            return Err(EphimailError::Validation(
                "hash_set requires at least one field".to_string(),
            ));
        }

        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();

        pipe.cmd("HSET").arg(key);
        for (field, value) in fields {
            pipe.arg(*field).arg(value);
        }
        pipe.ignore();

        if ttl.is_zero() {
            pipe.cmd("PERSIST").arg(key).ignore();
        } else {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn hash_create(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<bool> {
        if fields.is_empty() {
            return Err(EphimailError::Validation(
                "hash_create requires at least one field".to_string(),
            ));
        }

        let mut conn = self.conn().await?;
        let created: i64 = create_hash_cmd(key, fields, ttl)
            .query_async(&mut conn)
            .await?;
        Ok(created == 1)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        Ok(redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?)
    }
}
