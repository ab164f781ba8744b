//! Minimal string key-value surface used by [`KeyValueHostState`](super::KeyValueHostState).

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::RedisConfig;
use crate::error::{Error, Result};

/// Keys scanned per SCAN round trip
const SCAN_BATCH: usize = 100;

#[async_trait]
pub trait KeyValueClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every key starting with `prefix`, sorted
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Redis-backed client. All keys are namespaced under `key_prefix`.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
    key_prefix: String,
    op_timeout: Duration,
}

impl RedisKv {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let op_timeout = Duration::from_secs(config.operation_timeout_secs);
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::Configuration(format!("Invalid Redis URL: {e}")))?;
        let conn = timeout(op_timeout, client.get_connection_manager())
            .await
            .map_err(|_| Error::Timeout("Redis connection timed out".to_string()))??;

        Ok(Self::new(conn, config.key_prefix.clone(), op_timeout))
    }

    #[must_use]
    pub const fn new(conn: ConnectionManager, key_prefix: String, op_timeout: Duration) -> Self {
        Self {
            conn,
            key_prefix,
            op_timeout,
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd, op: &str) -> Result<T> {
        let mut conn = self.conn.clone();
        timeout(self.op_timeout, cmd.query_async(&mut conn))
            .await
            .map_err(|_| Error::Timeout(format!("Redis {op} timed out")))?
            .map_err(Error::from)
    }
}

#[async_trait]
impl KeyValueClient for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.full_key(key));
        self.query(&cmd, "GET").await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.full_key(key)).arg(value);
        self.query(&cmd, "SET").await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.full_key(key));
        let _: i64 = self.query(&cmd, "DEL").await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", escape_glob(&self.full_key(prefix)));
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, batch): (u64, Vec<String>) = self.query(&cmd, "SCAN").await?;

            keys.extend(
                batch
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(&self.key_prefix).map(str::to_string)),
            );

            // cursor 0 means iteration complete
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Escape Redis glob metacharacters so a prefix matches literally
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// In-process client for tests and single-node runs
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<String, String>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueClient for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
