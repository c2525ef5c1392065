//! Redis-backed key/value store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::KeyValueStore;
use crate::error::CacheError;

/// Key/value store on one Redis database.
///
/// The connection manager reconnects automatically; clones share it.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL, database included
    ///   (e.g. "redis://localhost:6379/1")
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Creates a store from an existing connection manager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get_value(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn get_matched_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.redis.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        debug!(pattern = %pattern, matched = keys.len(), "Matched cache keys");
        Ok(keys)
    }

    async fn get_all(&self) -> Result<BTreeMap<String, String>, CacheError> {
        let keys = self.get_matched_keys("*").await?;
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }

        let mut conn = self.redis.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        // Keys may expire between KEYS and MGET.
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect())
    }

    /// Flushes the selected database only.
    async fn flush_all(&self) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        redis::cmd("FLUSHDB").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}
