//! Persistent key/value store used for carts.
//!
//! Values are opaque strings (callers store serialized JSON). Redis backs the
//! store in deployment; `MemoryKvStore` is used in tests and when no Redis URL
//! is configured.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::debug;

/// String key/value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisKvStore {
    client: Arc<redis::Client>,
}

impl RedisKvStore {
    /// Create a new Redis store. The connection is opened lazily.
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Get an async connection.
    pub async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        debug!("Read key '{}' from Redis (present: {})", key, value.is_some());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_store_creation() {
        // Opening a client does not connect.
        assert!(RedisKvStore::new("redis://localhost:6379").is_ok());
        assert!(RedisKvStore::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("cart").await.unwrap(), None);

        store.set("cart", "[]").await.unwrap();
        assert_eq!(store.get("cart").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(store.len(), 1);

        store.delete("cart").await.unwrap();
        assert!(store.is_empty());
    }
}
