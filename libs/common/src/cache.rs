//! Redis cache module for the ElevateU services
//!
//! Short-lived state (one-time passwords, pending payment payloads) lives in
//! Redis. Callers depend on the [`KeyValueStore`] trait so the services can be
//! exercised against the in-memory [`MemoryStore`] in tests.

use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::time::Duration;
use tracing::info;

/// Minimal key-value contract used by the services
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set a key, overwriting any previous value, with an optional TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Get a value by key; expired and absent keys both yield `None`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Round trip to the backing store
    async fn ping(&self) -> Result<bool>;
}

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        Ok(RedisConfig { url })
    }
}

/// Redis-backed store sharing one auto-reconnecting connection
#[derive(Clone)]
pub struct RedisPool {
    connection: ConnectionManager,
}

impl RedisPool {
    /// Open the managed connection
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        let connection = ConnectionManager::new(client).await?;
        info!("Redis connection manager initialized with URL: {}", config.url);
        Ok(RedisPool { connection })
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

#[async_trait]
impl KeyValueStore for RedisPool {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection.clone();

        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<bool> {
        self.health_check().await
    }
}

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;

#[cfg(any(test, feature = "testing"))]
mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    /// Process-local [`KeyValueStore`] honouring TTLs
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        entries: Arc<Mutex<HashMap<String, (String, Option<Instant>)>>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of live keys
        pub async fn len(&self) -> usize {
            let now = Instant::now();
            let entries = self.entries.lock().await;
            entries
                .values()
                .filter(|(_, expires)| expires.is_none_or(|at| at > now))
                .count()
        }
    }

    #[async_trait]
    impl KeyValueStore for MemoryStore {
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
            let expires = ttl.map(|ttl| Instant::now() + ttl);
            self.entries
                .lock()
                .await
                .insert(key.to_string(), (value.to_string(), expires));
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            let mut entries = self.entries.lock().await;
            match entries.get(key) {
                Some((_, Some(expires))) if *expires <= Instant::now() => {
                    entries.remove(key);
                    Ok(None)
                }
                Some((value, _)) => Ok(Some(value.clone())),
                None => Ok(None),
            }
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            Ok(self.entries.lock().await.remove(key).is_some())
        }

        async fn ping(&self) -> Result<bool> {
            Ok(true)
        }
    }
}
