use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::error::CacheError;

/// Remote key/value store shared by every request. Implementations provide
/// their own synchronization.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<String, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn health_check(&self) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl CacheStore for RedisService {
    async fn get(&self, key: &str) -> Result<String, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))?;

        value.ok_or(CacheError::NotFound)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if ttl.as_secs() > 0 {
            cmd.arg("EX").arg(ttl.as_secs());
        }

        cmd.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(anyhow::anyhow!("Failed to set cache: {}", e)))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))?;

        if removed == 0 {
            return Err(CacheError::NotFound);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| CacheError::Backend(anyhow::anyhow!("Redis health check failed: {}", e)))
    }
}

/// In-process cache used when no Redis URL is configured and in tests.
/// A zero TTL never expires, matching `SET` without `EX`.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

struct CacheEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Live entries only.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<String, CacheError> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Err(CacheError::NotFound)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = self.clock.now();
        let expires_at = if ttl.is_zero() {
            None
        } else {
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|e| anyhow::anyhow!("Cache TTL out of range: {}", e))?;
            Some(now + ttl)
        };

        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let now = self.clock.now();
        match self.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired(now) => Ok(()),
            _ => Err(CacheError::NotFound),
        }
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Maps a derived cache key to a resolved user id.
#[derive(Clone)]
pub struct IdentityCache {
    store: Arc<dyn CacheStore>,
}

impl IdentityCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, key: &str) -> Result<i64, CacheError> {
        let raw = self.store.get(key).await?;
        raw.parse::<i64>().map_err(|e| {
            CacheError::Backend(anyhow::anyhow!("Cached user id '{}' is not a number: {}", raw, e))
        })
    }

    pub async fn set(&self, key: &str, user_id: i64, ttl: Duration) -> Result<(), CacheError> {
        self.store.set(key, &user_id.to_string(), ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.delete(key).await
    }

    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.store.health_check().await
    }
}
