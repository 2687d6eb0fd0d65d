//! Cache stores for serialized weather payloads.
//!
//! [`RedisCache`] is the shared production store. [`MemoryCache`] keeps
//! entries in-process and backs tests and `memory://` deployments.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use skycache_core::CacheConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::CacheError;
use crate::types::CacheKey;

/// Connection string selecting the in-process store.
pub const MEMORY_URL: &str = "memory://";

/// Key-value store with per-entry expiry.
///
/// `get` returns `Ok(None)` for an absent or expired key. `Err` always means
/// the store itself failed.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError>;

    /// Overwrite unconditionally and reset the expiry.
    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Open the store named by `config.url`.
pub async fn open_store(config: &CacheConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    let url = config.connection_url();
    if url.starts_with(MEMORY_URL) {
        tracing::info!("Using in-process cache store");
        return Ok(Arc::new(MemoryCache::new()));
    }

    let store = RedisCache::connect(&url).await?;
    Ok(Arc::new(store))
}

/// Redis-backed store. The connection manager reconnects on its own and is
/// shared by every request.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("invalid connection string: {}", e)))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key.as_str()).await?;
        Ok(value)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        // SETEX rejects 0.
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key.as_str(), value, seconds).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process store. Expiry follows the tokio clock.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of a live entry.
    pub fn ttl(&self, key: &CacheKey) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key.as_str())
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at - now)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key.as_str()) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key.as_str());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = MemoryEntry {
            value,
            expires_at: now + ttl,
        };

        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(key.as_str().to_string(), entry);
        Ok(())
    }
}
