//! Cache-aside resolution of weather queries.
//!
//! ```text
//! lookup ─┬─ hit ── decode ─┬─ ok ────────────────────────────┐
//!         │                 └─ corrupt ─┐                     │
//!         ├─ miss ──────────────────────┴─ fetch ─ populate ─ served
//!         └─ store error ── fail (or fetch, when fail-open)
//! ```
//!
//! Concurrent misses for the same location are not coalesced: each one
//! fetches upstream and the last write wins.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::cache::CacheStore;
use crate::error::WeatherError;
use crate::provider::WeatherSource;
use crate::types::{CacheKey, LocationQuery, WeatherPayload};

pub struct WeatherResolver {
    store: Arc<dyn CacheStore>,
    source: Arc<dyn WeatherSource>,
    ttl: Duration,
    fail_open: bool,
}

impl WeatherResolver {
    pub fn new(store: Arc<dyn CacheStore>, source: Arc<dyn WeatherSource>, ttl: Duration) -> Self {
        Self {
            store,
            source,
            ttl,
            fail_open: false,
        }
    }

    /// Fetch upstream instead of failing when the cache store is unreachable.
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Serve `location` from cache, or fetch and cache it.
    #[instrument(skip_all, fields(location = %location), level = "debug")]
    pub async fn resolve(&self, location: &LocationQuery) -> Result<WeatherPayload, WeatherError> {
        let key = location.cache_key();

        match self.store.get(&key).await {
            Ok(Some(bytes)) => match WeatherPayload::from_slice(&bytes) {
                Ok(payload) => {
                    tracing::info!("Serving cached weather data for location: {}", location);
                    return Ok(payload);
                }
                Err(e) => {
                    tracing::warn!(key = %key, "Unreadable cache entry, refetching: {}", e);
                }
            },
            Ok(None) => {
                tracing::debug!(key = %key, "Cache miss");
            }
            Err(e) if self.fail_open => {
                tracing::error!(key = %key, "Cache lookup failed, bypassing cache: {}", e);
            }
            Err(e) => {
                tracing::error!(key = %key, "Cache lookup failed: {}", e);
                return Err(e.into());
            }
        }

        let payload = self.source.fetch(location).await.map_err(|e| {
            tracing::warn!("Weather fetch failed for location {}: {}", location, e);
            WeatherError::from(e)
        })?;

        self.populate(&key, &payload).await;
        tracing::info!("Fetched fresh weather data for location: {}", location);

        Ok(payload)
    }

    /// Best-effort write; failures are logged and never reach the caller.
    async fn populate(&self, key: &CacheKey, payload: &WeatherPayload) {
        let bytes = match payload.to_vec() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(key = %key, "Error serializing weather data: {}", e);
                return;
            }
        };

        if let Err(e) = self.store.set(key, bytes, self.ttl).await {
            tracing::error!(key = %key, "Error caching weather data: {}", e);
        }
    }
}
