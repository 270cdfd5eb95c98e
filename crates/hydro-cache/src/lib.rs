//! Redis caching layer for HydroBill
//!
//! Caches tariff version families so that a billing run over thousands of
//! accounts does not re-read the same tariff rows for every account. Entries
//! are JSON documents that expire after a TTL; there is no explicit
//! invalidation, so a newly published tariff version becomes visible once
//! the cached family expires.
//!
//! # Example
//!
//! ```no_run
//! use hydro_cache::{keys, RedisCache};
//! use hydro_core::{traits::CacheService, TenantContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = RedisCache::new("redis://127.0.0.1:6379").await?;
//!     cache.ping().await?;
//!
//!     let key = keys::tariff_versions_key(&TenantContext::new(1, 1), "DOM");
//!     cache.set(&key, &vec!["v1"], keys::TARIFF_TTL_SECS).await?;
//!     let family: Option<Vec<String>> = cache.get(&key).await?;
//!     assert_eq!(family, Some(vec!["v1".to_string()]));
//!
//!     Ok(())
//! }
//! ```

pub mod keys;

use async_trait::async_trait;
use hydro_core::error::AppError;
use hydro_core::traits::CacheService;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, trace, warn};

/// Redis cache backed by a multiplexed ConnectionManager
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns `AppError::CacheConnection` if the URL is invalid or the
    /// connection fails
    pub async fn new(url: &str) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url)
            .map_err(|e| AppError::CacheConnection(format!("Invalid Redis URL: {}", e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| redis_failure("connect", e))?;

        Ok(Self { manager })
    }

    /// Round-trip a PING, used as the start-up health check
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_failure("PING", e))?;

        if reply != "PONG" {
            return Err(AppError::Cache(format!("Unexpected PING reply: {}", reply)));
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn flush_db(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_failure("FLUSHDB", e))
    }
}

/// Classify a Redis failure; lost connections are reported separately so
/// callers can tell an outage from a bad entry
fn redis_failure(op: &str, err: RedisError) -> AppError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        error!("Redis {} failed, connection lost: {}", op, err);
        AppError::CacheConnection(format!("{}: {}", op, err))
    } else {
        warn!("Redis {} failed: {}", op, err);
        AppError::Cache(format!("{}: {}", op, err))
    }
}

#[async_trait]
impl CacheService for RedisCache {
    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let mut conn = self.manager.clone();
        let raw: Option<Vec<u8>> = conn.get(key).await.map_err(|e| redis_failure("GET", e))?;

        let Some(bytes) = raw else {
            trace!("cache miss {}", key);
            return Ok(None);
        };

        trace!("cache hit {} ({} bytes)", key, bytes.len());
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AppError::Serialization(format!("Corrupt cache entry {}: {}", key, e)))
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| AppError::Serialization(format!("Cannot cache {}: {}", key, e)))?;

        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, payload, ttl_secs.max(1))
            .await
            .map_err(|e| redis_failure("SETEX", e))?;

        trace!("cached {} for {}s", key, ttl_secs);
        Ok(())
    }
}
