//! Cache-aside operations over a [`CacheStore`], with JSON values.
//!
//! The enabled flag is fixed at construction. A disabled layer behaves as a
//! total miss and never touches a store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::{CacheError, CacheResult};
use super::memory::MemoryCacheStore;
use super::store::CacheStore;
use crate::config::{CacheConfig, StoreKind};
use crate::resolver::Resolver;

#[derive(Clone)]
pub struct CacheLayer {
    store: Option<Arc<dyn CacheStore>>,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("enabled", &self.is_enabled())
            .field("store", &self.store.as_ref().map(|s| s.name()))
            .finish()
    }
}

impl CacheLayer {
    /// Enabled layer over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store: Some(store) }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Builds the layer described by `config`, resolving and health-checking
    /// the store when the cache is enabled.
    ///
    /// # Errors
    ///
    /// Resolution, connection or health-check failures of an enabled store.
    pub async fn from_config(config: &CacheConfig, resolver: &Resolver) -> CacheResult<Self> {
        if !config.enabled {
            info!("cache layer disabled");
            return Ok(Self::disabled());
        }
        let store: Arc<dyn CacheStore> = match config.store {
            StoreKind::Memory => Arc::new(MemoryCacheStore::new()),
            StoreKind::Redis => Self::redis_store(config, resolver).await?,
        };
        store.health_check().await?;
        info!(store = store.name(), "cache layer ready");
        Ok(Self::new(store))
    }

    #[cfg(feature = "redis")]
    async fn redis_store(config: &CacheConfig, resolver: &Resolver) -> CacheResult<Arc<dyn CacheStore>> {
        let endpoint = resolver
            .resolve(&config.redis.logical_name, &config.redis.host)
            .await?;
        let store = super::redis::RedisCacheStore::connect(
            &endpoint,
            config.database,
            config.password.as_deref(),
        )
        .await?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "redis"))]
    async fn redis_store(_config: &CacheConfig, _resolver: &Resolver) -> CacheResult<Arc<dyn CacheStore>> {
        Err(CacheError::Connection(
            "built without the `redis` feature".to_string(),
        ))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Stores `data` under `key` and hands it back. Disabled: returns `data`
    /// untouched.
    ///
    /// # Errors
    ///
    /// Serialization or store failures.
    pub async fn set_cache<T: Serialize>(
        &self,
        key: &str,
        data: T,
        expiration_secs: Option<u64>,
    ) -> CacheResult<T> {
        let Some(store) = &self.store else {
            return Ok(data);
        };
        let text = serde_json::to_string(&data)?;
        store
            .set(key, &text, expiration_secs.map(Duration::from_secs))
            .await?;
        Ok(data)
    }

    /// Cached value for `key`, or `None` on a miss or when disabled.
    ///
    /// # Errors
    ///
    /// Store failures, or a stored value that does not decode as `T`.
    pub async fn get_cache<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        match store.get(key).await? {
            Some(text) => {
                metrics::counter!(crate::telemetry::CACHE_HITS).increment(1);
                debug!(key, "cache hit");
                Ok(Some(serde_json::from_str(&text)?))
            }
            None => {
                metrics::counter!(crate::telemetry::CACHE_MISSES).increment(1);
                debug!(key, "cache miss");
                Ok(None)
            }
        }
    }

    /// Returns the cached value for `key`, or calls `provider` once, stores
    /// its result and returns it.
    ///
    /// Concurrent misses on the same key each call their provider; there is
    /// no per-key locking.
    ///
    /// # Errors
    ///
    /// The provider's error, or any cache error converted into `E`.
    pub async fn get_cache_or_store<T, E, F, Fut>(
        &self,
        key: &str,
        expiration_secs: Option<u64>,
        provider: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get_cache(key).await? {
            return Ok(hit);
        }
        let fresh = provider().await?;
        Ok(self.set_cache(key, fresh, expiration_secs).await?)
    }

    /// Deletes `key`, returning how many entries were removed.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn expire_cache(&self, key: &str) -> CacheResult<u64> {
        match &self.store {
            Some(store) => store.delete(key).await,
            None => Ok(0),
        }
    }

    /// Deletes every key starting with `prefix`. Failures are logged and
    /// skipped.
    pub async fn expire_caches(&self, prefix: &str) {
        let Some(store) = &self.store else {
            return;
        };
        let keys = match store.keys_with_prefix(prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(prefix, error = %e, "failed to enumerate cache keys");
                return;
            }
        };
        let mut removed = 0u64;
        for key in &keys {
            match store.delete(key).await {
                Ok(n) => removed += n,
                Err(e) => warn!(key = %key, error = %e, "failed to expire cache key"),
            }
        }
        debug!(prefix, matched = keys.len(), removed, "expired cache prefix");
    }
}
