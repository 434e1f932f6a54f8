//! Key-value store seam under the cache layer.

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheResult;

/// Text values keyed by string, with optional whole-second TTL.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores `value`; `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Removes `key`, returning how many entries were deleted (0 or 1).
    async fn delete(&self, key: &str) -> CacheResult<u64>;

    /// Every live key starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;

    async fn health_check(&self) -> CacheResult<()>;

    fn name(&self) -> &'static str;
}
