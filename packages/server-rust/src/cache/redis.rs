//! Redis store over a `ConnectionManager`, which reconnects on its own.

use std::time::Duration;

use async_trait::async_trait;
use fleet_core::Endpoint;
use tracing::{debug, info};

use super::error::{CacheError, CacheResult};
use super::store::CacheStore;

const SCAN_BATCH: usize = 100;

#[derive(Clone)]
pub struct RedisCacheStore {
    connection: redis::aio::ConnectionManager,
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

/// `redis://[:password@]host:port/db`
fn connection_url(endpoint: &Endpoint, database: i64, password: Option<&str>) -> String {
    match password {
        Some(password) => format!("redis://:{password}@{}/{database}", endpoint.address()),
        None => format!("redis://{}/{database}", endpoint.address()),
    }
}

/// Masks the password of a redis URL for logging.
fn redact_url(url: &str) -> String {
    if let Some(at) = url.find('@') {
        if let Some(colon) = url[..at].rfind(':') {
            return format!("{}***{}", &url[..=colon], &url[at..]);
        }
    }
    url.to_string()
}

impl RedisCacheStore {
    /// Connects to the resolved redis endpoint.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Connection` if the URL is rejected or the first
    /// connection cannot be made.
    pub async fn connect(
        endpoint: &Endpoint,
        database: i64,
        password: Option<&str>,
    ) -> CacheResult<Self> {
        let url = connection_url(endpoint, database, password);
        let client = redis::Client::open(url.as_str())
            .map_err(|e| CacheError::Connection(format!("invalid redis url: {e}")))?;
        let connection = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(format!("failed to connect to redis: {e}")))?;
        info!(url = %redact_url(&url), "redis cache connected");
        Ok(Self { connection })
    }
}

fn backend(op: &str, e: &redis::RedisError) -> CacheError {
    CacheError::Backend(format!("redis {op} failed: {e}"))
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("GET", &e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        match ttl {
            Some(ttl) => {
                let seconds = ttl.as_secs().max(1);
                redis::cmd("SETEX")
                    .arg(key)
                    .arg(seconds)
                    .arg(value)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(|e| backend("SETEX", &e))?;
            }
            None => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(|e| backend("SET", &e))?;
            }
        }
        debug!(key, "cache SET");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("DEL", &e))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| backend("SCAN", &e))?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn health_check(&self) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("PING", &e))?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Backend(format!("unexpected PING reply: {pong}")))
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_includes_database_and_optional_password() {
        let endpoint = Endpoint::new("10.0.0.5", "6380");
        assert_eq!(connection_url(&endpoint, 2, None), "redis://10.0.0.5:6380/2");
        assert_eq!(
            connection_url(&endpoint, 0, Some("hunter2")),
            "redis://:hunter2@10.0.0.5:6380/0"
        );
    }

    #[test]
    fn password_is_redacted() {
        assert_eq!(
            redact_url("redis://:hunter2@10.0.0.5:6380/0"),
            "redis://:***@10.0.0.5:6380/0"
        );
        assert_eq!(redact_url("redis://10.0.0.5:6380/0"), "redis://10.0.0.5:6380/0");
    }
}
