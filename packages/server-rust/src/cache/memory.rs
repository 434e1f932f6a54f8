//! Process-local store for tests and single-node runs.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::error::CacheResult;
use super::store::CacheStore;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// `DashMap` backed store. Expired entries are dropped when their key is
/// read, and swept from the whole map on every write and prefix scan.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep_expired(&self, now: Instant) {
        self.entries.retain(|_, e| e.is_live(now));
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .and_then(|e| e.is_live(now).then(|| e.value.clone()));
        if value.is_none() {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let now = Instant::now();
        self.sweep_expired(now);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<u64> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map_or(0, |(_, e)| u64::from(e.is_live(now))))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        self.sweep_expired(Instant::now());
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn health_check(&self) -> CacheResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryCacheStore::new();
        store.set("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        store.set("forever", "v", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.get("forever").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unread_expired_entries_are_swept() {
        let store = MemoryCacheStore::new();
        for key in ["a", "b", "c"] {
            store.set(key, "v", Some(Duration::from_secs(1))).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.entries.len(), 3);

        store.set("fresh", "v", None).await.unwrap();
        assert_eq!(store.entries.len(), 1);

        store.set("short", "v", Some(Duration::from_secs(1))).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.keys_with_prefix("sh").await.unwrap().is_empty());
        assert_eq!(store.entries.len(), 1);
    }

    #[tokio::test]
    async fn prefix_scan_matches_leading_text_only() {
        let store = MemoryCacheStore::new();
        for key in ["job:1", "job:2", "jobs", "x:job:3"] {
            store.set(key, "v", None).await.unwrap();
        }
        let mut keys = store.keys_with_prefix("job:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["job:1", "job:2"]);
    }

    #[tokio::test]
    async fn delete_reports_count() {
        let store = MemoryCacheStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.delete("k").await.unwrap(), 1);
        assert_eq!(store.delete("k").await.unwrap(), 0);
    }
}
