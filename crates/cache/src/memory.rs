use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::store::{CacheError, CacheStore, CounterSample};

struct BlobEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// Monotonic-clock in-memory cache. Expired entries are dropped lazily on
/// access, so an idle process holds stale keys only until the next touch.
#[derive(Default)]
pub struct InMemoryCacheStore {
    blobs: Mutex<HashMap<String, BlobEntry>>,
    counters: Mutex<HashMap<String, CounterEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn put_blob(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        blobs.insert(key.to_owned(), BlobEntry { value, expires_at: Instant::now() + ttl });
        Ok(())
    }

    async fn get_blob(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match blobs.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                blobs.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn take_blob(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match blobs.remove(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    async fn remove_blob(&self, key: &str) -> Result<(), CacheError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        blobs.remove(key);
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<CounterSample, CacheError> {
        let mut counters = self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();

        let entry = match counters.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.count += 1;
                entry
            }
            _ => {
                counters.insert(key.to_owned(), CounterEntry { count: 1, expires_at: now + window });
                counters.get_mut(key).ok_or_else(|| {
                    CacheError::Unavailable("counter vanished after insert".to_string())
                })?
            }
        };

        Ok(CounterSample { count: entry.count, expires_in: entry.expires_at - now })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn blob_expires_after_ttl() {
        let store = InMemoryCacheStore::new();
        store
            .put_blob("k", serde_json::json!({"a": 1}), Duration::from_secs(10))
            .await
            .expect("put");

        assert!(store.get_blob("k").await.expect("get").is_some());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get_blob("k").await.expect("get").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn take_is_exactly_once() {
        let store = InMemoryCacheStore::new();
        store
            .put_blob("k", serde_json::json!("v"), Duration::from_secs(60))
            .await
            .expect("put");

        assert!(store.take_blob("k").await.expect("take").is_some());
        assert!(store.take_blob("k").await.expect("take").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn take_refuses_expired_entries() {
        let store = InMemoryCacheStore::new();
        store
            .put_blob("k", serde_json::json!("v"), Duration::from_secs(5))
            .await
            .expect("put");

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.take_blob("k").await.expect("take").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn counter_resets_after_window() {
        let store = InMemoryCacheStore::new();
        let window = Duration::from_secs(60);

        for expected in 1..=3 {
            let sample = store.increment("c", window).await.expect("increment");
            assert_eq!(sample.count, expected);
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        let sample = store.increment("c", window).await.expect("increment");
        assert_eq!(sample.count, 1, "fresh window starts at one");
    }

    #[tokio::test(start_paused = true)]
    async fn counter_reports_time_to_reset() {
        let store = InMemoryCacheStore::new();
        let window = Duration::from_secs(60);

        store.increment("c", window).await.expect("increment");
        tokio::time::advance(Duration::from_secs(20)).await;
        let sample = store.increment("c", window).await.expect("increment");

        assert_eq!(sample.count, 2);
        assert_eq!(sample.expires_in, Duration::from_secs(40));
    }
}
