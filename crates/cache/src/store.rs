use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache value could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of bumping an increment-with-expiry counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterSample {
    /// Count within the current window, including this event.
    pub count: u64,
    /// Time until the window resets.
    pub expires_in: Duration,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Stores a JSON blob under `key`, replacing any prior value and TTL.
    async fn put_blob(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Reads a blob without consuming it. Expired entries read as absent.
    async fn get_blob(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    /// Removes and returns a blob. At most one caller observes the value.
    async fn take_blob(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    async fn remove_blob(&self, key: &str) -> Result<(), CacheError>;

    /// Increments the counter at `key`, starting a fresh window of length
    /// `window` when the key is absent or expired.
    async fn increment(&self, key: &str, window: Duration)
        -> Result<CounterSample, CacheError>;
}
