//! Cache gateway for the bot: TTL blobs, increment-with-expiry counters,
//! and exactly-once staging state for modal flows.
//!
//! The [`CacheStore`] trait is the process boundary. The in-memory
//! implementation backs tests and single-node deployments; a Redis-shaped
//! implementation would slot in behind the same trait.

pub mod limiter;
pub mod memory;
pub mod staging;
pub mod store;

pub use limiter::{RateDecision, RateLimiter, RateLimits};
pub use memory::InMemoryCacheStore;
pub use staging::{StagedTaskDraft, TaskStaging, STAGING_TTL};
pub use store::{CacheError, CacheStore, CounterSample};
