use std::sync::Arc;
use std::time::Duration;

use taskbridge_core::config::CacheConfig;
use taskbridge_core::domain::interaction::EventCategory;
use taskbridge_core::domain::UserId;

use crate::store::{CacheError, CacheStore};

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug)]
pub struct RateLimits {
    pub command_per_minute: u32,
    pub button_per_minute: u32,
    pub modal_per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self { command_per_minute: 5, button_per_minute: 10, modal_per_minute: 10 }
    }
}

impl RateLimits {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            command_per_minute: config.command_limit_per_minute,
            button_per_minute: config.button_limit_per_minute,
            modal_per_minute: config.modal_limit_per_minute,
        }
    }

    fn limit_for(&self, category: EventCategory) -> u32 {
        match category {
            EventCategory::Command => self.command_per_minute,
            EventCategory::Button | EventCategory::Menu => self.button_per_minute,
            EventCategory::Modal => self.modal_per_minute,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Per-(subject, event class) sliding window backed by cache counters.
pub struct RateLimiter {
    store: Arc<dyn CacheStore>,
    limits: RateLimits,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CacheStore>, limits: RateLimits) -> Self {
        Self { store, limits }
    }

    /// Records one event for `subject` and decides whether it may proceed.
    /// The event at exactly the limit is still allowed; the next one is not.
    pub async fn check(
        &self,
        subject: &UserId,
        category: EventCategory,
    ) -> Result<RateDecision, CacheError> {
        let key = format!("rate_{}_{}", category.as_str(), subject.as_str());
        let sample = self.store.increment(&key, WINDOW).await?;
        let limit = u64::from(self.limits.limit_for(category));

        if sample.count <= limit {
            Ok(RateDecision::Allowed)
        } else {
            Ok(RateDecision::Limited { retry_after: sample.expires_in })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCacheStore;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(InMemoryCacheStore::new()), RateLimits::default())
    }

    #[tokio::test(start_paused = true)]
    async fn fifth_command_allowed_sixth_limited() {
        let limiter = limiter();
        let user = UserId::from("u1");

        for _ in 0..5 {
            let decision = limiter.check(&user, EventCategory::Command).await.expect("check");
            assert_eq!(decision, RateDecision::Allowed);
        }

        let decision = limiter.check(&user, EventCategory::Command).await.expect("check");
        assert!(matches!(decision, RateDecision::Limited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn classes_are_counted_separately() {
        let limiter = limiter();
        let user = UserId::from("u1");

        for _ in 0..5 {
            limiter.check(&user, EventCategory::Command).await.expect("check");
        }

        let decision = limiter.check(&user, EventCategory::Button).await.expect("check");
        assert_eq!(decision, RateDecision::Allowed, "button window is independent");
    }

    #[tokio::test(start_paused = true)]
    async fn subjects_are_counted_separately() {
        let limiter = limiter();

        for _ in 0..6 {
            limiter.check(&UserId::from("u1"), EventCategory::Command).await.expect("check");
        }

        let decision =
            limiter.check(&UserId::from("u2"), EventCategory::Command).await.expect("check");
        assert_eq!(decision, RateDecision::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn window_reset_allows_again() {
        let limiter = limiter();
        let user = UserId::from("u1");

        for _ in 0..6 {
            limiter.check(&user, EventCategory::Command).await.expect("check");
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        let decision = limiter.check(&user, EventCategory::Command).await.expect("check");
        assert_eq!(decision, RateDecision::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_tracks_window_remaining() {
        let limiter = limiter();
        let user = UserId::from("u1");

        for _ in 0..5 {
            limiter.check(&user, EventCategory::Command).await.expect("check");
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        match limiter.check(&user, EventCategory::Command).await.expect("check") {
            RateDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            RateDecision::Allowed => panic!("expected limited"),
        }
    }
}
