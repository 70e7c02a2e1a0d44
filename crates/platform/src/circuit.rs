use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use taskbridge_core::domain::{AllowlistId, CommunityId, TaskId};

use crate::client::PlatformApi;
use crate::error::PlatformError;
use crate::types::{
    AllowlistInfo, Community, EntryReceipt, NewTask, NotificationPayload, PlatformTask,
    TaskCompletion,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Guards the Platform API against hammering an upstream that is already
/// failing. After `failure_threshold` consecutive failures the circuit
/// opens; once `open_for` elapses the next call probes in half-open state.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_threshold: u32,
    failure_count: u32,
    open_for: Duration,
    opened_at: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_for: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_threshold: failure_threshold.max(1),
            failure_count: 0,
            open_for,
            opened_at: None,
        }
    }

    /// True when a call may proceed. Moves an expired open circuit to
    /// half-open as a side effect.
    pub fn allow(&mut self) -> bool {
        if self.state == CircuitState::Open {
            let expired = self
                .opened_at
                .map(|at| at.elapsed() >= self.open_for)
                .unwrap_or(true);
            if expired {
                debug!(event_name = "circuit_half_open", "probing the Platform API");
                self.state = CircuitState::HalfOpen;
            }
        }
        self.state != CircuitState::Open
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            debug!(event_name = "circuit_closed", "Platform API recovered");
        }
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                warn!(event_name = "circuit_reopened", "probe failed, circuit reopened");
                self.open();
            }
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    warn!(
                        event_name = "circuit_opened",
                        failures = self.failure_count,
                        "Platform API circuit opened"
                    );
                    self.open();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.failure_count = self.failure_threshold;
        self.opened_at = Some(Instant::now());
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }
}

/// Wraps a Platform client so every call passes through one shared breaker.
/// Calls rejected while the circuit is open fail fast with `CircuitOpen`
/// and do not extend the failure streak.
pub struct GuardedPlatform {
    inner: Arc<dyn PlatformApi>,
    breaker: Mutex<CircuitBreaker>,
}

impl GuardedPlatform {
    pub fn new(inner: Arc<dyn PlatformApi>, breaker: CircuitBreaker) -> Self {
        Self { inner, breaker: Mutex::new(breaker) }
    }

    pub async fn state(&self) -> CircuitState {
        self.breaker.lock().await.state()
    }

    async fn admit(&self) -> Result<(), PlatformError> {
        if self.breaker.lock().await.allow() {
            Ok(())
        } else {
            Err(PlatformError::CircuitOpen)
        }
    }

    async fn settle<T>(
        &self,
        result: Result<T, PlatformError>,
    ) -> Result<T, PlatformError> {
        let mut breaker = self.breaker.lock().await;
        match &result {
            Ok(_) => breaker.record_success(),
            Err(_) => breaker.record_failure(),
        }
        result
    }
}

#[async_trait]
impl PlatformApi for GuardedPlatform {
    async fn validate_auth(&self) -> Result<(), PlatformError> {
        self.admit().await?;
        let result = self.inner.validate_auth().await;
        self.settle(result).await
    }

    async fn validate_ownership(
        &self,
        community_id: &CommunityId,
        platform_user_id: &str,
    ) -> Result<bool, PlatformError> {
        self.admit().await?;
        let result = self.inner.validate_ownership(community_id, platform_user_id).await;
        self.settle(result).await
    }

    async fn get_community(
        &self,
        community_id: &CommunityId,
    ) -> Result<Community, PlatformError> {
        self.admit().await?;
        let result = self.inner.get_community(community_id).await;
        self.settle(result).await
    }

    async fn notify(
        &self,
        community_id: &CommunityId,
        payload: &NotificationPayload,
    ) -> Result<(), PlatformError> {
        self.admit().await?;
        let result = self.inner.notify(community_id, payload).await;
        self.settle(result).await
    }

    async fn list_tasks(
        &self,
        community_id: &CommunityId,
    ) -> Result<Vec<PlatformTask>, PlatformError> {
        self.admit().await?;
        let result = self.inner.list_tasks(community_id).await;
        self.settle(result).await
    }

    async fn create_task(
        &self,
        task: &NewTask,
    ) -> Result<PlatformTask, PlatformError> {
        self.admit().await?;
        let result = self.inner.create_task(task).await;
        self.settle(result).await
    }

    async fn get_task(
        &self,
        task_id: &TaskId,
    ) -> Result<PlatformTask, PlatformError> {
        self.admit().await?;
        let result = self.inner.get_task(task_id).await;
        self.settle(result).await
    }

    async fn complete_task(
        &self,
        task_id: &TaskId,
        platform_user_id: &str,
    ) -> Result<TaskCompletion, PlatformError> {
        self.admit().await?;
        let result = self.inner.complete_task(task_id, platform_user_id).await;
        self.settle(result).await
    }

    async fn get_allowlist(
        &self,
        allowlist_id: &AllowlistId,
    ) -> Result<AllowlistInfo, PlatformError> {
        self.admit().await?;
        let result = self.inner.get_allowlist(allowlist_id).await;
        self.settle(result).await
    }

    async fn enter_allowlist(
        &self,
        allowlist_id: &AllowlistId,
        platform_user_id: &str,
    ) -> Result<EntryReceipt, PlatformError> {
        self.admit().await?;
        let result = self.inner.enter_allowlist(allowlist_id, platform_user_id).await;
        self.settle(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..2 {
            breaker.record_failure();
            assert!(breaker.allow());
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_after_window() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure();
        assert!(!breaker.allow());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_success_closes_failure_reopens() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.allow());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_platform_fails_fast_once_open() {
        let scripted = Arc::new(crate::ScriptedPlatform::new());
        for _ in 0..2 {
            scripted
                .script_auth(Err(PlatformError::Status {
                    endpoint: "auth/validate".to_owned(),
                    status: 500,
                    message: "internal error".to_owned(),
                }))
                .await;
        }
        let guarded =
            GuardedPlatform::new(scripted.clone(), CircuitBreaker::new(2, Duration::from_secs(30)));

        assert!(guarded.validate_auth().await.is_err());
        assert!(guarded.validate_auth().await.is_err());
        let rejected = guarded.validate_auth().await;

        assert!(matches!(rejected, Err(PlatformError::CircuitOpen)));
        assert_eq!(scripted.calls().await.len(), 2);
        assert_eq!(guarded.state().await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_platform_recovers_through_a_half_open_probe() {
        let scripted = Arc::new(crate::ScriptedPlatform::new());
        scripted
            .script_auth(Err(PlatformError::Status {
                endpoint: "auth/validate".to_owned(),
                status: 500,
                message: "internal error".to_owned(),
            }))
            .await;
        let guarded =
            GuardedPlatform::new(scripted.clone(), CircuitBreaker::new(1, Duration::from_secs(30)));

        assert!(guarded.validate_auth().await.is_err());
        assert_eq!(guarded.state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(guarded.validate_auth().await.is_ok());
        assert_eq!(guarded.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_streak() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
