use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use taskbridge_cache::CacheStore;
use taskbridge_db::DbPool;
use taskbridge_discord::ChatPort;
use taskbridge_platform::PlatformApi;

const PROBE_BUDGET: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ServiceProbe: Send + Sync {
    fn name(&self) -> &'static str;
    async fn probe(&self) -> Result<(), String>;
}

pub struct DatabaseProbe {
    pool: DbPool,
}

impl DatabaseProbe {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceProbe for DatabaseProbe {
    fn name(&self) -> &'static str {
        "persistence"
    }

    async fn probe(&self) -> Result<(), String> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(|error| format!("database query failed: {error}"))
    }
}

pub struct CacheProbe {
    store: Arc<dyn CacheStore>,
}

impl CacheProbe {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ServiceProbe for CacheProbe {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn probe(&self) -> Result<(), String> {
        self.store
            .put_blob("health_probe", serde_json::json!("ok"), Duration::from_secs(10))
            .await
            .map_err(|error| format!("cache write failed: {error}"))
    }
}

pub struct PlatformProbe {
    platform: Arc<dyn PlatformApi>,
}

impl PlatformProbe {
    pub fn new(platform: Arc<dyn PlatformApi>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl ServiceProbe for PlatformProbe {
    fn name(&self) -> &'static str {
        "platform"
    }

    async fn probe(&self) -> Result<(), String> {
        self.platform
            .validate_auth()
            .await
            .map_err(|error| format!("auth validation failed: {error}"))
    }
}

pub struct ChatProbe {
    chat: Arc<dyn ChatPort>,
}

impl ChatProbe {
    pub fn new(chat: Arc<dyn ChatPort>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl ServiceProbe for ChatProbe {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn probe(&self) -> Result<(), String> {
        self.chat
            .defer(&taskbridge_core::domain::EventId::from("health_probe"))
            .await
            .map_err(|error| format!("chat transport failed: {error}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthRating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl HealthRating {
    fn from_score(healthy: usize) -> Self {
        match healthy {
            4.. => Self::Excellent,
            3 => Self::Good,
            2 => Self::Fair,
            _ => Self::Poor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub name: &'static str,
    pub status: &'static str,
    pub detail: String,
    /// Consecutive failures including this one; zero when ready.
    pub failure_streak: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub rating: HealthRating,
    pub checks: Vec<ProbeResult>,
    pub checked_at: String,
}

/// Runs all probes under one time budget and aggregates a score of 0 to 4
/// healthy services. A drop from the previous rating is logged and published
/// to rating subscribers.
pub struct HealthMonitor {
    probes: Vec<Arc<dyn ServiceProbe>>,
    budget: Duration,
    streaks: Mutex<HashMap<&'static str, u32>>,
    ratings: tokio::sync::watch::Sender<HealthRating>,
}

impl HealthMonitor {
    pub fn new(probes: Vec<Arc<dyn ServiceProbe>>) -> Self {
        let (ratings, _) = tokio::sync::watch::channel(HealthRating::Excellent);
        Self { probes, budget: PROBE_BUDGET, streaks: Mutex::new(HashMap::new()), ratings }
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<HealthRating> {
        self.ratings.subscribe()
    }

    pub async fn check(&self) -> HealthReport {
        let mut checks = Vec::with_capacity(self.probes.len());
        let mut streaks = self.streaks.lock().await;

        for probe in &self.probes {
            let outcome = match tokio::time::timeout(self.budget, probe.probe()).await {
                Ok(result) => result,
                Err(_) => Err(format!("probe exceeded {}s budget", self.budget.as_secs())),
            };
            let entry = streaks.entry(probe.name()).or_insert(0);
            let result = match outcome {
                Ok(()) => {
                    *entry = 0;
                    ProbeResult {
                        name: probe.name(),
                        status: "ready",
                        detail: "probe succeeded".to_string(),
                        failure_streak: 0,
                    }
                }
                Err(detail) => {
                    *entry += 1;
                    warn!(
                        event_name = "health_probe_failed",
                        service = probe.name(),
                        failure_streak = *entry,
                        detail = detail.as_str(),
                        "service probe failed"
                    );
                    ProbeResult {
                        name: probe.name(),
                        status: "degraded",
                        detail,
                        failure_streak: *entry,
                    }
                }
            };
            checks.push(result);
        }
        drop(streaks);

        let healthy = checks.iter().filter(|check| check.status == "ready").count();
        let rating = HealthRating::from_score(healthy);
        let previous = self.ratings.send_replace(rating);
        if rating < previous {
            warn!(
                event_name = "health_degraded",
                from = previous.as_str(),
                to = rating.as_str(),
                healthy,
                "aggregate health dropped"
            );
        }

        HealthReport {
            status: if rating >= HealthRating::Good { "ready" } else { "degraded" },
            rating,
            checks,
            checked_at: Utc::now().to_rfc3339(),
        }
    }
}

pub fn router(monitor: Arc<HealthMonitor>) -> Router {
    Router::new().route("/health", get(health)).with_state(monitor)
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    monitor: Arc<HealthMonitor>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(monitor)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(
    State(monitor): State<Arc<HealthMonitor>>,
) -> (StatusCode, Json<HealthReport>) {
    let report = monitor.check().await;
    let status_code = if report.status == "ready" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(report))
}
