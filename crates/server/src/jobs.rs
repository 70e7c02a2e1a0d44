use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use taskbridge_db::CleanupJob;
use taskbridge_discord::{drain_updates, PlatformUpdate, RealtimeSync};

use crate::health::HealthMonitor;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Hourly retention pass. The first tick fires immediately so a restart does
/// not push overdue cleanup a full hour out.
pub fn spawn_cleanup(cleanup: Arc<CleanupJob>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(error) = cleanup.run_once(Utc::now()).await {
                warn!(
                    event_name = "cleanup_failed",
                    error = %error,
                    "cleanup pass failed; retrying next interval"
                );
            }
        }
    })
}

/// Periodic health sweep. The monitor logs degradations and feeds its
/// subscribers; this loop just keeps it ticking between endpoint hits.
pub fn spawn_health_checks(monitor: Arc<HealthMonitor>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
        loop {
            ticker.tick().await;
            monitor.check().await;
        }
    })
}

/// Applies platform push updates to posted messages until the feed closes.
pub fn spawn_sync(
    sync: Arc<RealtimeSync>,
    mut updates: mpsc::Receiver<PlatformUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        drain_updates(&sync, &mut updates).await;
    })
}
