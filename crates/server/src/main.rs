mod bootstrap;
mod health;
mod jobs;

use std::sync::Arc;

use anyhow::Result;
use taskbridge_core::config::{AppConfig, LoadOptions};

use health::{CacheProbe, ChatProbe, DatabaseProbe, HealthMonitor, PlatformProbe, ServiceProbe};

fn init_logging(config: &AppConfig) {
    use taskbridge_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let probes: Vec<Arc<dyn ServiceProbe>> = vec![
        Arc::new(ChatProbe::new(app.chat.clone())),
        Arc::new(DatabaseProbe::new(app.db_pool.clone())),
        Arc::new(CacheProbe::new(app.cache.clone())),
        Arc::new(PlatformProbe::new(app.platform.clone())),
    ];
    let monitor = Arc::new(HealthMonitor::new(probes));

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        monitor.clone(),
    )
    .await?;
    jobs::spawn_health_checks(monitor);
    jobs::spawn_cleanup(app.cleanup.clone());

    // Ingress for platform push updates; a live transport hands out clones of
    // the sender. Dropping it at shutdown lets the drain task finish.
    let (platform_updates, platform_update_feed) = tokio::sync::mpsc::channel(256);
    let sync_job = jobs::spawn_sync(app.sync.clone(), platform_update_feed);

    app.gateway_runner.start().await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "taskbridge-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "taskbridge-server stopping"
    );
    drop(platform_updates);
    let _ = sync_job.await;

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
