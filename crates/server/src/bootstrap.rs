use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use taskbridge_cache::{CacheStore, InMemoryCacheStore, RateLimiter, RateLimits, TaskStaging};
use taskbridge_core::audit::TracingAuditSink;
use taskbridge_core::classify::{ClassifierThresholds, ErrorClassifier};
use taskbridge_core::config::{AppConfig, ConfigError};
use taskbridge_core::cooldown::CooldownMap;
use taskbridge_core::permissions::PermissionEvaluator;
use taskbridge_core::security::SecurityMonitor;
use taskbridge_core::EventCategory;
use taskbridge_db::repositories::{
    SqlAllowlistRepository, SqlInteractionLogRepository, SqlServerLinkRepository,
    SqlTaskPostRepository, SqlUserLinkRepository,
};
use taskbridge_db::{
    connect_with_settings, migrations, AllowlistRepository, CleanupJob, DbPool,
    InteractionLogRepository, ServerLinkRepository, TaskPostRepository, UserLinkRepository,
};
use taskbridge_discord::handlers::{
    AllowlistAnalyticsHandler, CompleteTaskHandler, ConnectAllowlistHandler, CreateTaskHandler,
    CreateTaskModalHandler, EnterAllowlistHandler, HelpButtonHandler, HelpHandler,
    LinkCommunityHandler, ListTasksHandler, RefreshStatusHandler, RelinkCommunityHandler,
    SecurityHandler, StatusHandler, StatusPanel, TestConnectionHandler, UnlinkCommunityHandler,
    ViewAllowlistHandler, ViewTaskHandler,
};
use taskbridge_discord::{
    ChatPort, ChatPortEditor, FallbackResponder, GatewayRunner, HandlerRegistry,
    InteractionPipeline, NoopChat, NoopGatewayTransport, PipelineServices, RealtimeSync,
    ReconnectPolicy,
};
use taskbridge_platform::{
    CircuitBreaker, GuardedPlatform, PlatformApi, PlatformClient, PlatformError, RetryConfig,
    RetryExecutor,
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub gateway_runner: GatewayRunner,
    pub sync: Arc<RealtimeSync>,
    pub cleanup: Arc<CleanupJob>,
    pub platform: Arc<dyn PlatformApi>,
    pub chat: Arc<dyn ChatPort>,
    pub cache: Arc<dyn CacheStore>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("platform client setup failed: {0}")]
    Platform(#[source] PlatformError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let links: Arc<dyn ServerLinkRepository> =
        Arc::new(SqlServerLinkRepository::new(db_pool.clone()));
    let users: Arc<dyn UserLinkRepository> = Arc::new(SqlUserLinkRepository::new(db_pool.clone()));
    let posts: Arc<dyn TaskPostRepository> = Arc::new(SqlTaskPostRepository::new(db_pool.clone()));
    let allowlists: Arc<dyn AllowlistRepository> =
        Arc::new(SqlAllowlistRepository::new(db_pool.clone()));
    let logs: Arc<dyn InteractionLogRepository> =
        Arc::new(SqlInteractionLogRepository::new(db_pool.clone()));

    let cache: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
    let limiter = RateLimiter::new(cache.clone(), RateLimits::from_config(&config.cache));
    let staging = Arc::new(TaskStaging::with_ttl(
        cache.clone(),
        Duration::from_secs(config.cache.staging_ttl_secs),
    ));

    let classifier = Arc::new(ErrorClassifier::new(ClassifierThresholds::default()));
    let client = PlatformClient::new(&config.platform).map_err(BootstrapError::Platform)?;
    let platform: Arc<dyn PlatformApi> =
        Arc::new(GuardedPlatform::new(Arc::new(client), CircuitBreaker::default()));
    let retry = Arc::new(RetryExecutor::new(
        RetryConfig { max_retries: config.platform.max_retries, ..RetryConfig::default() },
        classifier.clone(),
    ));

    let chat: Arc<dyn ChatPort> = Arc::new(NoopChat);
    let fallback = Arc::new(FallbackResponder::new(config.urls.clone()));

    let pipeline = Arc::new(InteractionPipeline::new(PipelineServices {
        permissions: PermissionEvaluator::new(chrono::Duration::days(
            config.security.account_age_floor_days,
        )),
        limiter,
        cooldowns: CooldownMap::default(),
        classifier,
        security: SecurityMonitor::default(),
        audit: Arc::new(TracingAuditSink),
        logs: logs.clone(),
        links: links.clone(),
        fallback,
        registry: build_registry(
            &config,
            links.clone(),
            users.clone(),
            posts.clone(),
            allowlists.clone(),
            logs.clone(),
            staging,
            platform.clone(),
            retry,
            chat.clone(),
        ),
        chat: chat.clone(),
    }));

    let gateway_runner =
        GatewayRunner::new(Arc::new(NoopGatewayTransport), pipeline, ReconnectPolicy::default());

    let sync = Arc::new(RealtimeSync::new(
        links,
        posts.clone(),
        allowlists.clone(),
        Arc::new(ChatPortEditor::new(chat.clone())),
    ));
    let cleanup = Arc::new(CleanupJob::new(logs, users, posts, allowlists));

    info!(
        event_name = "system.bootstrap.complete",
        correlation_id = "bootstrap",
        "application bootstrap complete"
    );

    Ok(Application {
        config,
        db_pool,
        gateway_runner,
        sync,
        cleanup,
        platform,
        chat,
        cache,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_registry(
    config: &AppConfig,
    links: Arc<dyn ServerLinkRepository>,
    users: Arc<dyn UserLinkRepository>,
    posts: Arc<dyn TaskPostRepository>,
    allowlists: Arc<dyn AllowlistRepository>,
    logs: Arc<dyn InteractionLogRepository>,
    staging: Arc<TaskStaging>,
    platform: Arc<dyn PlatformApi>,
    retry: Arc<RetryExecutor>,
    chat: Arc<dyn ChatPort>,
) -> HandlerRegistry {
    let panel = Arc::new(StatusPanel::new(
        links.clone(),
        posts.clone(),
        allowlists.clone(),
        platform.clone(),
        retry.clone(),
    ));
    let help_buttons = Arc::new(HelpButtonHandler::new(config.urls.clone()));

    let mut registry = HandlerRegistry::new();
    registry.register(
        EventCategory::Command,
        "link-community",
        Arc::new(LinkCommunityHandler::new(
            links.clone(),
            users.clone(),
            platform.clone(),
            retry.clone(),
        )),
    );
    registry.register(
        EventCategory::Command,
        "create-task",
        Arc::new(CreateTaskHandler::new(staging.clone())),
    );
    registry.register(
        EventCategory::Command,
        "list-tasks",
        Arc::new(ListTasksHandler::new(
            links.clone(),
            posts.clone(),
            platform.clone(),
            retry.clone(),
        )),
    );
    registry.register(
        EventCategory::Command,
        "connect-allowlist",
        Arc::new(ConnectAllowlistHandler::new(
            links.clone(),
            allowlists.clone(),
            platform.clone(),
            retry.clone(),
            chat.clone(),
        )),
    );
    registry.register(
        EventCategory::Command,
        "status",
        Arc::new(StatusHandler::new(panel.clone())),
    );
    registry.register(
        EventCategory::Command,
        "help",
        Arc::new(HelpHandler::new(config.urls.clone())),
    );
    registry.register(
        EventCategory::Command,
        "allowlist-analytics",
        Arc::new(AllowlistAnalyticsHandler::new(allowlists.clone())),
    );
    registry.register(EventCategory::Command, "security", Arc::new(SecurityHandler::new(logs)));

    registry.register(
        EventCategory::Modal,
        "create_task_modal",
        Arc::new(CreateTaskModalHandler::new(
            staging,
            links.clone(),
            posts.clone(),
            platform.clone(),
            chat.clone(),
        )),
    );

    registry.register(
        EventCategory::Button,
        "complete_task",
        Arc::new(CompleteTaskHandler::new(posts.clone(), users.clone(), platform.clone())),
    );
    registry.register(
        EventCategory::Button,
        "view_task",
        Arc::new(ViewTaskHandler::new(posts)),
    );
    registry.register(
        EventCategory::Button,
        "enter_allowlist",
        Arc::new(EnterAllowlistHandler::new(allowlists.clone(), users.clone(), platform.clone())),
    );
    registry.register(
        EventCategory::Button,
        "view_allowlist",
        Arc::new(ViewAllowlistHandler::new(allowlists)),
    );
    registry.register(
        EventCategory::Button,
        "unlink_community",
        Arc::new(UnlinkCommunityHandler::new(links.clone(), platform.clone())),
    );
    registry.register(
        EventCategory::Button,
        "relink_community",
        Arc::new(RelinkCommunityHandler::new(links, users, platform.clone(), retry)),
    );
    registry.register(
        EventCategory::Button,
        "test_connection",
        Arc::new(TestConnectionHandler::new(platform)),
    );
    registry.register(
        EventCategory::Button,
        "refresh_status",
        Arc::new(RefreshStatusHandler::new(panel, chat)),
    );
    registry.register(EventCategory::Button, "link_community_help", help_buttons.clone());
    registry.register(EventCategory::Button, "help_commands", help_buttons.clone());
    registry.register(EventCategory::Button, "help_setup", help_buttons);

    registry
}

#[cfg(test)]
mod tests {
    use taskbridge_core::config::{AppConfig, ConfigOverrides, LoadOptions};

    use super::bootstrap_with_config;

    fn valid_config(database_url: &str) -> AppConfig {
        AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                cache_url: Some("memory://".to_string()),
                platform_base_url: Some("https://platform.test".to_string()),
                platform_api_key: Some("test-key".to_string()),
                discord_bot_token: Some("test-token".to_string()),
                discord_app_id: Some("A1".to_string()),
                token_seal_key: Some("0".repeat(64)),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .expect("config should load with valid overrides")
    }

    #[tokio::test]
    async fn bootstrap_wires_every_interaction_surface() {
        let app = bootstrap_with_config(valid_config("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('server_links', 'user_links', 'task_posts', \
              'allowlist_connections', 'interaction_logs')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables should exist after bootstrap");
        assert_eq!(table_count, 5);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn config_without_a_seal_key_is_rejected() {
        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                cache_url: Some("memory://".to_string()),
                platform_base_url: Some("https://platform.test".to_string()),
                platform_api_key: Some("test-key".to_string()),
                discord_bot_token: Some("test-token".to_string()),
                discord_app_id: Some("A1".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let message = result.err().expect("validation error").to_string();
        assert!(message.contains("token_seal_key"));
    }
}
