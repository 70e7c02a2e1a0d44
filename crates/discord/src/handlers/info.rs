use std::sync::Arc;

use serde_json::json;

use taskbridge_core::config::UrlsConfig;
use taskbridge_core::domain::GuildId;
use taskbridge_db::{
    AllowlistRepository, InteractionLogRepository, ServerLinkRepository, TaskPostRepository,
};
use taskbridge_platform::{PlatformApi, RetryExecutor};

use crate::commands::ButtonAction;
use crate::embeds::{
    Button, ButtonStyle, EmbedBuilder, ReplyPayload, COLOR_ERROR, COLOR_INFO, COLOR_SUCCESS,
};
use crate::events::{ChatPort, GatewayEnvelope};
use crate::handlers::{HandlerContext, HandlerError, HandlerReply, InteractionHandler};

/// Shared renderer behind `/status` and the refresh button, so a refreshed
/// message looks exactly like a fresh one.
pub struct StatusPanel {
    links: Arc<dyn ServerLinkRepository>,
    posts: Arc<dyn TaskPostRepository>,
    allowlists: Arc<dyn AllowlistRepository>,
    platform: Arc<dyn PlatformApi>,
    retry: Arc<RetryExecutor>,
}

impl StatusPanel {
    pub fn new(
        links: Arc<dyn ServerLinkRepository>,
        posts: Arc<dyn TaskPostRepository>,
        allowlists: Arc<dyn AllowlistRepository>,
        platform: Arc<dyn PlatformApi>,
        retry: Arc<RetryExecutor>,
    ) -> Self {
        Self { links, posts, allowlists, platform, retry }
    }

    pub async fn render(&self, guild_id: &GuildId) -> Result<ReplyPayload, HandlerError> {
        let Some(link) = self
            .links
            .find_active_by_guild(guild_id)
            .await
            .map_err(|e| HandlerError::persistence("server_link.find_active", e))?
        else {
            return Ok(EmbedBuilder::new(
                "Server Not Linked",
                "Connect this server to a community with /link-community.",
            )
            .color(COLOR_INFO)
            .button(Button::action("link_community_help", "How do I link?", ButtonStyle::Secondary))
            .ephemeral()
            .build());
        };

        let api_reachable = self
            .retry
            .execute("platform.validate_auth", true, || self.platform.validate_auth())
            .await
            .is_ok();
        let task_count = self
            .posts
            .list_active_by_guild(guild_id)
            .await
            .map_err(|e| HandlerError::persistence("task_post.list_active", e))?
            .len();
        let allowlist_count = self
            .allowlists
            .list_active_by_guild(guild_id)
            .await
            .map_err(|e| HandlerError::persistence("allowlist.list_active", e))?
            .len();

        Ok(EmbedBuilder::new(
            "Server Status",
            format!("Linked to community `{}`.", link.community_id.as_str()),
        )
        .color(if api_reachable { COLOR_SUCCESS } else { COLOR_ERROR })
        .field("Platform API", if api_reachable { "connected" } else { "unreachable" }.to_owned(), true)
        .field("Linked Since", link.linked_at.format("%Y-%m-%d").to_string(), true)
        .field("Active Tasks", task_count.to_string(), true)
        .field("Active Allowlists", allowlist_count.to_string(), true)
        .field("Commands Handled", link.commands_handled.to_string(), true)
        .button(Button::action("refresh_status", "Refresh", ButtonStyle::Secondary))
        .button(Button::action("test_connection", "Test Connection", ButtonStyle::Secondary))
        .ephemeral()
        .build())
    }
}

/// `/status`.
pub struct StatusHandler {
    panel: Arc<StatusPanel>,
}

impl StatusHandler {
    pub fn new(panel: Arc<StatusPanel>) -> Self {
        Self { panel }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for StatusHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        _ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let payload = self.panel.render(&envelope.guild_id).await?;
        Ok(HandlerReply::payload(payload))
    }
}

/// `refresh_status` button: re-renders the status panel into the message
/// the button sits on instead of sending a new reply.
pub struct RefreshStatusHandler {
    panel: Arc<StatusPanel>,
    chat: Arc<dyn ChatPort>,
}

impl RefreshStatusHandler {
    pub fn new(panel: Arc<StatusPanel>, chat: Arc<dyn ChatPort>) -> Self {
        Self { panel, chat }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for RefreshStatusHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let Some(message_id) = &envelope.message_id else {
            return Err(HandlerError::user("This button must be attached to a message."));
        };
        let mut payload = self.panel.render(&envelope.guild_id).await?;
        payload.ephemeral = false;
        self.chat
            .edit_message(&envelope.channel_id, message_id, &payload)
            .await
            .map_err(|e| HandlerError::chat("chat.edit_message", e))?;
        ctx.responder
            .acknowledge()
            .await
            .map_err(|e| HandlerError::respond("chat.defer", e))?;
        Ok(HandlerReply::already_responded())
    }
}

/// `test_connection` button. The probe result is the answer, so a failed
/// probe is still a successful interaction.
pub struct TestConnectionHandler {
    platform: Arc<dyn PlatformApi>,
}

impl TestConnectionHandler {
    pub fn new(platform: Arc<dyn PlatformApi>) -> Self {
        Self { platform }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for TestConnectionHandler {
    async fn handle(
        &self,
        _envelope: &GatewayEnvelope,
        _ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let payload = match self.platform.validate_auth().await {
            Ok(()) => EmbedBuilder::new(
                "Connection OK",
                "The Platform API accepted the bot's credentials.",
            )
            .color(COLOR_SUCCESS)
            .ephemeral()
            .build(),
            Err(error) => EmbedBuilder::new(
                "Connection Failed",
                "The Platform API is unreachable right now. Try again in a few minutes.",
            )
            .color(COLOR_ERROR)
            .footer(error.to_raw_failure().name)
            .ephemeral()
            .build(),
        };
        Ok(HandlerReply::payload(payload))
    }
}

fn commands_help() -> ReplyPayload {
    EmbedBuilder::new("Commands", "Everything the bot responds to.")
        .color(COLOR_INFO)
        .field("/link-community", "Connect this server to your community", false)
        .field("/unlink-community", "Remove the community link", false)
        .field("/create-task", "Post a social task in this channel", false)
        .field("/list-tasks", "List the community's tasks", false)
        .field("/connect-allowlist", "Post an allowlist in this channel", false)
        .field("/allowlist-analytics", "Entry stats for connected allowlists", false)
        .field("/status", "Link and connectivity overview", false)
        .field("/security", "Recent denials and anomaly counts", false)
        .ephemeral()
        .build()
}

fn setup_help(urls: &UrlsConfig) -> ReplyPayload {
    EmbedBuilder::new(
        "Getting Started",
        "1. Create a community on the Platform.\n\
         2. Run /link-community with its ID.\n\
         3. Post tasks with /create-task and allowlists with /connect-allowlist.",
    )
    .color(COLOR_INFO)
    .button(Button::link(urls.web.clone(), "Open Dashboard"))
    .ephemeral()
    .build()
}

fn link_help(urls: &UrlsConfig) -> ReplyPayload {
    EmbedBuilder::new(
        "Linking Help",
        "Find your community ID on the Platform dashboard under Settings. \
         You need Manage Server here and ownership of the community there.",
    )
    .color(COLOR_INFO)
    .button(Button::link(urls.web.clone(), "Open Dashboard"))
    .button(Button::link(urls.support.clone(), "Contact Support"))
    .ephemeral()
    .build()
}

/// `/help`.
pub struct HelpHandler {
    urls: UrlsConfig,
}

impl HelpHandler {
    pub fn new(urls: UrlsConfig) -> Self {
        Self { urls }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for HelpHandler {
    async fn handle(
        &self,
        _envelope: &GatewayEnvelope,
        _ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        Ok(HandlerReply::payload(
            EmbedBuilder::new(
                "TaskBridge Help",
                "Connect your community, post tasks, and run allowlists without leaving chat.",
            )
            .color(COLOR_INFO)
            .button(Button::action("help_commands", "Commands", ButtonStyle::Primary))
            .button(Button::action("help_setup", "Getting Started", ButtonStyle::Secondary))
            .button(Button::link(self.urls.help_chat.clone(), "Live Help"))
            .ephemeral()
            .build(),
        ))
    }
}

/// `help_commands`, `help_setup` and `link_community_help` buttons.
pub struct HelpButtonHandler {
    urls: UrlsConfig,
}

impl HelpButtonHandler {
    pub fn new(urls: UrlsConfig) -> Self {
        Self { urls }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for HelpButtonHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        _ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let payload = match ButtonAction::parse(envelope.event.name()) {
            Some(ButtonAction::HelpCommands) => commands_help(),
            Some(ButtonAction::HelpSetup) => setup_help(&self.urls),
            Some(ButtonAction::LinkCommunityHelp) => link_help(&self.urls),
            _ => return Err(HandlerError::user("This button is no longer recognized.")),
        };
        Ok(HandlerReply::payload(payload))
    }
}

/// `/security`: seven-day interaction anomaly overview for the guild.
pub struct SecurityHandler {
    logs: Arc<dyn InteractionLogRepository>,
}

impl SecurityHandler {
    pub fn new(logs: Arc<dyn InteractionLogRepository>) -> Self {
        Self { logs }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for SecurityHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        _ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let analytics = self
            .logs
            .guild_analytics(&envelope.guild_id, 7)
            .await
            .map_err(|e| HandlerError::persistence("interaction_log.guild_analytics", e))?;

        Ok(HandlerReply::payload(
            EmbedBuilder::new(
                "Security Overview",
                format!(
                    "{} interaction(s) from {} user(s) over the last 7 days.",
                    analytics.total_events, analytics.unique_users
                ),
            )
            .color(COLOR_INFO)
            .field("Denied", analytics.denied.to_string(), true)
            .field("Rate Limited", analytics.rate_limited.to_string(), true)
            .field("Cooldowns", analytics.cooldowns.to_string(), true)
            .field("Errors", analytics.errors.to_string(), true)
            .field(
                "Avg Response",
                format!("{:.0} ms", analytics.avg_response_time_ms),
                true,
            )
            .ephemeral()
            .build(),
        )
        .with_context(json!({ "denied": analytics.denied, "rate_limited": analytics.rate_limited })))
    }
}
