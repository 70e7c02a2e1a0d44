use std::sync::Arc;

use serde_json::json;
use tracing::info;

use taskbridge_core::domain::allowlist::{
    AllowlistConnection, AllowlistSnapshot, ConnectionStatus, EntryStatus,
};
use taskbridge_core::domain::AllowlistId;
use taskbridge_db::{AllowlistRepository, ServerLinkRepository, UserLinkRepository};
use taskbridge_platform::{AllowlistInfo, PlatformApi, RetryExecutor};

use crate::commands::{ButtonAction, CommandOptions};
use crate::embeds::{allowlist_message, EmbedBuilder, COLOR_INFO, COLOR_SUCCESS};
use crate::events::{ChatPort, GatewayEnvelope, GatewayEvent};
use crate::handlers::{HandlerContext, HandlerError, HandlerReply, InteractionHandler};

fn snapshot_from(info: &AllowlistInfo) -> AllowlistSnapshot {
    AllowlistSnapshot {
        title: info.title.clone(),
        prize: info.prize.clone(),
        winner_count: info.winner_count,
        entry_price: info.entry_price,
        ends_at: info.ends_at,
        last_updated: info.updated_at,
    }
}

fn button_allowlist_id(envelope: &GatewayEnvelope) -> Result<AllowlistId, HandlerError> {
    match ButtonAction::parse(envelope.event.name()) {
        Some(ButtonAction::EnterAllowlist(allowlist_id))
        | Some(ButtonAction::ViewAllowlist(allowlist_id)) => Ok(allowlist_id),
        _ => Err(HandlerError::user("This button is no longer recognized.")),
    }
}

/// `/connect-allowlist allowlist_id:<id>`. Posts the allowlist as an
/// interactive message in the current channel.
pub struct ConnectAllowlistHandler {
    links: Arc<dyn ServerLinkRepository>,
    allowlists: Arc<dyn AllowlistRepository>,
    platform: Arc<dyn PlatformApi>,
    retry: Arc<RetryExecutor>,
    chat: Arc<dyn ChatPort>,
}

impl ConnectAllowlistHandler {
    pub fn new(
        links: Arc<dyn ServerLinkRepository>,
        allowlists: Arc<dyn AllowlistRepository>,
        platform: Arc<dyn PlatformApi>,
        retry: Arc<RetryExecutor>,
        chat: Arc<dyn ChatPort>,
    ) -> Self {
        Self { links, allowlists, platform, retry, chat }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for ConnectAllowlistHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let GatewayEvent::Command { options, .. } = &envelope.event else {
            return Err(HandlerError::user("This action is only available as a command."));
        };
        let options = CommandOptions::new(options);
        let allowlist_id = AllowlistId::from(options.require_id("allowlist_id")?);

        let Some(mut link) = self
            .links
            .find_active_by_guild(&envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("server_link.find_active", e))?
        else {
            return Err(HandlerError::user(
                "Link this server to a community with /link-community first.",
            ));
        };

        if let Some(existing) = self
            .allowlists
            .find(&allowlist_id, &envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("allowlist.find", e))?
        {
            if existing.status == ConnectionStatus::Active {
                return Err(HandlerError::user(
                    "That allowlist is already connected in this server.",
                ));
            }
        }

        let allowlist_info = match self
            .retry
            .execute("platform.get_allowlist", true, || self.platform.get_allowlist(&allowlist_id))
            .await
        {
            Ok(info) => info,
            Err(error) if error.is_not_found() => {
                return Err(HandlerError::user("Allowlist not found. Check the ID and try again."));
            }
            Err(error) => return Err(HandlerError::platform("platform.get_allowlist", error)),
        };
        let snapshot = snapshot_from(&allowlist_info);

        let message_id = self
            .chat
            .post_message(
                &envelope.channel_id,
                &allowlist_message(allowlist_id.as_str(), &snapshot, 0),
            )
            .await
            .map_err(|e| HandlerError::chat("chat.post_message", e))?;

        let connection = AllowlistConnection::new(
            allowlist_id.clone(),
            envelope.guild_id.clone(),
            envelope.channel_id.clone(),
            message_id,
            envelope.member.user_id.clone(),
            snapshot,
        );
        match self.allowlists.create(&connection).await {
            Ok(()) => {}
            Err(taskbridge_db::RepositoryError::Conflict(_)) => {
                return Err(HandlerError::user(
                    "That allowlist is already connected in this server.",
                ));
            }
            Err(e) => return Err(HandlerError::persistence("allowlist.create", e)),
        }

        link.allowlists_connected += 1;
        link.record_audit(
            "allowlist_connected",
            envelope.member.user_id.clone(),
            format!("allowlist {}", allowlist_id.as_str()),
        );
        self.links
            .update(&link)
            .await
            .map_err(|e| HandlerError::persistence("server_link.update", e))?;

        info!(
            event_name = "allowlist_connected",
            guild_id = envelope.guild_id.as_str(),
            allowlist_id = allowlist_id.as_str(),
            correlation_id = ctx.correlation_id,
            "allowlist posted to channel"
        );
        Ok(HandlerReply::payload(
            EmbedBuilder::new(
                "Allowlist Connected",
                format!("**{}** is live in this channel.", connection.snapshot.title),
            )
            .color(COLOR_SUCCESS)
            .ephemeral()
            .build(),
        )
        .with_context(json!({ "allowlist_id": allowlist_id.as_str() })))
    }
}

/// `enter_allowlist_<id>` button. Duplicate entries are recorded as attempts
/// without touching the Platform a second time.
pub struct EnterAllowlistHandler {
    allowlists: Arc<dyn AllowlistRepository>,
    users: Arc<dyn UserLinkRepository>,
    platform: Arc<dyn PlatformApi>,
}

impl EnterAllowlistHandler {
    pub fn new(
        allowlists: Arc<dyn AllowlistRepository>,
        users: Arc<dyn UserLinkRepository>,
        platform: Arc<dyn PlatformApi>,
    ) -> Self {
        Self { allowlists, users, platform }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for EnterAllowlistHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let allowlist_id = button_allowlist_id(envelope)?;
        let Some(mut connection) = self
            .allowlists
            .find(&allowlist_id, &envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("allowlist.find", e))?
        else {
            return Err(HandlerError::user("This allowlist is no longer available."));
        };
        if connection.status != ConnectionStatus::Active {
            return Err(HandlerError::user("This allowlist has closed."));
        }

        let already_entered = connection
            .entries
            .iter()
            .any(|e| e.user_id == envelope.member.user_id && e.status != EntryStatus::Duplicate);
        if already_entered {
            connection.record_entry(envelope.member.user_id.clone());
            self.allowlists
                .update(&connection)
                .await
                .map_err(|e| HandlerError::persistence("allowlist.update", e))?;
            return Err(HandlerError::user("You're already entered in this allowlist."));
        }

        let user_link = self
            .users
            .find_active_by_user(&envelope.member.user_id)
            .await
            .map_err(|e| HandlerError::persistence("user_link.find_active", e))?;
        let platform_user_id = match &user_link {
            Some(link) => link.platform_user_id.clone(),
            None => envelope.member.user_id.as_str().to_owned(),
        };

        // Not idempotent: each accepted entry may charge the entry price.
        let receipt = match self.platform.enter_allowlist(&allowlist_id, &platform_user_id).await {
            Ok(receipt) => receipt,
            Err(error) if error.is_not_found() => {
                return Err(HandlerError::user(
                    "This allowlist no longer exists on the Platform.",
                ));
            }
            Err(error) => return Err(HandlerError::platform("platform.enter_allowlist", error)),
        };
        if !receipt.accepted {
            let reason = receipt.reason.unwrap_or_else(|| "entry was not accepted".to_owned());
            return Err(HandlerError::user(format!("Could not enter: {reason}")));
        }

        connection.record_entry(envelope.member.user_id.clone());
        self.allowlists
            .update(&connection)
            .await
            .map_err(|e| HandlerError::persistence("allowlist.update", e))?;

        info!(
            event_name = "allowlist_entered",
            guild_id = envelope.guild_id.as_str(),
            allowlist_id = allowlist_id.as_str(),
            correlation_id = ctx.correlation_id,
            "allowlist entry recorded"
        );
        Ok(HandlerReply::payload(
            EmbedBuilder::new(
                "Entry Confirmed",
                format!(
                    "You're in **{}**. {} member(s) entered so far.",
                    connection.snapshot.title,
                    connection.non_duplicate_entry_count()
                ),
            )
            .color(COLOR_SUCCESS)
            .ephemeral()
            .build(),
        )
        .with_context(json!({ "allowlist_id": allowlist_id.as_str() })))
    }
}

/// `view_allowlist_<id>` button.
pub struct ViewAllowlistHandler {
    allowlists: Arc<dyn AllowlistRepository>,
}

impl ViewAllowlistHandler {
    pub fn new(allowlists: Arc<dyn AllowlistRepository>) -> Self {
        Self { allowlists }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for ViewAllowlistHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        _ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let allowlist_id = button_allowlist_id(envelope)?;
        let Some(connection) = self
            .allowlists
            .find(&allowlist_id, &envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("allowlist.find", e))?
        else {
            return Err(HandlerError::user("This allowlist is no longer available."));
        };

        let ends = match connection.snapshot.ends_at {
            Some(at) => at.format("%Y-%m-%d %H:%M UTC").to_string(),
            None => "open-ended".to_owned(),
        };
        Ok(HandlerReply::payload(
            EmbedBuilder::new(
                connection.snapshot.title.clone(),
                format!("Prize: {}", connection.snapshot.prize),
            )
            .color(COLOR_INFO)
            .field("Status", connection.status.as_str().to_owned(), true)
            .field("Winners", connection.snapshot.winner_count.to_string(), true)
            .field("Entry Price", connection.snapshot.entry_price.to_string(), true)
            .field("Entries", connection.non_duplicate_entry_count().to_string(), true)
            .field("Ends", ends, true)
            .ephemeral()
            .build(),
        )
        .with_context(json!({ "allowlist_id": allowlist_id.as_str() })))
    }
}

/// `/allowlist-analytics`: entry and duplicate counts across the guild's
/// connected allowlists.
pub struct AllowlistAnalyticsHandler {
    allowlists: Arc<dyn AllowlistRepository>,
}

impl AllowlistAnalyticsHandler {
    pub fn new(allowlists: Arc<dyn AllowlistRepository>) -> Self {
        Self { allowlists }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for AllowlistAnalyticsHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        _ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let connections = self
            .allowlists
            .list_active_by_guild(&envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("allowlist.list_active", e))?;

        let total_entries: usize =
            connections.iter().map(|c| c.non_duplicate_entry_count()).sum();
        let total_duplicates: usize =
            connections.iter().map(|c| c.duplicate_attempts.len()).sum();

        let mut builder = EmbedBuilder::new(
            "Allowlist Analytics",
            format!(
                "{} active allowlist(s), {} entries, {} duplicate attempt(s).",
                connections.len(),
                total_entries,
                total_duplicates
            ),
        )
        .color(COLOR_INFO)
        .ephemeral();
        for connection in connections.iter().take(10) {
            builder = builder.field(
                connection.snapshot.title.clone(),
                format!(
                    "{} entries | {} duplicate attempt(s) | {} winner(s)",
                    connection.non_duplicate_entry_count(),
                    connection.duplicate_attempts.len(),
                    connection.snapshot.winner_count
                ),
                false,
            );
        }
        Ok(HandlerReply::payload(builder.build())
            .with_context(json!({ "allowlist_count": connections.len() })))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use taskbridge_core::classify::{ClassifierThresholds, ErrorClassifier};
    use taskbridge_core::domain::allowlist::{AllowlistConnection, AllowlistSnapshot};
    use taskbridge_core::domain::link::{GuildSnapshot, ServerCommunityLink};
    use taskbridge_core::domain::{
        AllowlistId, ChannelId, CommunityId, EventId, GuildId, MessageId, UserId,
    };
    use taskbridge_core::permissions::MemberSnapshot;
    use taskbridge_db::repositories::{
        InMemoryAllowlistRepository, InMemoryServerLinkRepository, InMemoryUserLinkRepository,
    };
    use taskbridge_db::{AllowlistRepository, ServerLinkRepository};
    use taskbridge_platform::{
        AllowlistInfo, EntryReceipt, PlatformError, RetryConfig, RetryExecutor, ScriptedPlatform,
    };

    use crate::events::{
        GatewayEnvelope, GatewayEvent, GuildProfile, InteractionResponder, RecordingChat,
    };
    use crate::handlers::{HandlerContext, HandlerError, InteractionHandler};

    use super::{AllowlistAnalyticsHandler, ConnectAllowlistHandler, EnterAllowlistHandler};

    fn envelope(event: GatewayEvent) -> GatewayEnvelope {
        GatewayEnvelope {
            event_id: EventId::from("E1"),
            guild_id: GuildId::from("G1"),
            channel_id: ChannelId::from("C1"),
            message_id: None,
            member: MemberSnapshot {
                user_id: UserId::from("U1"),
                is_bot: false,
                account_created_at: Utc::now() - Duration::days(30),
                roles: Vec::new(),
                has_manage_server: true,
            },
            guild: GuildProfile {
                name: "Test Guild".to_owned(),
                member_count: 42,
                owner_id: UserId::from("U0"),
            },
            event,
        }
    }

    fn connect_command(allowlist_id: &str) -> GatewayEnvelope {
        let mut options = HashMap::new();
        options.insert("allowlist_id".to_owned(), allowlist_id.to_owned());
        envelope(GatewayEvent::Command { name: "connect-allowlist".to_owned(), options })
    }

    fn retry() -> Arc<RetryExecutor> {
        Arc::new(RetryExecutor::new(
            RetryConfig::default(),
            Arc::new(ErrorClassifier::new(ClassifierThresholds::default())),
        ))
    }

    fn allowlist_info(id: &str) -> AllowlistInfo {
        AllowlistInfo {
            id: id.to_owned(),
            title: "OG Allowlist".to_owned(),
            prize: "100 spots".to_owned(),
            winner_count: 100,
            entry_price: 0,
            ends_at: None,
            updated_at: Some(Utc::now()),
        }
    }

    async fn seeded_links() -> Arc<InMemoryServerLinkRepository> {
        let links = Arc::new(InMemoryServerLinkRepository::new());
        links
            .create(&ServerCommunityLink::new(
                GuildId::from("G1"),
                CommunityId::from("COM1"),
                UserId::from("U1"),
                GuildSnapshot {
                    name: "Test Guild".to_owned(),
                    member_count: 42,
                    owner_id: UserId::from("U0"),
                    last_updated: Utc::now(),
                },
            ))
            .await
            .expect("seed link");
        links
    }

    fn seeded_connection() -> AllowlistConnection {
        AllowlistConnection::new(
            AllowlistId::from("A1"),
            GuildId::from("G1"),
            ChannelId::from("C1"),
            MessageId::from("M1"),
            UserId::from("U1"),
            AllowlistSnapshot {
                title: "OG Allowlist".to_owned(),
                prize: "100 spots".to_owned(),
                winner_count: 100,
                entry_price: 0,
                ends_at: None,
                last_updated: None,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn connecting_posts_the_message_and_stores_the_connection() {
        let links = seeded_links().await;
        let allowlists = Arc::new(InMemoryAllowlistRepository::new());
        let platform = Arc::new(ScriptedPlatform::new());
        platform.script_allowlist(Ok(allowlist_info("A1"))).await;
        let chat = Arc::new(RecordingChat::new());
        let handler = ConnectAllowlistHandler::new(
            links.clone(),
            allowlists.clone(),
            platform,
            retry(),
            chat.clone(),
        );
        let responder = InteractionResponder::new(chat.clone(), EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };

        let reply = handler.handle(&connect_command("A1"), &ctx).await.expect("handled");

        assert_eq!(reply.payload.expect("payload").embed.expect("embed").title, "Allowlist Connected");
        assert_eq!(chat.posted().await.len(), 1);
        assert!(allowlists
            .find(&AllowlistId::from("A1"), &GuildId::from("G1"))
            .await
            .expect("query")
            .is_some());
        let link = links
            .find_active_by_guild(&GuildId::from("G1"))
            .await
            .expect("query")
            .expect("link present");
        assert_eq!(link.allowlists_connected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connecting_an_unknown_allowlist_is_a_user_error() {
        let platform = Arc::new(ScriptedPlatform::new());
        platform
            .script_allowlist(Err(PlatformError::Status {
                endpoint: "/allowlists/A9".to_owned(),
                status: 404,
                message: "not found".to_owned(),
            }))
            .await;
        let chat = Arc::new(RecordingChat::new());
        let handler = ConnectAllowlistHandler::new(
            seeded_links().await,
            Arc::new(InMemoryAllowlistRepository::new()),
            platform,
            retry(),
            chat.clone(),
        );
        let responder = InteractionResponder::new(chat.clone(), EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };

        let error = handler.handle(&connect_command("A9"), &ctx).await.expect_err("rejected");

        assert!(matches!(error, HandlerError::User { .. }));
        assert!(chat.posted().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entering_records_a_pending_entry() {
        let allowlists = Arc::new(InMemoryAllowlistRepository::new());
        allowlists.create(&seeded_connection()).await.expect("seed connection");
        let platform = Arc::new(ScriptedPlatform::new());
        platform
            .script_entry(Ok(EntryReceipt {
                allowlist_id: "A1".to_owned(),
                user_id: "U1".to_owned(),
                accepted: true,
                reason: None,
            }))
            .await;
        let handler = EnterAllowlistHandler::new(
            allowlists.clone(),
            Arc::new(InMemoryUserLinkRepository::new()),
            platform,
        );
        let chat = Arc::new(RecordingChat::new());
        let responder = InteractionResponder::new(chat, EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };

        let reply = handler
            .handle(&envelope(GatewayEvent::Button { custom_id: "enter_allowlist_A1".to_owned() }), &ctx)
            .await
            .expect("handled");

        assert_eq!(reply.payload.expect("payload").embed.expect("embed").title, "Entry Confirmed");
        let connection = allowlists
            .find(&AllowlistId::from("A1"), &GuildId::from("G1"))
            .await
            .expect("query")
            .expect("connection present");
        assert_eq!(connection.non_duplicate_entry_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_entry_is_recorded_without_a_second_platform_call() {
        let allowlists = Arc::new(InMemoryAllowlistRepository::new());
        allowlists.create(&seeded_connection()).await.expect("seed connection");
        let platform = Arc::new(ScriptedPlatform::new());
        platform
            .script_entry(Ok(EntryReceipt {
                allowlist_id: "A1".to_owned(),
                user_id: "U1".to_owned(),
                accepted: true,
                reason: None,
            }))
            .await;
        let handler = EnterAllowlistHandler::new(
            allowlists.clone(),
            Arc::new(InMemoryUserLinkRepository::new()),
            platform.clone(),
        );
        let chat = Arc::new(RecordingChat::new());
        let responder = InteractionResponder::new(chat, EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };
        let press = envelope(GatewayEvent::Button { custom_id: "enter_allowlist_A1".to_owned() });

        handler.handle(&press, &ctx).await.expect("first entry");
        let error = handler.handle(&press, &ctx).await.expect_err("duplicate rejected");

        assert!(matches!(error, HandlerError::User { .. }));
        assert_eq!(platform.calls().await.len(), 1);
        let connection = allowlists
            .find(&AllowlistId::from("A1"), &GuildId::from("G1"))
            .await
            .expect("query")
            .expect("connection present");
        assert_eq!(connection.non_duplicate_entry_count(), 1);
        assert_eq!(connection.duplicate_attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn analytics_sums_entries_across_connections() {
        let allowlists = Arc::new(InMemoryAllowlistRepository::new());
        let mut connection = seeded_connection();
        connection.record_entry(UserId::from("U1"));
        connection.record_entry(UserId::from("U2"));
        allowlists.create(&connection).await.expect("seed connection");
        let handler = AllowlistAnalyticsHandler::new(allowlists);
        let chat = Arc::new(RecordingChat::new());
        let responder = InteractionResponder::new(chat, EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };

        let reply = handler
            .handle(
                &envelope(GatewayEvent::Command {
                    name: "allowlist-analytics".to_owned(),
                    options: HashMap::new(),
                }),
                &ctx,
            )
            .await
            .expect("handled");

        let embed = reply.payload.expect("payload").embed.expect("embed");
        assert!(embed.description.contains("2 entries"));
        assert_eq!(embed.fields.len(), 1);
    }
}
