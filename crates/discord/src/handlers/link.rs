use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use taskbridge_core::domain::link::{GuildSnapshot, ServerCommunityLink};
use taskbridge_core::domain::{CommunityId, UserId};
use taskbridge_db::{ServerLinkRepository, UserLinkRepository};
use taskbridge_platform::{NotificationPayload, PlatformApi, RetryExecutor};

use crate::commands::CommandOptions;
use crate::embeds::{already_linked_message, linked_message, Button, ButtonStyle, EmbedBuilder, COLOR_INFO};
use crate::events::{GatewayEnvelope, GatewayEvent};
use crate::handlers::{HandlerContext, HandlerError, HandlerReply, InteractionHandler};

/// Resolves the Platform identity used for ownership validation. Falls back
/// to the raw chat user id when no verified account link exists.
async fn platform_user_id(
    users: &dyn UserLinkRepository,
    user_id: &UserId,
) -> Result<String, HandlerError> {
    let link = users
        .find_active_by_user(user_id)
        .await
        .map_err(|e| HandlerError::persistence("user_link.find_active", e))?;
    Ok(match link {
        Some(link) => link.platform_user_id,
        None => user_id.as_str().to_owned(),
    })
}

fn guild_snapshot(envelope: &GatewayEnvelope) -> GuildSnapshot {
    GuildSnapshot {
        name: envelope.guild.name.clone(),
        member_count: envelope.guild.member_count,
        owner_id: envelope.guild.owner_id.clone(),
        last_updated: chrono::Utc::now(),
    }
}

/// `/link-community community_id:<id>`.
pub struct LinkCommunityHandler {
    links: Arc<dyn ServerLinkRepository>,
    users: Arc<dyn UserLinkRepository>,
    platform: Arc<dyn PlatformApi>,
    retry: Arc<RetryExecutor>,
}

impl LinkCommunityHandler {
    pub fn new(
        links: Arc<dyn ServerLinkRepository>,
        users: Arc<dyn UserLinkRepository>,
        platform: Arc<dyn PlatformApi>,
        retry: Arc<RetryExecutor>,
    ) -> Self {
        Self { links, users, platform, retry }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for LinkCommunityHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let GatewayEvent::Command { options, .. } = &envelope.event else {
            return Err(HandlerError::user("This action is only available as a command."));
        };
        let options = CommandOptions::new(options);
        let community_id = CommunityId::from(options.require_id("community_id")?);

        if let Some(existing) = self
            .links
            .find_active_by_guild(&envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("server_link.find_active", e))?
        {
            debug!(
                event_name = "link_already_present",
                guild_id = envelope.guild_id.as_str(),
                correlation_id = ctx.correlation_id,
                "guild already linked; no state changed"
            );
            return Ok(HandlerReply::payload(already_linked_message(
                existing.community_id.as_str(),
            )));
        }

        let actor = platform_user_id(self.users.as_ref(), &envelope.member.user_id).await?;
        let owns = self
            .retry
            .execute("platform.validate_ownership", true, || {
                self.platform.validate_ownership(&community_id, &actor)
            })
            .await
            .map_err(|e| HandlerError::platform("platform.validate_ownership", e))?;
        if !owns {
            return Err(HandlerError::user(
                "You must own this community on the Platform to link it here.",
            ));
        }

        let community = self
            .retry
            .execute("platform.get_community", true, || {
                self.platform.get_community(&community_id)
            })
            .await
            .map_err(|e| HandlerError::platform("platform.get_community", e))?;

        self.links
            .deactivate_prior(&envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("server_link.deactivate_prior", e))?;
        let link = ServerCommunityLink::new(
            envelope.guild_id.clone(),
            community_id.clone(),
            envelope.member.user_id.clone(),
            guild_snapshot(envelope),
        );
        match self.links.create(&link).await {
            Ok(()) => {}
            Err(taskbridge_db::RepositoryError::Conflict(_)) => {
                return Err(HandlerError::user(
                    "That community is already linked to another server.",
                ));
            }
            Err(e) => return Err(HandlerError::persistence("server_link.create", e)),
        }

        // Best effort: the link stands even when the notification fails.
        if let Err(error) = self
            .platform
            .notify(
                &community_id,
                &NotificationPayload {
                    kind: "server_linked".to_owned(),
                    message: format!("Server {} linked", envelope.guild.name),
                    detail: json!({ "guild_id": envelope.guild_id.as_str() }),
                },
            )
            .await
        {
            debug!(
                event_name = "link_notify_failed",
                community_id = community_id.as_str(),
                error = %error,
                "linked-notification delivery failed"
            );
        }

        info!(
            event_name = "community_linked",
            guild_id = envelope.guild_id.as_str(),
            community_id = community_id.as_str(),
            correlation_id = ctx.correlation_id,
            "guild linked to community"
        );
        Ok(HandlerReply::payload(linked_message(&community.name, community_id.as_str()))
            .with_context(json!({ "community_id": community_id.as_str() })))
    }
}

/// `/unlink-community`, also reachable through the `unlink_community` button
/// on the already-linked notice.
pub struct UnlinkCommunityHandler {
    links: Arc<dyn ServerLinkRepository>,
    platform: Arc<dyn PlatformApi>,
}

impl UnlinkCommunityHandler {
    pub fn new(links: Arc<dyn ServerLinkRepository>, platform: Arc<dyn PlatformApi>) -> Self {
        Self { links, platform }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for UnlinkCommunityHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let Some(mut link) = self
            .links
            .find_active_by_guild(&envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("server_link.find_active", e))?
        else {
            return Err(HandlerError::user("This server is not linked to a community."));
        };

        link.deactivate(envelope.member.user_id.clone(), "explicit unlink")
            .map_err(|e| HandlerError::domain("server_link.deactivate", e))?;
        self.links
            .update(&link)
            .await
            .map_err(|e| HandlerError::persistence("server_link.update", e))?;

        if let Err(error) = self
            .platform
            .notify(
                &link.community_id,
                &NotificationPayload {
                    kind: "server_unlinked".to_owned(),
                    message: format!("Server {} unlinked", envelope.guild.name),
                    detail: json!({ "guild_id": envelope.guild_id.as_str() }),
                },
            )
            .await
        {
            debug!(
                event_name = "unlink_notify_failed",
                community_id = link.community_id.as_str(),
                error = %error,
                "unlinked-notification delivery failed"
            );
        }

        info!(
            event_name = "community_unlinked",
            guild_id = envelope.guild_id.as_str(),
            community_id = link.community_id.as_str(),
            correlation_id = ctx.correlation_id,
            "guild unlinked from community"
        );
        Ok(HandlerReply::payload(
            EmbedBuilder::new(
                "Server Unlinked",
                format!(
                    "This server is no longer connected to community `{}`.",
                    link.community_id.as_str()
                ),
            )
            .color(COLOR_INFO)
            .button(Button::action("relink_community", "Relink", ButtonStyle::Primary))
            .ephemeral()
            .build(),
        )
        .with_context(json!({ "community_id": link.community_id.as_str() })))
    }
}

/// Re-establishes the current link with a fresh guild snapshot and a fresh
/// ownership check.
pub struct RelinkCommunityHandler {
    links: Arc<dyn ServerLinkRepository>,
    users: Arc<dyn UserLinkRepository>,
    platform: Arc<dyn PlatformApi>,
    retry: Arc<RetryExecutor>,
}

impl RelinkCommunityHandler {
    pub fn new(
        links: Arc<dyn ServerLinkRepository>,
        users: Arc<dyn UserLinkRepository>,
        platform: Arc<dyn PlatformApi>,
        retry: Arc<RetryExecutor>,
    ) -> Self {
        Self { links, users, platform, retry }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for RelinkCommunityHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let Some(prior) = self
            .links
            .find_active_by_guild(&envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("server_link.find_active", e))?
        else {
            return Err(HandlerError::user(
                "This server is not linked. Use /link-community to set up a new link.",
            ));
        };
        let community_id = prior.community_id.clone();

        let actor = platform_user_id(self.users.as_ref(), &envelope.member.user_id).await?;
        let owns = self
            .retry
            .execute("platform.validate_ownership", true, || {
                self.platform.validate_ownership(&community_id, &actor)
            })
            .await
            .map_err(|e| HandlerError::platform("platform.validate_ownership", e))?;
        if !owns {
            return Err(HandlerError::user(
                "You must own this community on the Platform to relink it.",
            ));
        }

        let community = self
            .retry
            .execute("platform.get_community", true, || {
                self.platform.get_community(&community_id)
            })
            .await
            .map_err(|e| HandlerError::platform("platform.get_community", e))?;

        self.links
            .deactivate_prior(&envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("server_link.deactivate_prior", e))?;
        let mut link = ServerCommunityLink::new(
            envelope.guild_id.clone(),
            community_id.clone(),
            envelope.member.user_id.clone(),
            guild_snapshot(envelope),
        );
        link.record_audit(
            "link_relinked",
            envelope.member.user_id.clone(),
            format!("replaced link from {}", prior.linked_at),
        );
        self.links
            .create(&link)
            .await
            .map_err(|e| HandlerError::persistence("server_link.create", e))?;

        info!(
            event_name = "community_relinked",
            guild_id = envelope.guild_id.as_str(),
            community_id = community_id.as_str(),
            correlation_id = ctx.correlation_id,
            "guild link refreshed"
        );
        Ok(HandlerReply::payload(linked_message(&community.name, community_id.as_str()))
            .with_context(json!({ "community_id": community_id.as_str() })))
    }
}
