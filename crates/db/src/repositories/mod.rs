use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use taskbridge_core::domain::allowlist::AllowlistConnection;
use taskbridge_core::domain::account::UserAccountLink;
use taskbridge_core::domain::interaction::{EventCategory, InteractionRecord, PipelineOutcome};
use taskbridge_core::domain::link::ServerCommunityLink;
use taskbridge_core::domain::task::TaskPost;
use taskbridge_core::domain::{AllowlistId, CommunityId, GuildId, MessageId, TaskId, UserId};
use taskbridge_core::permissions::RoleOverrides;

pub mod allowlist;
pub mod interaction_log;
pub mod memory;
pub mod server_link;
pub mod task_post;
pub mod user_link;

pub use allowlist::SqlAllowlistRepository;
pub use interaction_log::SqlInteractionLogRepository;
pub use memory::{
    InMemoryAllowlistRepository, InMemoryInteractionLogRepository, InMemoryServerLinkRepository,
    InMemoryTaskPostRepository, InMemoryUserLinkRepository,
};
pub use server_link::SqlServerLinkRepository;
pub use task_post::SqlTaskPostRepository;
pub use user_link::SqlUserLinkRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Maps a unique-index violation to [`RepositoryError::Conflict`] so the
    /// caller can turn it into a user-visible conflict message.
    pub(crate) fn from_insert(error: sqlx::Error, what: &str) -> Self {
        let is_unique = error
            .as_database_error()
            .map(|db| db.message().contains("UNIQUE constraint failed"))
            .unwrap_or(false);
        if is_unique {
            Self::Conflict(what.to_owned())
        } else {
            Self::Database(error)
        }
    }
}

#[async_trait]
pub trait ServerLinkRepository: Send + Sync {
    /// Inserts a new link. Fails with `Conflict` while another active link
    /// exists for the same guild or community.
    async fn create(&self, link: &ServerCommunityLink) -> Result<(), RepositoryError>;
    async fn find_active_by_guild(
        &self,
        guild_id: &GuildId,
    ) -> Result<Option<ServerCommunityLink>, RepositoryError>;
    async fn find_active_by_community(
        &self,
        community_id: &CommunityId,
    ) -> Result<Option<ServerCommunityLink>, RepositoryError>;
    /// Clears the active flag on any prior link for the guild. Returns the
    /// number of links deactivated.
    async fn deactivate_prior(&self, guild_id: &GuildId) -> Result<u64, RepositoryError>;
    /// Writes back counters, snapshot, and audit trail. The row is matched by
    /// (guild id, link timestamp).
    async fn update(&self, link: &ServerCommunityLink) -> Result<(), RepositoryError>;
    async fn delete_by_guild(&self, guild_id: &GuildId) -> Result<u64, RepositoryError>;
    async fn role_overrides(&self, guild_id: &GuildId) -> Result<RoleOverrides, RepositoryError>;
    async fn set_role_overrides(
        &self,
        guild_id: &GuildId,
        overrides: &RoleOverrides,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserLinkRepository: Send + Sync {
    async fn create(&self, link: &UserAccountLink) -> Result<(), RepositoryError>;
    async fn find_active_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserAccountLink>, RepositoryError>;
    async fn deactivate_prior(&self, user_id: &UserId) -> Result<u64, RepositoryError>;
    async fn update(&self, link: &UserAccountLink) -> Result<(), RepositoryError>;
    /// Deactivates unverified links whose token expiry has passed. Returns
    /// the number of links cleared.
    async fn deactivate_expired_unverified(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait TaskPostRepository: Send + Sync {
    async fn create(&self, post: &TaskPost) -> Result<(), RepositoryError>;
    async fn find(
        &self,
        task_id: &TaskId,
        guild_id: &GuildId,
    ) -> Result<Option<TaskPost>, RepositoryError>;
    async fn find_by_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<TaskPost>, RepositoryError>;
    async fn update(&self, post: &TaskPost) -> Result<(), RepositoryError>;
    async fn list_active_by_guild(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<TaskPost>, RepositoryError>;
    /// Moves active posts past their end time to `expired`. Returns the
    /// number of posts transitioned.
    async fn expire_past_end(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait AllowlistRepository: Send + Sync {
    async fn create(&self, connection: &AllowlistConnection) -> Result<(), RepositoryError>;
    async fn find(
        &self,
        allowlist_id: &AllowlistId,
        guild_id: &GuildId,
    ) -> Result<Option<AllowlistConnection>, RepositoryError>;
    async fn find_by_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<AllowlistConnection>, RepositoryError>;
    async fn update(&self, connection: &AllowlistConnection) -> Result<(), RepositoryError>;
    async fn list_active_by_guild(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<AllowlistConnection>, RepositoryError>;
    async fn expire_past_end(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[derive(Clone, Debug, Default)]
pub struct InteractionFilter {
    pub guild_id: Option<GuildId>,
    pub user_id: Option<UserId>,
    pub category: Option<EventCategory>,
    pub outcome: Option<PipelineOutcome>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GuildAnalytics {
    pub total_events: u64,
    pub successes: u64,
    pub errors: u64,
    pub denied: u64,
    pub cooldowns: u64,
    pub rate_limited: u64,
    pub unique_users: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlatformAnalytics {
    pub total_events: u64,
    pub active_guilds: u64,
    pub unique_users: u64,
    pub successes: u64,
    pub errors: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub server_links: u64,
    pub active_server_links: u64,
    pub user_links: u64,
    pub active_user_links: u64,
    pub task_posts: u64,
    pub active_task_posts: u64,
    pub allowlist_connections: u64,
    pub active_allowlist_connections: u64,
    pub interaction_logs: u64,
    pub archived_interaction_logs: u64,
}

#[async_trait]
pub trait InteractionLogRepository: Send + Sync {
    async fn log(&self, record: &InteractionRecord) -> Result<(), RepositoryError>;
    async fn query(
        &self,
        filter: &InteractionFilter,
    ) -> Result<Vec<InteractionRecord>, RepositoryError>;
    async fn guild_analytics(
        &self,
        guild_id: &GuildId,
        days: i64,
    ) -> Result<GuildAnalytics, RepositoryError>;
    async fn platform_analytics(&self, days: i64) -> Result<PlatformAnalytics, RepositoryError>;
    /// Deletes logs older than `cutoff`. Returns the number removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
    /// Flags logs between `from` (older bound) and `to` as archived.
    async fn archive_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}
