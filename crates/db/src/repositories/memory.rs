//! In-memory repository fakes for handler and pipeline tests. They enforce
//! the same uniqueness rules as the SQL implementations.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use taskbridge_core::domain::account::{UserAccountLink, VerificationState};
use taskbridge_core::domain::allowlist::{AllowlistConnection, ConnectionStatus};
use taskbridge_core::domain::interaction::InteractionRecord;
use taskbridge_core::domain::link::ServerCommunityLink;
use taskbridge_core::domain::task::{TaskPost, TaskStatus};
use taskbridge_core::domain::{AllowlistId, CommunityId, GuildId, MessageId, TaskId, UserId};
use taskbridge_core::permissions::RoleOverrides;

use super::{
    AllowlistRepository, GuildAnalytics, InteractionFilter, InteractionLogRepository,
    PlatformAnalytics, RepositoryError, ServerLinkRepository, TaskPostRepository,
    UserLinkRepository,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct InMemoryServerLinkRepository {
    links: Mutex<Vec<ServerCommunityLink>>,
    overrides: Mutex<Vec<(GuildId, RoleOverrides)>>,
}

impl InMemoryServerLinkRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ServerLinkRepository for InMemoryServerLinkRepository {
    async fn create(&self, link: &ServerCommunityLink) -> Result<(), RepositoryError> {
        let mut links = lock(&self.links);
        let clash = links.iter().any(|existing| {
            existing.active
                && (existing.guild_id == link.guild_id
                    || existing.community_id == link.community_id)
        });
        if clash {
            return Err(RepositoryError::Conflict("an active link already exists".to_owned()));
        }
        links.push(link.clone());
        Ok(())
    }

    async fn find_active_by_guild(
        &self,
        guild_id: &GuildId,
    ) -> Result<Option<ServerCommunityLink>, RepositoryError> {
        Ok(lock(&self.links)
            .iter()
            .find(|link| link.active && &link.guild_id == guild_id)
            .cloned())
    }

    async fn find_active_by_community(
        &self,
        community_id: &CommunityId,
    ) -> Result<Option<ServerCommunityLink>, RepositoryError> {
        Ok(lock(&self.links)
            .iter()
            .find(|link| link.active && &link.community_id == community_id)
            .cloned())
    }

    async fn deactivate_prior(&self, guild_id: &GuildId) -> Result<u64, RepositoryError> {
        let mut count = 0;
        for link in lock(&self.links).iter_mut() {
            if link.active && &link.guild_id == guild_id {
                link.active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn update(&self, link: &ServerCommunityLink) -> Result<(), RepositoryError> {
        for existing in lock(&self.links).iter_mut() {
            if existing.guild_id == link.guild_id && existing.linked_at == link.linked_at {
                *existing = link.clone();
            }
        }
        Ok(())
    }

    async fn delete_by_guild(&self, guild_id: &GuildId) -> Result<u64, RepositoryError> {
        let mut links = lock(&self.links);
        let before = links.len();
        links.retain(|link| &link.guild_id != guild_id);
        Ok((before - links.len()) as u64)
    }

    async fn role_overrides(&self, guild_id: &GuildId) -> Result<RoleOverrides, RepositoryError> {
        Ok(lock(&self.overrides)
            .iter()
            .find(|(guild, _)| guild == guild_id)
            .map(|(_, overrides)| overrides.clone())
            .unwrap_or_default())
    }

    async fn set_role_overrides(
        &self,
        guild_id: &GuildId,
        overrides: &RoleOverrides,
    ) -> Result<(), RepositoryError> {
        let mut all = lock(&self.overrides);
        all.retain(|(guild, _)| guild != guild_id);
        all.push((guild_id.clone(), overrides.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserLinkRepository {
    links: Mutex<Vec<UserAccountLink>>,
}

impl InMemoryUserLinkRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UserLinkRepository for InMemoryUserLinkRepository {
    async fn create(&self, link: &UserAccountLink) -> Result<(), RepositoryError> {
        let mut links = lock(&self.links);
        if links.iter().any(|existing| existing.active && existing.chat_user_id == link.chat_user_id)
        {
            return Err(RepositoryError::Conflict(
                "an active account link already exists".to_owned(),
            ));
        }
        links.push(link.clone());
        Ok(())
    }

    async fn find_active_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserAccountLink>, RepositoryError> {
        Ok(lock(&self.links)
            .iter()
            .find(|link| link.active && &link.chat_user_id == user_id)
            .cloned())
    }

    async fn deactivate_prior(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let mut count = 0;
        for link in lock(&self.links).iter_mut() {
            if link.active && &link.chat_user_id == user_id {
                link.active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn update(&self, link: &UserAccountLink) -> Result<(), RepositoryError> {
        for existing in lock(&self.links).iter_mut() {
            if existing.chat_user_id == link.chat_user_id && existing.linked_at == link.linked_at {
                *existing = link.clone();
            }
        }
        Ok(())
    }

    async fn deactivate_expired_unverified(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut count = 0;
        for link in lock(&self.links).iter_mut() {
            let expired = link.token_expires_at.map(|at| at < now).unwrap_or(false);
            if link.active && link.verification != VerificationState::Verified && expired {
                link.active = false;
                link.verification = VerificationState::Revoked;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[derive(Default)]
pub struct InMemoryTaskPostRepository {
    posts: Mutex<Vec<TaskPost>>,
}

impl InMemoryTaskPostRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TaskPostRepository for InMemoryTaskPostRepository {
    async fn create(&self, post: &TaskPost) -> Result<(), RepositoryError> {
        let mut posts = lock(&self.posts);
        let clash = posts.iter().any(|existing| {
            existing.status == TaskStatus::Active
                && existing.task_id == post.task_id
                && existing.guild_id == post.guild_id
        });
        if clash {
            return Err(RepositoryError::Conflict("this task is already posted here".to_owned()));
        }
        posts.push(post.clone());
        Ok(())
    }

    async fn find(
        &self,
        task_id: &TaskId,
        guild_id: &GuildId,
    ) -> Result<Option<TaskPost>, RepositoryError> {
        Ok(lock(&self.posts)
            .iter()
            .rev()
            .find(|post| &post.task_id == task_id && &post.guild_id == guild_id)
            .cloned())
    }

    async fn find_by_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<TaskPost>, RepositoryError> {
        Ok(lock(&self.posts).iter().rev().find(|post| &post.message_id == message_id).cloned())
    }

    async fn update(&self, post: &TaskPost) -> Result<(), RepositoryError> {
        for existing in lock(&self.posts).iter_mut() {
            if existing.task_id == post.task_id && existing.guild_id == post.guild_id {
                *existing = post.clone();
            }
        }
        Ok(())
    }

    async fn list_active_by_guild(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<TaskPost>, RepositoryError> {
        Ok(lock(&self.posts)
            .iter()
            .filter(|post| post.status == TaskStatus::Active && &post.guild_id == guild_id)
            .cloned()
            .collect())
    }

    async fn expire_past_end(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut count = 0;
        for post in lock(&self.posts).iter_mut() {
            if post.status == TaskStatus::Active && post.is_past_end(now) {
                post.status = TaskStatus::Expired;
                post.status_changed_at = now;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[derive(Default)]
pub struct InMemoryAllowlistRepository {
    connections: Mutex<Vec<AllowlistConnection>>,
}

impl InMemoryAllowlistRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl AllowlistRepository for InMemoryAllowlistRepository {
    async fn create(&self, connection: &AllowlistConnection) -> Result<(), RepositoryError> {
        let mut connections = lock(&self.connections);
        let clash = connections.iter().any(|existing| {
            existing.status == ConnectionStatus::Active
                && existing.allowlist_id == connection.allowlist_id
                && existing.guild_id == connection.guild_id
        });
        if clash {
            return Err(RepositoryError::Conflict(
                "this allowlist is already connected here".to_owned(),
            ));
        }
        connections.push(connection.clone());
        Ok(())
    }

    async fn find(
        &self,
        allowlist_id: &AllowlistId,
        guild_id: &GuildId,
    ) -> Result<Option<AllowlistConnection>, RepositoryError> {
        Ok(lock(&self.connections)
            .iter()
            .rev()
            .find(|c| &c.allowlist_id == allowlist_id && &c.guild_id == guild_id)
            .cloned())
    }

    async fn find_by_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<AllowlistConnection>, RepositoryError> {
        Ok(lock(&self.connections).iter().rev().find(|c| &c.message_id == message_id).cloned())
    }

    async fn update(&self, connection: &AllowlistConnection) -> Result<(), RepositoryError> {
        for existing in lock(&self.connections).iter_mut() {
            if existing.allowlist_id == connection.allowlist_id
                && existing.guild_id == connection.guild_id
            {
                *existing = connection.clone();
            }
        }
        Ok(())
    }

    async fn list_active_by_guild(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<AllowlistConnection>, RepositoryError> {
        Ok(lock(&self.connections)
            .iter()
            .filter(|c| c.status == ConnectionStatus::Active && &c.guild_id == guild_id)
            .cloned()
            .collect())
    }

    async fn expire_past_end(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut count = 0;
        for connection in lock(&self.connections).iter_mut() {
            let past_end = connection.snapshot.ends_at.map(|at| at <= now).unwrap_or(false);
            if connection.status == ConnectionStatus::Active && past_end {
                connection.status = ConnectionStatus::Expired;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[derive(Default)]
pub struct InMemoryInteractionLogRepository {
    records: Mutex<Vec<InteractionRecord>>,
}

impl InMemoryInteractionLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<InteractionRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait::async_trait]
impl InteractionLogRepository for InMemoryInteractionLogRepository {
    async fn log(&self, record: &InteractionRecord) -> Result<(), RepositoryError> {
        lock(&self.records).push(record.clone());
        Ok(())
    }

    async fn query(
        &self,
        filter: &InteractionFilter,
    ) -> Result<Vec<InteractionRecord>, RepositoryError> {
        let mut matched: Vec<InteractionRecord> = lock(&self.records)
            .iter()
            .filter(|record| {
                filter.guild_id.as_ref().map(|g| &record.guild_id == g).unwrap_or(true)
                    && filter.user_id.as_ref().map(|u| &record.user_id == u).unwrap_or(true)
                    && filter.category.map(|c| record.category == c).unwrap_or(true)
                    && filter.outcome.map(|o| record.outcome == o).unwrap_or(true)
                    && filter.since.map(|s| record.occurred_at >= s).unwrap_or(true)
                    && filter.until.map(|u| record.occurred_at < u).unwrap_or(true)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        matched.truncate(filter.limit.unwrap_or(100) as usize);
        Ok(matched)
    }

    async fn guild_analytics(
        &self,
        guild_id: &GuildId,
        days: i64,
    ) -> Result<GuildAnalytics, RepositoryError> {
        let since = Utc::now() - chrono::Duration::days(days.max(0));
        let records = lock(&self.records);
        let scoped: Vec<&InteractionRecord> = records
            .iter()
            .filter(|r| &r.guild_id == guild_id && r.occurred_at >= since)
            .collect();
        Ok(summarize_guild(&scoped))
    }

    async fn platform_analytics(&self, days: i64) -> Result<PlatformAnalytics, RepositoryError> {
        let since = Utc::now() - chrono::Duration::days(days.max(0));
        let records = lock(&self.records);
        let scoped: Vec<&InteractionRecord> =
            records.iter().filter(|r| r.occurred_at >= since).collect();

        let mut guilds: Vec<&GuildId> = scoped.iter().map(|r| &r.guild_id).collect();
        guilds.sort_by_key(|g| g.as_str().to_owned());
        guilds.dedup();
        let mut users: Vec<&UserId> = scoped.iter().map(|r| &r.user_id).collect();
        users.sort_by_key(|u| u.as_str().to_owned());
        users.dedup();

        let guild_summary = summarize_guild(&scoped);
        Ok(PlatformAnalytics {
            total_events: guild_summary.total_events,
            active_guilds: guilds.len() as u64,
            unique_users: users.len() as u64,
            successes: guild_summary.successes,
            errors: guild_summary.errors,
            avg_response_time_ms: guild_summary.avg_response_time_ms,
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|r| r.occurred_at >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn archive_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut count = 0;
        for record in lock(&self.records).iter_mut() {
            if !record.archived && record.occurred_at >= from && record.occurred_at < to {
                record.archived = true;
                count += 1;
            }
        }
        Ok(count)
    }
}

fn summarize_guild(records: &[&InteractionRecord]) -> GuildAnalytics {
    use taskbridge_core::domain::interaction::PipelineOutcome;

    let mut users: Vec<&UserId> = records.iter().map(|r| &r.user_id).collect();
    users.sort_by_key(|u| u.as_str().to_owned());
    users.dedup();

    let total = records.len() as u64;
    let count_of = |outcome: PipelineOutcome| -> u64 {
        records.iter().filter(|r| r.outcome == outcome).count() as u64
    };
    let avg = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.response_time_ms as f64).sum::<f64>() / records.len() as f64
    };

    GuildAnalytics {
        total_events: total,
        successes: count_of(PipelineOutcome::Success),
        errors: count_of(PipelineOutcome::Error),
        denied: count_of(PipelineOutcome::Denied),
        cooldowns: count_of(PipelineOutcome::Cooldown),
        rate_limited: count_of(PipelineOutcome::RateLimit),
        unique_users: users.len() as u64,
        avg_response_time_ms: avg,
    }
}
