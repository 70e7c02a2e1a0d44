use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use taskbridge_core::domain::task::TaskKind;
use taskbridge_core::domain::{ChannelId, GuildId, UserId};

use crate::store::{CacheError, CacheStore};

/// Staged modal state lives five minutes; an abandoned flow simply expires.
pub const STAGING_TTL: Duration = Duration::from_secs(300);

/// Partial create-task input gathered before the final modal submit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StagedTaskDraft {
    pub kind: TaskKind,
    pub channel_id: ChannelId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub points: Option<i64>,
    pub duration_hours: Option<i64>,
}

impl StagedTaskDraft {
    pub fn new(kind: TaskKind, channel_id: ChannelId) -> Self {
        Self { kind, channel_id, title: None, description: None, points: None, duration_hours: None }
    }
}

pub struct TaskStaging {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

fn staging_key(user_id: &UserId, guild_id: &GuildId) -> String {
    format!("task_creation_{}_{}", user_id.as_str(), guild_id.as_str())
}

impl TaskStaging {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store, ttl: STAGING_TTL }
    }

    pub fn with_ttl(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn stage(
        &self,
        user_id: &UserId,
        guild_id: &GuildId,
        draft: &StagedTaskDraft,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(draft)?;
        self.store.put_blob(&staging_key(user_id, guild_id), value, self.ttl).await
    }

    pub async fn peek(
        &self,
        user_id: &UserId,
        guild_id: &GuildId,
    ) -> Result<Option<StagedTaskDraft>, CacheError> {
        match self.store.get_blob(&staging_key(user_id, guild_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Consumes the draft. A second take returns `None`, so double modal
    /// submits create at most one task post.
    pub async fn take(
        &self,
        user_id: &UserId,
        guild_id: &GuildId,
    ) -> Result<Option<StagedTaskDraft>, CacheError> {
        match self.store.take_blob(&staging_key(user_id, guild_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn discard(&self, user_id: &UserId, guild_id: &GuildId) -> Result<(), CacheError> {
        self.store.remove_blob(&staging_key(user_id, guild_id)).await
    }
}
