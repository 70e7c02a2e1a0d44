use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChannelId, GuildId, MessageId, TaskId, UserId, SCHEMA_VERSION};
use crate::errors::DomainError;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MIN_POINTS: u32 = 1;
pub const MAX_POINTS: u32 = 10_000;
pub const MIN_DURATION_HOURS: i64 = 1;
pub const MAX_DURATION_HOURS: i64 = 8_760;
pub const DEFAULT_DURATION_HOURS: i64 = 168;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    TwitterFollow,
    DiscordJoin,
    TelegramJoin,
    Custom,
}

impl TaskKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "twitter_follow" => Some(Self::TwitterFollow),
            "discord_join" => Some(Self::DiscordJoin),
            "telegram_join" => Some(Self::TelegramJoin),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwitterFollow => "twitter_follow",
            Self::DiscordJoin => "discord_join",
            Self::TelegramJoin => "telegram_join",
            Self::Custom => "custom",
        }
    }
}

/// Platform task data captured at posting time. Requirements hold the
/// type-specific fields gathered via modal (handle, invite link, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub title: String,
    pub kind: TaskKind,
    pub description: String,
    pub points: u32,
    pub requirements: serde_json::Value,
    /// Timestamp of the last Platform update applied to this snapshot.
    /// Sync discards updates at or before this watermark.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.is_empty() || self.title.chars().count() > MAX_TITLE_LEN {
            return Err(DomainError::InvariantViolation(format!(
                "task title must be 1-{MAX_TITLE_LEN} characters"
            )));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(DomainError::InvariantViolation(format!(
                "task description must be at most {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if !(MIN_POINTS..=MAX_POINTS).contains(&self.points) {
            return Err(DomainError::InvariantViolation(format!(
                "task points must be {MIN_POINTS}-{MAX_POINTS}"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Expired,
    Removed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// A task message posted to a channel. (task_id, guild_id) is unique among
/// active posts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPost {
    pub task_id: TaskId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub created_by: UserId,
    pub snapshot: TaskSnapshot,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub status_changed_at: DateTime<Utc>,
    pub views: u64,
    pub completions: u64,
    pub unique_viewers: u64,
    pub schema_version: i64,
}

impl TaskPost {
    pub fn new(
        task_id: TaskId,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        created_by: UserId,
        snapshot: TaskSnapshot,
        duration_hours: Option<i64>,
    ) -> Result<Self, DomainError> {
        snapshot.validate()?;
        let duration_hours = duration_hours.unwrap_or(DEFAULT_DURATION_HOURS);
        if !(MIN_DURATION_HOURS..=MAX_DURATION_HOURS).contains(&duration_hours) {
            return Err(DomainError::InvariantViolation(format!(
                "task duration must be {MIN_DURATION_HOURS}-{MAX_DURATION_HOURS} hours"
            )));
        }
        let starts_at = Utc::now();
        Ok(Self {
            task_id,
            guild_id,
            channel_id,
            message_id,
            created_by,
            snapshot,
            starts_at,
            ends_at: starts_at + Duration::hours(duration_hours),
            status: TaskStatus::Active,
            status_changed_at: starts_at,
            views: 0,
            completions: 0,
            unique_viewers: 0,
            schema_version: SCHEMA_VERSION,
        })
    }

    pub fn transition_to(&mut self, next: TaskStatus) -> Result<(), DomainError> {
        let allowed = matches!(
            (self.status, next),
            (TaskStatus::Active, TaskStatus::Expired) | (TaskStatus::Active, TaskStatus::Removed)
        );
        if !allowed {
            return Err(DomainError::InvalidTaskTransition { from: self.status, to: next });
        }
        self.status = next;
        self.status_changed_at = Utc::now();
        Ok(())
    }

    pub fn is_past_end(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at
    }
}

#[cfg(test)]
mod tests {
    use super::{TaskKind, TaskPost, TaskSnapshot, TaskStatus};
    use crate::domain::{ChannelId, GuildId, MessageId, TaskId, UserId};

    fn snapshot() -> TaskSnapshot {
        TaskSnapshot {
            title: "Follow us".to_owned(),
            kind: TaskKind::TwitterFollow,
            description: "Follow the community account".to_owned(),
            points: 100,
            requirements: serde_json::json!({ "handle": "community" }),
            last_updated: None,
        }
    }

    fn post() -> TaskPost {
        TaskPost::new(
            TaskId::from("T1"),
            GuildId::from("G1"),
            ChannelId::from("C1"),
            MessageId::from("M1"),
            UserId::from("U1"),
            snapshot(),
            None,
        )
        .expect("valid post")
    }

    #[test]
    fn default_duration_is_one_week() {
        let post = post();
        assert_eq!((post.ends_at - post.starts_at).num_hours(), 168);
    }

    #[test]
    fn active_post_can_expire_or_be_removed() {
        let mut post = post();
        post.transition_to(TaskStatus::Expired).expect("active -> expired");

        let mut post = self::post();
        post.transition_to(TaskStatus::Removed).expect("active -> removed");
    }

    #[test]
    fn expired_post_cannot_reactivate() {
        let mut post = post();
        post.transition_to(TaskStatus::Expired).expect("active -> expired");
        let error = post.transition_to(TaskStatus::Active).expect_err("expired -> active");
        assert!(matches!(error, crate::errors::DomainError::InvalidTaskTransition { .. }));
    }

    #[test]
    fn rejects_out_of_range_points() {
        let mut snapshot = snapshot();
        snapshot.points = 0;
        assert!(snapshot.validate().is_err());
        snapshot.points = 10_001;
        assert!(snapshot.validate().is_err());
        snapshot.points = 10_000;
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn rejects_over_length_title() {
        let mut snapshot = snapshot();
        snapshot.title = "x".repeat(101);
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_duration() {
        let result = TaskPost::new(
            TaskId::from("T1"),
            GuildId::from("G1"),
            ChannelId::from("C1"),
            MessageId::from("M1"),
            UserId::from("U1"),
            snapshot(),
            Some(0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn task_kind_parses_known_values() {
        assert_eq!(TaskKind::parse("twitter_follow"), Some(TaskKind::TwitterFollow));
        assert_eq!(TaskKind::parse("CUSTOM"), Some(TaskKind::Custom));
        assert_eq!(TaskKind::parse("unknown"), None);
    }
}
