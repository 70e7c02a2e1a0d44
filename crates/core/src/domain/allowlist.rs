use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AllowlistId, ChannelId, GuildId, MessageId, UserId, SCHEMA_VERSION};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistSnapshot {
    pub title: String,
    pub prize: String,
    pub winner_count: u32,
    pub entry_price: u32,
    pub ends_at: Option<DateTime<Utc>>,
    /// Timestamp of the last Platform update applied to this snapshot.
    /// Sync discards updates at or before this watermark.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Confirmed,
    Rejected,
    Duplicate,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "rejected" => Some(Self::Rejected),
            "duplicate" => Some(Self::Duplicate),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub user_id: UserId,
    pub entered_at: DateTime<Utc>,
    pub status: EntryStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateAttempt {
    pub user_id: UserId,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinnerDrawState {
    NotDrawn,
    Drawn { winners: Vec<UserId>, drawn_at: DateTime<Utc> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Expired,
    Removed,
}

impl ConnectionStatus {
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

/// An allowlist connected to a channel as an interactive message. The entry
/// queue is append-only; each user appears at most once with a status other
/// than duplicate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistConnection {
    pub allowlist_id: AllowlistId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub connected_by: UserId,
    pub connected_at: DateTime<Utc>,
    pub snapshot: AllowlistSnapshot,
    pub status: ConnectionStatus,
    pub entries: Vec<AllowlistEntry>,
    pub duplicate_attempts: Vec<DuplicateAttempt>,
    pub winner_draw: WinnerDrawState,
    pub schema_version: i64,
}

impl AllowlistConnection {
    pub fn new(
        allowlist_id: AllowlistId,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        connected_by: UserId,
        snapshot: AllowlistSnapshot,
    ) -> Self {
        Self {
            allowlist_id,
            guild_id,
            channel_id,
            message_id,
            connected_by,
            connected_at: Utc::now(),
            snapshot,
            status: ConnectionStatus::Active,
            entries: Vec::new(),
            duplicate_attempts: Vec::new(),
            winner_draw: WinnerDrawState::NotDrawn,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Appends an entry for `user_id`, or records a duplicate attempt if the
    /// user already holds a non-duplicate entry. Returns the status that was
    /// recorded.
    pub fn record_entry(&mut self, user_id: UserId) -> EntryStatus {
        let already_entered = self
            .entries
            .iter()
            .any(|entry| entry.user_id == user_id && entry.status != EntryStatus::Duplicate);
        let now = Utc::now();

        if already_entered {
            self.duplicate_attempts.push(DuplicateAttempt { user_id: user_id.clone(), attempted_at: now });
            self.entries.push(AllowlistEntry {
                user_id,
                entered_at: now,
                status: EntryStatus::Duplicate,
            });
            return EntryStatus::Duplicate;
        }

        self.entries.push(AllowlistEntry { user_id, entered_at: now, status: EntryStatus::Pending });
        EntryStatus::Pending
    }

    pub fn non_duplicate_entry_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.status != EntryStatus::Duplicate).count()
    }
}
