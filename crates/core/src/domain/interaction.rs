use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{EventId, GuildId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Command,
    Button,
    Modal,
    Menu,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Button => "button",
            Self::Modal => "modal",
            Self::Menu => "menu",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "command" => Some(Self::Command),
            "button" => Some(Self::Button),
            "modal" => Some(Self::Modal),
            "menu" => Some(Self::Menu),
            _ => None,
        }
    }
}

/// Terminal classification of one pipeline pass. Every event produces
/// exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    Success,
    Error,
    Denied,
    Cooldown,
    RateLimit,
}

impl PipelineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Denied => "denied",
            Self::Cooldown => "cooldown",
            Self::RateLimit => "rate-limit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "denied" => Some(Self::Denied),
            "cooldown" => Some(Self::Cooldown),
            "rate-limit" => Some(Self::RateLimit),
            _ => None,
        }
    }
}

/// Append-only record of one pipeline outcome, kept for analytics and
/// forensic review. Subject to age-based archival and deletion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub event_id: EventId,
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub category: EventCategory,
    pub name: String,
    pub action: String,
    pub outcome: PipelineOutcome,
    pub response_time_ms: u64,
    pub context: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub archived: bool,
}

impl InteractionRecord {
    pub fn new(
        guild_id: GuildId,
        user_id: UserId,
        category: EventCategory,
        name: impl Into<String>,
        action: impl Into<String>,
        outcome: PipelineOutcome,
        response_time_ms: u64,
    ) -> Self {
        Self {
            event_id: EventId(Uuid::new_v4().to_string()),
            guild_id,
            user_id,
            category,
            name: name.into(),
            action: action.into(),
            outcome,
            response_time_ms,
            context: serde_json::Value::Null,
            occurred_at: Utc::now(),
            archived: false,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}
