use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CommunityId, GuildId, UserId, SCHEMA_VERSION};
use crate::errors::DomainError;

/// Point-in-time view of the guild captured when the link was created and
/// refreshed opportunistically afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSnapshot {
    pub name: String,
    pub member_count: u64,
    pub owner_id: UserId,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAuditEntry {
    pub action: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
    pub detail: String,
}

/// Binds one guild to one Platform community. At most one active link may
/// exist per guild and per community; the persistence gateway enforces both
/// through unique-on-active indexes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCommunityLink {
    pub guild_id: GuildId,
    pub community_id: CommunityId,
    pub linked_by: UserId,
    pub linked_at: DateTime<Utc>,
    pub active: bool,
    pub guild_snapshot: GuildSnapshot,
    pub commands_handled: u64,
    pub tasks_created: u64,
    pub allowlists_connected: u64,
    pub audit_entries: Vec<LinkAuditEntry>,
    pub schema_version: i64,
}

impl ServerCommunityLink {
    pub fn new(
        guild_id: GuildId,
        community_id: CommunityId,
        linked_by: UserId,
        guild_snapshot: GuildSnapshot,
    ) -> Self {
        let linked_at = Utc::now();
        let mut link = Self {
            guild_id,
            community_id,
            linked_by: linked_by.clone(),
            linked_at,
            active: true,
            guild_snapshot,
            commands_handled: 0,
            tasks_created: 0,
            allowlists_connected: 0,
            audit_entries: Vec::new(),
            schema_version: SCHEMA_VERSION,
        };
        link.record_audit("link_created", linked_by, "initial link");
        link
    }

    /// Appends to the audit trail. Entries are never removed or reordered.
    pub fn record_audit(
        &mut self,
        action: impl Into<String>,
        actor: UserId,
        detail: impl Into<String>,
    ) {
        self.audit_entries.push(LinkAuditEntry {
            action: action.into(),
            actor,
            occurred_at: Utc::now(),
            detail: detail.into(),
        });
    }

    pub fn deactivate(&mut self, actor: UserId, reason: &str) -> Result<(), DomainError> {
        if !self.active {
            return Err(DomainError::InvariantViolation(format!(
                "link for guild {} is already inactive",
                self.guild_id
            )));
        }
        self.active = false;
        self.record_audit("link_deactivated", actor, reason);
        Ok(())
    }
}
