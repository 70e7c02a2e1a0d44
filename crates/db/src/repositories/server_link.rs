use chrono::{DateTime, Utc};
use sqlx::Row;

use taskbridge_core::domain::link::{GuildSnapshot, LinkAuditEntry, ServerCommunityLink};
use taskbridge_core::domain::{CommunityId, GuildId, UserId};
use taskbridge_core::permissions::RoleOverrides;

use super::{RepositoryError, ServerLinkRepository};
use crate::DbPool;

pub struct SqlServerLinkRepository {
    pool: DbPool,
}

impl SqlServerLinkRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_link(row: &sqlx::sqlite::SqliteRow) -> Result<ServerCommunityLink, RepositoryError> {
    let guild_id: String =
        row.try_get("guild_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let community_id: String =
        row.try_get("community_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let linked_by: String =
        row.try_get("linked_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let linked_at: String =
        row.try_get("linked_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active: i64 = row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let guild_snapshot: String =
        row.try_get("guild_snapshot").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let commands_handled: i64 =
        row.try_get("commands_handled").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tasks_created: i64 =
        row.try_get("tasks_created").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let allowlists_connected: i64 =
        row.try_get("allowlists_connected").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let audit_entries: String =
        row.try_get("audit_entries").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let schema_version: i64 =
        row.try_get("schema_version").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let guild_snapshot: GuildSnapshot = serde_json::from_str(&guild_snapshot)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let audit_entries: Vec<LinkAuditEntry> =
        serde_json::from_str(&audit_entries).map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ServerCommunityLink {
        guild_id: GuildId(guild_id),
        community_id: CommunityId(community_id),
        linked_by: UserId(linked_by),
        linked_at: parse_ts(&linked_at),
        active: active != 0,
        guild_snapshot,
        commands_handled: commands_handled.max(0) as u64,
        tasks_created: tasks_created.max(0) as u64,
        allowlists_connected: allowlists_connected.max(0) as u64,
        audit_entries,
        schema_version,
    })
}

const LINK_COLUMNS: &str = "guild_id, community_id, linked_by, linked_at, active, guild_snapshot,
                            commands_handled, tasks_created, allowlists_connected, audit_entries,
                            schema_version";

#[async_trait::async_trait]
impl ServerLinkRepository for SqlServerLinkRepository {
    async fn create(&self, link: &ServerCommunityLink) -> Result<(), RepositoryError> {
        let guild_snapshot = serde_json::to_string(&link.guild_snapshot)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let audit_entries = serde_json::to_string(&link.audit_entries)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO server_links (guild_id, community_id, linked_by, linked_at, active,
                                       guild_snapshot, commands_handled, tasks_created,
                                       allowlists_connected, audit_entries, schema_version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(link.guild_id.as_str())
        .bind(link.community_id.as_str())
        .bind(link.linked_by.as_str())
        .bind(link.linked_at.to_rfc3339())
        .bind(link.active as i64)
        .bind(&guild_snapshot)
        .bind(link.commands_handled as i64)
        .bind(link.tasks_created as i64)
        .bind(link.allowlists_connected as i64)
        .bind(&audit_entries)
        .bind(link.schema_version)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "an active link already exists"))?;

        Ok(())
    }

    async fn find_active_by_guild(
        &self,
        guild_id: &GuildId,
    ) -> Result<Option<ServerCommunityLink>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {LINK_COLUMNS} FROM server_links WHERE guild_id = ? AND active = 1"
        ))
        .bind(guild_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_link(r)?)),
            None => Ok(None),
        }
    }

    async fn find_active_by_community(
        &self,
        community_id: &CommunityId,
    ) -> Result<Option<ServerCommunityLink>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {LINK_COLUMNS} FROM server_links WHERE community_id = ? AND active = 1"
        ))
        .bind(community_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_link(r)?)),
            None => Ok(None),
        }
    }

    async fn deactivate_prior(&self, guild_id: &GuildId) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE server_links SET active = 0 WHERE guild_id = ? AND active = 1",
        )
        .bind(guild_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update(&self, link: &ServerCommunityLink) -> Result<(), RepositoryError> {
        let guild_snapshot = serde_json::to_string(&link.guild_snapshot)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let audit_entries = serde_json::to_string(&link.audit_entries)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "UPDATE server_links
             SET community_id = ?, active = ?, guild_snapshot = ?, commands_handled = ?,
                 tasks_created = ?, allowlists_connected = ?, audit_entries = ?,
                 schema_version = ?
             WHERE guild_id = ? AND linked_at = ?",
        )
        .bind(link.community_id.as_str())
        .bind(link.active as i64)
        .bind(&guild_snapshot)
        .bind(link.commands_handled as i64)
        .bind(link.tasks_created as i64)
        .bind(link.allowlists_connected as i64)
        .bind(&audit_entries)
        .bind(link.schema_version)
        .bind(link.guild_id.as_str())
        .bind(link.linked_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_by_guild(&self, guild_id: &GuildId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM server_links WHERE guild_id = ?")
            .bind(guild_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn role_overrides(&self, guild_id: &GuildId) -> Result<RoleOverrides, RepositoryError> {
        let row = sqlx::query(
            "SELECT role_overrides FROM server_links WHERE guild_id = ? AND active = 1",
        )
        .bind(guild_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let raw: String = row
                    .try_get("role_overrides")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?;
                serde_json::from_str(&raw).map_err(|e| RepositoryError::Decode(e.to_string()))
            }
            None => Ok(RoleOverrides::default()),
        }
    }

    async fn set_role_overrides(
        &self,
        guild_id: &GuildId,
        overrides: &RoleOverrides,
    ) -> Result<(), RepositoryError> {
        let raw = serde_json::to_string(overrides)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        sqlx::query("UPDATE server_links SET role_overrides = ? WHERE guild_id = ? AND active = 1")
            .bind(&raw)
            .bind(guild_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
