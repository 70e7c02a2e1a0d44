use chrono::{DateTime, Utc};
use sqlx::Row;

use taskbridge_core::domain::allowlist::{
    AllowlistConnection, AllowlistEntry, AllowlistSnapshot, ConnectionStatus, DuplicateAttempt,
    WinnerDrawState,
};
use taskbridge_core::domain::{AllowlistId, ChannelId, GuildId, MessageId, UserId};

use super::server_link::parse_ts;
use super::{AllowlistRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAllowlistRepository {
    pool: DbPool,
}

impl SqlAllowlistRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_connection(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<AllowlistConnection, RepositoryError> {
    let allowlist_id: String =
        row.try_get("allowlist_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let guild_id: String =
        row.try_get("guild_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let channel_id: String =
        row.try_get("channel_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let message_id: String =
        row.try_get("message_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let connected_by: String =
        row.try_get("connected_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let connected_at: String =
        row.try_get("connected_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let snapshot: String =
        row.try_get("snapshot").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let entries: String =
        row.try_get("entries").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let duplicate_attempts: String =
        row.try_get("duplicate_attempts").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let winner_draw: String =
        row.try_get("winner_draw").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let schema_version: i64 =
        row.try_get("schema_version").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let snapshot: AllowlistSnapshot = decode_json(&snapshot)?;
    let entries: Vec<AllowlistEntry> = decode_json(&entries)?;
    let duplicate_attempts: Vec<DuplicateAttempt> = decode_json(&duplicate_attempts)?;
    let winner_draw: WinnerDrawState = decode_json(&winner_draw)?;
    let status = ConnectionStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown connection status `{status}`")))?;

    Ok(AllowlistConnection {
        allowlist_id: AllowlistId(allowlist_id),
        guild_id: GuildId(guild_id),
        channel_id: ChannelId(channel_id),
        message_id: MessageId(message_id),
        connected_by: UserId(connected_by),
        connected_at: parse_ts(&connected_at),
        snapshot,
        status,
        entries,
        duplicate_attempts,
        winner_draw,
        schema_version,
    })
}

const CONNECTION_COLUMNS: &str =
    "allowlist_id, guild_id, channel_id, message_id, connected_by, connected_at, snapshot,
     status, entries, duplicate_attempts, winner_draw, schema_version";

#[async_trait::async_trait]
impl AllowlistRepository for SqlAllowlistRepository {
    async fn create(&self, connection: &AllowlistConnection) -> Result<(), RepositoryError> {
        let snapshot = serde_json::to_string(&connection.snapshot)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let entries = serde_json::to_string(&connection.entries)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let duplicate_attempts = serde_json::to_string(&connection.duplicate_attempts)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let winner_draw = serde_json::to_string(&connection.winner_draw)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO allowlist_connections (allowlist_id, guild_id, channel_id, message_id,
                                                connected_by, connected_at, snapshot, status,
                                                entries, duplicate_attempts, winner_draw,
                                                schema_version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(connection.allowlist_id.as_str())
        .bind(connection.guild_id.as_str())
        .bind(connection.channel_id.as_str())
        .bind(connection.message_id.as_str())
        .bind(connection.connected_by.as_str())
        .bind(connection.connected_at.to_rfc3339())
        .bind(&snapshot)
        .bind(connection.status.as_str())
        .bind(&entries)
        .bind(&duplicate_attempts)
        .bind(&winner_draw)
        .bind(connection.schema_version)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "this allowlist is already connected here"))?;

        Ok(())
    }

    async fn find(
        &self,
        allowlist_id: &AllowlistId,
        guild_id: &GuildId,
    ) -> Result<Option<AllowlistConnection>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM allowlist_connections
             WHERE allowlist_id = ? AND guild_id = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(allowlist_id.as_str())
        .bind(guild_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_connection(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<AllowlistConnection>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM allowlist_connections
             WHERE message_id = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(message_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_connection(r)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, connection: &AllowlistConnection) -> Result<(), RepositoryError> {
        let snapshot = serde_json::to_string(&connection.snapshot)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let entries = serde_json::to_string(&connection.entries)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let duplicate_attempts = serde_json::to_string(&connection.duplicate_attempts)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let winner_draw = serde_json::to_string(&connection.winner_draw)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "UPDATE allowlist_connections
             SET channel_id = ?, message_id = ?, snapshot = ?, status = ?, entries = ?,
                 duplicate_attempts = ?, winner_draw = ?, schema_version = ?
             WHERE allowlist_id = ? AND guild_id = ?",
        )
        .bind(connection.channel_id.as_str())
        .bind(connection.message_id.as_str())
        .bind(&snapshot)
        .bind(connection.status.as_str())
        .bind(&entries)
        .bind(&duplicate_attempts)
        .bind(&winner_draw)
        .bind(connection.schema_version)
        .bind(connection.allowlist_id.as_str())
        .bind(connection.guild_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_active_by_guild(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<AllowlistConnection>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM allowlist_connections
             WHERE guild_id = ? AND status = 'active' ORDER BY connected_at DESC"
        ))
        .bind(guild_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_connection).collect()
    }

    async fn expire_past_end(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        // Snapshot timestamps are serialized with a trailing Z; the bound
        // value must match that shape for the lexicographic compare.
        let now_z = now.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true);
        let result = sqlx::query(
            "UPDATE allowlist_connections
             SET status = 'expired'
             WHERE status = 'active'
               AND json_extract(snapshot, '$.ends_at') IS NOT NULL
               AND json_extract(snapshot, '$.ends_at') <= ?",
        )
        .bind(&now_z)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
