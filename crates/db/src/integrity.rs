use sqlx::Row;

use taskbridge_core::domain::{AllowlistId, TaskId};

use crate::repositories::{CollectionStats, RepositoryError};
use crate::DbPool;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Active task posts whose guild has no active server link.
    pub orphan_tasks: Vec<TaskId>,
    /// Active allowlist connections whose guild has no active server link.
    pub orphan_allowlists: Vec<AllowlistId>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphan_tasks.is_empty() && self.orphan_allowlists.is_empty()
    }
}

pub async fn validate_integrity(pool: &DbPool) -> Result<IntegrityReport, RepositoryError> {
    let orphan_tasks = sqlx::query(
        "SELECT t.task_id FROM task_posts t
         WHERE t.status = 'active'
           AND NOT EXISTS (SELECT 1 FROM server_links s
                           WHERE s.guild_id = t.guild_id AND s.active = 1)
         ORDER BY t.task_id",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| {
        row.try_get::<String, _>("task_id")
            .map(TaskId)
            .map_err(|e| RepositoryError::Decode(e.to_string()))
    })
    .collect::<Result<Vec<_>, _>>()?;

    let orphan_allowlists = sqlx::query(
        "SELECT a.allowlist_id FROM allowlist_connections a
         WHERE a.status = 'active'
           AND NOT EXISTS (SELECT 1 FROM server_links s
                           WHERE s.guild_id = a.guild_id AND s.active = 1)
         ORDER BY a.allowlist_id",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| {
        row.try_get::<String, _>("allowlist_id")
            .map(AllowlistId)
            .map_err(|e| RepositoryError::Decode(e.to_string()))
    })
    .collect::<Result<Vec<_>, _>>()?;

    Ok(IntegrityReport { orphan_tasks, orphan_allowlists })
}

pub async fn collection_stats(pool: &DbPool) -> Result<CollectionStats, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            (SELECT COUNT(*) FROM server_links) AS server_links,
            (SELECT COUNT(*) FROM server_links WHERE active = 1) AS active_server_links,
            (SELECT COUNT(*) FROM user_links) AS user_links,
            (SELECT COUNT(*) FROM user_links WHERE active = 1) AS active_user_links,
            (SELECT COUNT(*) FROM task_posts) AS task_posts,
            (SELECT COUNT(*) FROM task_posts WHERE status = 'active') AS active_task_posts,
            (SELECT COUNT(*) FROM allowlist_connections) AS allowlist_connections,
            (SELECT COUNT(*) FROM allowlist_connections WHERE status = 'active')
                AS active_allowlist_connections,
            (SELECT COUNT(*) FROM interaction_logs) AS interaction_logs,
            (SELECT COUNT(*) FROM interaction_logs WHERE archived = 1)
                AS archived_interaction_logs",
    )
    .fetch_one(pool)
    .await?;

    let count = |column: &str| -> u64 { row.try_get::<i64, _>(column).unwrap_or(0).max(0) as u64 };

    Ok(CollectionStats {
        server_links: count("server_links"),
        active_server_links: count("active_server_links"),
        user_links: count("user_links"),
        active_user_links: count("active_user_links"),
        task_posts: count("task_posts"),
        active_task_posts: count("active_task_posts"),
        allowlist_connections: count("allowlist_connections"),
        active_allowlist_connections: count("active_allowlist_connections"),
        interaction_logs: count("interaction_logs"),
        archived_interaction_logs: count("archived_interaction_logs"),
    })
}
