use chrono::{DateTime, Utc};
use sqlx::Row;

use taskbridge_core::domain::task::{TaskPost, TaskSnapshot, TaskStatus};
use taskbridge_core::domain::{ChannelId, GuildId, MessageId, TaskId, UserId};

use super::server_link::parse_ts;
use super::{RepositoryError, TaskPostRepository};
use crate::DbPool;

pub struct SqlTaskPostRepository {
    pool: DbPool,
}

impl SqlTaskPostRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_post(row: &sqlx::sqlite::SqliteRow) -> Result<TaskPost, RepositoryError> {
    let task_id: String =
        row.try_get("task_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let guild_id: String =
        row.try_get("guild_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let channel_id: String =
        row.try_get("channel_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let message_id: String =
        row.try_get("message_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_by: String =
        row.try_get("created_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let snapshot: String =
        row.try_get("snapshot").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let starts_at: String =
        row.try_get("starts_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let ends_at: String =
        row.try_get("ends_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_changed_at: String =
        row.try_get("status_changed_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let views: i64 = row.try_get("views").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let completions: i64 =
        row.try_get("completions").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let unique_viewers: i64 =
        row.try_get("unique_viewers").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let schema_version: i64 =
        row.try_get("schema_version").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let snapshot: TaskSnapshot =
        serde_json::from_str(&snapshot).map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status = TaskStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown task status `{status}`")))?;

    Ok(TaskPost {
        task_id: TaskId(task_id),
        guild_id: GuildId(guild_id),
        channel_id: ChannelId(channel_id),
        message_id: MessageId(message_id),
        created_by: UserId(created_by),
        snapshot,
        starts_at: parse_ts(&starts_at),
        ends_at: parse_ts(&ends_at),
        status,
        status_changed_at: parse_ts(&status_changed_at),
        views: views.max(0) as u64,
        completions: completions.max(0) as u64,
        unique_viewers: unique_viewers.max(0) as u64,
        schema_version,
    })
}

const POST_COLUMNS: &str = "task_id, guild_id, channel_id, message_id, created_by, snapshot,
                            starts_at, ends_at, status, status_changed_at, views, completions,
                            unique_viewers, schema_version";

#[async_trait::async_trait]
impl TaskPostRepository for SqlTaskPostRepository {
    async fn create(&self, post: &TaskPost) -> Result<(), RepositoryError> {
        let snapshot = serde_json::to_string(&post.snapshot)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO task_posts (task_id, guild_id, channel_id, message_id, created_by,
                                     snapshot, starts_at, ends_at, status, status_changed_at,
                                     views, completions, unique_viewers, schema_version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(post.task_id.as_str())
        .bind(post.guild_id.as_str())
        .bind(post.channel_id.as_str())
        .bind(post.message_id.as_str())
        .bind(post.created_by.as_str())
        .bind(&snapshot)
        .bind(post.starts_at.to_rfc3339())
        .bind(post.ends_at.to_rfc3339())
        .bind(post.status.as_str())
        .bind(post.status_changed_at.to_rfc3339())
        .bind(post.views as i64)
        .bind(post.completions as i64)
        .bind(post.unique_viewers as i64)
        .bind(post.schema_version)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "this task is already posted here"))?;

        Ok(())
    }

    async fn find(
        &self,
        task_id: &TaskId,
        guild_id: &GuildId,
    ) -> Result<Option<TaskPost>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM task_posts
             WHERE task_id = ? AND guild_id = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(task_id.as_str())
        .bind(guild_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_post(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<TaskPost>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM task_posts
             WHERE message_id = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(message_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_post(r)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, post: &TaskPost) -> Result<(), RepositoryError> {
        let snapshot = serde_json::to_string(&post.snapshot)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "UPDATE task_posts
             SET channel_id = ?, message_id = ?, snapshot = ?, ends_at = ?, status = ?,
                 status_changed_at = ?, views = ?, completions = ?, unique_viewers = ?,
                 schema_version = ?
             WHERE task_id = ? AND guild_id = ?",
        )
        .bind(post.channel_id.as_str())
        .bind(post.message_id.as_str())
        .bind(&snapshot)
        .bind(post.ends_at.to_rfc3339())
        .bind(post.status.as_str())
        .bind(post.status_changed_at.to_rfc3339())
        .bind(post.views as i64)
        .bind(post.completions as i64)
        .bind(post.unique_viewers as i64)
        .bind(post.schema_version)
        .bind(post.task_id.as_str())
        .bind(post.guild_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_active_by_guild(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<TaskPost>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {POST_COLUMNS} FROM task_posts
             WHERE guild_id = ? AND status = 'active' ORDER BY starts_at DESC"
        ))
        .bind(guild_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_post).collect()
    }

    async fn expire_past_end(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE task_posts
             SET status = 'expired', status_changed_at = ?
             WHERE status = 'active' AND ends_at <= ?",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use taskbridge_core::domain::task::TaskKind;

    use super::*;
    use crate::connect_with_settings;
    use crate::migrations::run_pending;

    async fn repo() -> SqlTaskPostRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlTaskPostRepository::new(pool)
    }

    fn post(task: &str, guild: &str) -> TaskPost {
        TaskPost::new(
            TaskId::from(task),
            GuildId::from(guild),
            ChannelId::from("C1"),
            MessageId::from(format!("M-{task}-{guild}").as_str()),
            UserId::from("U1"),
            TaskSnapshot {
                title: "Follow us".to_owned(),
                kind: TaskKind::TwitterFollow,
                description: "Follow the account".to_owned(),
                points: 100,
                requirements: serde_json::json!({ "handle": "community" }),
                last_updated: None,
            },
            None,
        )
        .expect("valid post")
    }

    #[tokio::test]
    async fn create_and_find_round_trips() {
        let repo = repo().await;
        let post = post("T1", "G1");
        repo.create(&post).await.expect("create");

        let found = repo
            .find(&TaskId::from("T1"), &GuildId::from("G1"))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.snapshot, post.snapshot);
        assert_eq!(found.status, TaskStatus::Active);
    }

    #[tokio::test]
    async fn duplicate_active_post_conflicts() {
        let repo = repo().await;
        repo.create(&post("T1", "G1")).await.expect("create");
        let error = repo.create(&post("T1", "G1")).await.expect_err("should conflict");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn same_task_in_another_guild_is_fine() {
        let repo = repo().await;
        repo.create(&post("T1", "G1")).await.expect("create");
        repo.create(&post("T1", "G2")).await.expect("create in second guild");
    }

    #[tokio::test]
    async fn expire_past_end_transitions_only_due_posts() {
        let repo = repo().await;
        let now = Utc::now();

        let mut due = post("T1", "G1");
        due.ends_at = now - Duration::hours(1);
        repo.create(&due).await.expect("create due");
        repo.create(&post("T2", "G1")).await.expect("create live");

        let expired = repo.expire_past_end(now).await.expect("expire");
        assert_eq!(expired, 1);

        let active = repo.list_active_by_guild(&GuildId::from("G1")).await.expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].task_id, TaskId::from("T2"));

        let found = repo
            .find(&TaskId::from("T1"), &GuildId::from("G1"))
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.status, TaskStatus::Expired);
    }

    #[tokio::test]
    async fn expire_at_exact_end_time_counts() {
        let repo = repo().await;
        let now = Utc::now();

        let mut due = post("T1", "G1");
        due.ends_at = now;
        repo.create(&due).await.expect("create");

        assert_eq!(repo.expire_past_end(now).await.expect("expire"), 1);
    }

    #[tokio::test]
    async fn find_by_message_locates_post() {
        let repo = repo().await;
        let post = post("T1", "G1");
        repo.create(&post).await.expect("create");

        let found = repo.find_by_message(&post.message_id).await.expect("find").expect("present");
        assert_eq!(found.task_id, TaskId::from("T1"));
    }
}
