use chrono::{DateTime, Duration, Utc};
use sqlx::Row;

use taskbridge_core::domain::interaction::{EventCategory, InteractionRecord, PipelineOutcome};
use taskbridge_core::domain::{EventId, GuildId, UserId};

use super::server_link::parse_ts;
use super::{
    GuildAnalytics, InteractionFilter, InteractionLogRepository, PlatformAnalytics,
    RepositoryError,
};
use crate::DbPool;

pub struct SqlInteractionLogRepository {
    pool: DbPool,
}

impl SqlInteractionLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<InteractionRecord, RepositoryError> {
    let event_id: String =
        row.try_get("event_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let guild_id: String =
        row.try_get("guild_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let user_id: String =
        row.try_get("user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let category: String =
        row.try_get("category").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let action: String =
        row.try_get("action").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let outcome: String =
        row.try_get("outcome").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let response_time_ms: i64 =
        row.try_get("response_time_ms").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let context: String =
        row.try_get("context").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let occurred_at: String =
        row.try_get("occurred_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let archived: i64 =
        row.try_get("archived").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let category = EventCategory::parse(&category)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown category `{category}`")))?;
    let outcome = PipelineOutcome::parse(&outcome)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown outcome `{outcome}`")))?;
    let context: serde_json::Value =
        serde_json::from_str(&context).map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(InteractionRecord {
        event_id: EventId(event_id),
        guild_id: GuildId(guild_id),
        user_id: UserId(user_id),
        category,
        name,
        action,
        outcome,
        response_time_ms: response_time_ms.max(0) as u64,
        context,
        occurred_at: parse_ts(&occurred_at),
        archived: archived != 0,
    })
}

fn outcome_count(row: &sqlx::sqlite::SqliteRow, column: &str) -> u64 {
    row.try_get::<i64, _>(column).unwrap_or(0).max(0) as u64
}

#[async_trait::async_trait]
impl InteractionLogRepository for SqlInteractionLogRepository {
    async fn log(&self, record: &InteractionRecord) -> Result<(), RepositoryError> {
        let context = serde_json::to_string(&record.context)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO interaction_logs (event_id, guild_id, user_id, category, name, action,
                                           outcome, response_time_ms, context, occurred_at,
                                           archived)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.event_id.as_str())
        .bind(record.guild_id.as_str())
        .bind(record.user_id.as_str())
        .bind(record.category.as_str())
        .bind(&record.name)
        .bind(&record.action)
        .bind(record.outcome.as_str())
        .bind(record.response_time_ms as i64)
        .bind(&context)
        .bind(record.occurred_at.to_rfc3339())
        .bind(record.archived as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        filter: &InteractionFilter,
    ) -> Result<Vec<InteractionRecord>, RepositoryError> {
        let mut sql = String::from(
            "SELECT event_id, guild_id, user_id, category, name, action, outcome,
                    response_time_ms, context, occurred_at, archived
             FROM interaction_logs WHERE 1 = 1",
        );
        if filter.guild_id.is_some() {
            sql.push_str(" AND guild_id = ?");
        }
        if filter.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filter.category.is_some() {
            sql.push_str(" AND category = ?");
        }
        if filter.outcome.is_some() {
            sql.push_str(" AND outcome = ?");
        }
        if filter.since.is_some() {
            sql.push_str(" AND occurred_at >= ?");
        }
        if filter.until.is_some() {
            sql.push_str(" AND occurred_at < ?");
        }
        sql.push_str(" ORDER BY occurred_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(guild_id) = &filter.guild_id {
            query = query.bind(guild_id.as_str());
        }
        if let Some(user_id) = &filter.user_id {
            query = query.bind(user_id.as_str());
        }
        if let Some(category) = filter.category {
            query = query.bind(category.as_str());
        }
        if let Some(outcome) = filter.outcome {
            query = query.bind(outcome.as_str());
        }
        if let Some(since) = filter.since {
            query = query.bind(since.to_rfc3339());
        }
        if let Some(until) = filter.until {
            query = query.bind(until.to_rfc3339());
        }
        query = query.bind(i64::from(filter.limit.unwrap_or(100)));

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn guild_analytics(
        &self,
        guild_id: &GuildId,
        days: i64,
    ) -> Result<GuildAnalytics, RepositoryError> {
        let since = Utc::now() - Duration::days(days.max(0));
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    SUM(outcome = 'success') AS successes,
                    SUM(outcome = 'error') AS errors,
                    SUM(outcome = 'denied') AS denied,
                    SUM(outcome = 'cooldown') AS cooldowns,
                    SUM(outcome = 'rate-limit') AS rate_limited,
                    COUNT(DISTINCT user_id) AS unique_users,
                    IFNULL(AVG(response_time_ms), 0.0) AS avg_ms
             FROM interaction_logs
             WHERE guild_id = ? AND occurred_at >= ?",
        )
        .bind(guild_id.as_str())
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(GuildAnalytics {
            total_events: outcome_count(&row, "total"),
            successes: outcome_count(&row, "successes"),
            errors: outcome_count(&row, "errors"),
            denied: outcome_count(&row, "denied"),
            cooldowns: outcome_count(&row, "cooldowns"),
            rate_limited: outcome_count(&row, "rate_limited"),
            unique_users: outcome_count(&row, "unique_users"),
            avg_response_time_ms: row.try_get::<f64, _>("avg_ms").unwrap_or(0.0),
        })
    }

    async fn platform_analytics(&self, days: i64) -> Result<PlatformAnalytics, RepositoryError> {
        let since = Utc::now() - Duration::days(days.max(0));
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COUNT(DISTINCT guild_id) AS active_guilds,
                    COUNT(DISTINCT user_id) AS unique_users,
                    SUM(outcome = 'success') AS successes,
                    SUM(outcome = 'error') AS errors,
                    IFNULL(AVG(response_time_ms), 0.0) AS avg_ms
             FROM interaction_logs
             WHERE occurred_at >= ?",
        )
        .bind(since.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        Ok(PlatformAnalytics {
            total_events: outcome_count(&row, "total"),
            active_guilds: outcome_count(&row, "active_guilds"),
            unique_users: outcome_count(&row, "unique_users"),
            successes: outcome_count(&row, "successes"),
            errors: outcome_count(&row, "errors"),
            avg_response_time_ms: row.try_get::<f64, _>("avg_ms").unwrap_or(0.0),
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM interaction_logs WHERE occurred_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn archive_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE interaction_logs
             SET archived = 1
             WHERE archived = 0 AND occurred_at >= ? AND occurred_at < ?",
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect_with_settings;
    use crate::migrations::run_pending;

    async fn repo() -> SqlInteractionLogRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlInteractionLogRepository::new(pool)
    }

    fn record(guild: &str, user: &str, outcome: PipelineOutcome, ms: u64) -> InteractionRecord {
        InteractionRecord::new(
            GuildId::from(guild),
            UserId::from(user),
            EventCategory::Command,
            "list-tasks",
            "execute",
            outcome,
            ms,
        )
    }

    #[tokio::test]
    async fn log_and_query_round_trips() {
        let repo = repo().await;
        let record = record("G1", "U1", PipelineOutcome::Success, 42)
            .with_context(serde_json::json!({ "channel": "C1" }));
        repo.log(&record).await.expect("log");

        let found = repo
            .query(&InteractionFilter {
                guild_id: Some(GuildId::from("G1")),
                ..InteractionFilter::default()
            })
            .await
            .expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].event_id, record.event_id);
        assert_eq!(found[0].context, record.context);
    }

    #[tokio::test]
    async fn query_filters_by_outcome_and_user() {
        let repo = repo().await;
        repo.log(&record("G1", "U1", PipelineOutcome::Success, 10)).await.expect("log");
        repo.log(&record("G1", "U1", PipelineOutcome::Denied, 5)).await.expect("log");
        repo.log(&record("G1", "U2", PipelineOutcome::Denied, 5)).await.expect("log");

        let denied = repo
            .query(&InteractionFilter {
                user_id: Some(UserId::from("U1")),
                outcome: Some(PipelineOutcome::Denied),
                ..InteractionFilter::default()
            })
            .await
            .expect("query");
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].user_id, UserId::from("U1"));
    }

    #[tokio::test]
    async fn guild_analytics_counts_outcomes() {
        let repo = repo().await;
        repo.log(&record("G1", "U1", PipelineOutcome::Success, 10)).await.expect("log");
        repo.log(&record("G1", "U2", PipelineOutcome::Success, 30)).await.expect("log");
        repo.log(&record("G1", "U1", PipelineOutcome::RateLimit, 2)).await.expect("log");
        repo.log(&record("G2", "U3", PipelineOutcome::Error, 100)).await.expect("log");

        let analytics =
            repo.guild_analytics(&GuildId::from("G1"), 30).await.expect("analytics");
        assert_eq!(analytics.total_events, 3);
        assert_eq!(analytics.successes, 2);
        assert_eq!(analytics.rate_limited, 1);
        assert_eq!(analytics.unique_users, 2);
        assert!((analytics.avg_response_time_ms - 14.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn platform_analytics_spans_guilds() {
        let repo = repo().await;
        repo.log(&record("G1", "U1", PipelineOutcome::Success, 10)).await.expect("log");
        repo.log(&record("G2", "U2", PipelineOutcome::Error, 20)).await.expect("log");

        let analytics = repo.platform_analytics(30).await.expect("analytics");
        assert_eq!(analytics.total_events, 2);
        assert_eq!(analytics.active_guilds, 2);
        assert_eq!(analytics.successes, 1);
        assert_eq!(analytics.errors, 1);
    }

    #[tokio::test]
    async fn retention_windows_delete_and_archive() {
        let repo = repo().await;
        let now = Utc::now();

        let mut ancient = record("G1", "U1", PipelineOutcome::Success, 10);
        ancient.occurred_at = now - Duration::days(120);
        let mut aging = record("G1", "U1", PipelineOutcome::Success, 10);
        aging.occurred_at = now - Duration::days(45);
        let fresh = record("G1", "U1", PipelineOutcome::Success, 10);

        repo.log(&ancient).await.expect("log");
        repo.log(&aging).await.expect("log");
        repo.log(&fresh).await.expect("log");

        let deleted = repo.delete_older_than(now - Duration::days(90)).await.expect("delete");
        assert_eq!(deleted, 1);

        let archived = repo
            .archive_between(now - Duration::days(90), now - Duration::days(30))
            .await
            .expect("archive");
        assert_eq!(archived, 1);

        let all = repo.query(&InteractionFilter::default()).await.expect("query");
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|r| r.archived).count(), 1);
    }
}
