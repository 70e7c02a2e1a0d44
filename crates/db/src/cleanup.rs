use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::repositories::{
    AllowlistRepository, InteractionLogRepository, RepositoryError, TaskPostRepository,
    UserLinkRepository,
};

/// Interaction logs older than this are deleted outright.
pub const DELETE_AFTER_DAYS: i64 = 90;
/// Logs between this age and the delete horizon are flagged archived.
pub const ARCHIVE_AFTER_DAYS: i64 = 30;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted_logs: u64,
    pub archived_logs: u64,
    pub cleared_tokens: u64,
    pub expired_tasks: u64,
    pub expired_allowlists: u64,
}

/// Hourly retention pass. Never deletes active entities; active records only
/// leave through the active -> expired transition.
pub struct CleanupJob {
    interaction_logs: Arc<dyn InteractionLogRepository>,
    user_links: Arc<dyn UserLinkRepository>,
    task_posts: Arc<dyn TaskPostRepository>,
    allowlists: Arc<dyn AllowlistRepository>,
}

impl CleanupJob {
    pub fn new(
        interaction_logs: Arc<dyn InteractionLogRepository>,
        user_links: Arc<dyn UserLinkRepository>,
        task_posts: Arc<dyn TaskPostRepository>,
        allowlists: Arc<dyn AllowlistRepository>,
    ) -> Self {
        Self { interaction_logs, user_links, task_posts, allowlists }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<CleanupReport, RepositoryError> {
        let delete_before = now - Duration::days(DELETE_AFTER_DAYS);
        let archive_before = now - Duration::days(ARCHIVE_AFTER_DAYS);

        let deleted_logs = self.interaction_logs.delete_older_than(delete_before).await?;
        let archived_logs =
            self.interaction_logs.archive_between(delete_before, archive_before).await?;
        let cleared_tokens = self.user_links.deactivate_expired_unverified(now).await?;
        let expired_tasks = self.task_posts.expire_past_end(now).await?;
        let expired_allowlists = self.allowlists.expire_past_end(now).await?;

        let report = CleanupReport {
            deleted_logs,
            archived_logs,
            cleared_tokens,
            expired_tasks,
            expired_allowlists,
        };
        info!(
            event_name = "cleanup_completed",
            deleted_logs = report.deleted_logs,
            archived_logs = report.archived_logs,
            cleared_tokens = report.cleared_tokens,
            expired_tasks = report.expired_tasks,
            expired_allowlists = report.expired_allowlists,
            "cleanup pass finished"
        );
        Ok(report)
    }
}
