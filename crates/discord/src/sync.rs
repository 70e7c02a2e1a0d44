//! Applies Platform-originated task and allowlist updates to the messages
//! that were posted for them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use taskbridge_core::domain::allowlist::{AllowlistSnapshot, ConnectionStatus};
use taskbridge_core::domain::task::{TaskSnapshot, TaskStatus};
use taskbridge_core::domain::{AllowlistId, ChannelId, CommunityId, MessageId, TaskId};
use taskbridge_db::{
    AllowlistRepository, RepositoryError, ServerLinkRepository, TaskPostRepository,
};
use taskbridge_platform::{AllowlistInfo, PlatformTask};

use crate::embeds::{allowlist_message, task_post_message, ReplyPayload};
use crate::events::{ChatError, ChatPort};

/// Narrow edit seam so sync can be tested without a live chat connection.
#[async_trait]
pub trait MessageEditor: Send + Sync {
    /// Returns false when the message was deleted upstream.
    async fn message_exists(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<bool, ChatError>;

    async fn edit(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        payload: &ReplyPayload,
    ) -> Result<(), ChatError>;
}

/// An update pushed by the Platform for an entity some guild has posted.
#[derive(Clone, Debug)]
pub enum PlatformUpdate {
    Task { community_id: CommunityId, task: PlatformTask },
    Allowlist { community_id: CommunityId, allowlist: AllowlistInfo },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The stored snapshot changed and the posted message was edited.
    Applied,
    /// The update carried no visible change; the watermark still advanced.
    Unchanged,
    /// The update is at or before the stored watermark and was discarded.
    Stale,
    /// No post exists for this entity in the linked guild.
    MissingPost,
    /// The posted message was deleted upstream; the entity is now removed.
    Removed,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("repository failure during sync: {0}")]
    Repository(#[from] RepositoryError),
    #[error("chat failure during sync: {0}")]
    Chat(#[from] ChatError),
    #[error("update for unlinked community {0}")]
    UnlinkedCommunity(String),
}

pub struct RealtimeSync {
    links: Arc<dyn ServerLinkRepository>,
    posts: Arc<dyn TaskPostRepository>,
    allowlists: Arc<dyn AllowlistRepository>,
    editor: Arc<dyn MessageEditor>,
}

impl RealtimeSync {
    pub fn new(
        links: Arc<dyn ServerLinkRepository>,
        posts: Arc<dyn TaskPostRepository>,
        allowlists: Arc<dyn AllowlistRepository>,
        editor: Arc<dyn MessageEditor>,
    ) -> Self {
        Self { links, posts, allowlists, editor }
    }

    /// Applies one update. Last write wins: anything at or before the stored
    /// watermark is discarded, and re-applying the same update is a no-op.
    pub async fn apply(&self, update: &PlatformUpdate) -> Result<SyncOutcome, SyncError> {
        match update {
            PlatformUpdate::Task { community_id, task } => {
                self.apply_task(community_id, task).await
            }
            PlatformUpdate::Allowlist { community_id, allowlist } => {
                self.apply_allowlist(community_id, allowlist).await
            }
        }
    }

    async fn apply_task(
        &self,
        community_id: &CommunityId,
        task: &PlatformTask,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(link) = self.links.find_active_by_community(community_id).await? else {
            return Err(SyncError::UnlinkedCommunity(community_id.as_str().to_owned()));
        };
        let task_id = TaskId::from(task.id.as_str());
        let Some(mut post) = self.posts.find(&task_id, &link.guild_id).await? else {
            debug!(
                event_name = "sync_no_task_post",
                task_id = task.id.as_str(),
                guild_id = link.guild_id.as_str(),
                "update has no posted message here"
            );
            return Ok(SyncOutcome::MissingPost);
        };

        if is_stale(task.updated_at, post.snapshot.last_updated) {
            debug!(
                event_name = "sync_stale_task_update",
                task_id = task.id.as_str(),
                "discarding update at or before the stored watermark"
            );
            return Ok(SyncOutcome::Stale);
        }

        let incoming = TaskSnapshot {
            title: task.title.clone(),
            kind: task.kind,
            description: task.description.clone(),
            points: task.points,
            requirements: task.requirements.clone(),
            last_updated: task.updated_at,
        };

        if !self.editor.message_exists(&post.channel_id, &post.message_id).await? {
            post.status = TaskStatus::Removed;
            post.status_changed_at = Utc::now();
            post.snapshot = incoming;
            self.posts.update(&post).await?;
            info!(
                event_name = "task_post_removed",
                task_id = task.id.as_str(),
                guild_id = link.guild_id.as_str(),
                "posted message was deleted upstream"
            );
            return Ok(SyncOutcome::Removed);
        }

        let changed = !same_task_content(&post.snapshot, &incoming);
        post.snapshot = incoming;
        if changed {
            let payload = task_post_message(task_id.as_str(), &post.snapshot, post.ends_at);
            self.editor.edit(&post.channel_id, &post.message_id, &payload).await?;
        }
        self.posts.update(&post).await?;

        if changed {
            info!(
                event_name = "task_post_synced",
                task_id = task.id.as_str(),
                guild_id = link.guild_id.as_str(),
                "edited posted task in place"
            );
            Ok(SyncOutcome::Applied)
        } else {
            Ok(SyncOutcome::Unchanged)
        }
    }

    async fn apply_allowlist(
        &self,
        community_id: &CommunityId,
        info: &AllowlistInfo,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(link) = self.links.find_active_by_community(community_id).await? else {
            return Err(SyncError::UnlinkedCommunity(community_id.as_str().to_owned()));
        };
        let allowlist_id = AllowlistId::from(info.id.as_str());
        let Some(mut connection) = self.allowlists.find(&allowlist_id, &link.guild_id).await?
        else {
            return Ok(SyncOutcome::MissingPost);
        };

        if is_stale(info.updated_at, connection.snapshot.last_updated) {
            debug!(
                event_name = "sync_stale_allowlist_update",
                allowlist_id = info.id.as_str(),
                "discarding update at or before the stored watermark"
            );
            return Ok(SyncOutcome::Stale);
        }

        let incoming = AllowlistSnapshot {
            title: info.title.clone(),
            prize: info.prize.clone(),
            winner_count: info.winner_count,
            entry_price: info.entry_price,
            ends_at: info.ends_at,
            last_updated: info.updated_at,
        };

        if !self
            .editor
            .message_exists(&connection.channel_id, &connection.message_id)
            .await?
        {
            connection.status = ConnectionStatus::Removed;
            connection.snapshot = incoming;
            self.allowlists.update(&connection).await?;
            info!(
                event_name = "allowlist_post_removed",
                allowlist_id = info.id.as_str(),
                guild_id = link.guild_id.as_str(),
                "posted message was deleted upstream"
            );
            return Ok(SyncOutcome::Removed);
        }

        let changed = !same_allowlist_content(&connection.snapshot, &incoming);
        connection.snapshot = incoming;
        if changed {
            let payload = allowlist_message(
                allowlist_id.as_str(),
                &connection.snapshot,
                connection.non_duplicate_entry_count(),
            );
            self.editor
                .edit(&connection.channel_id, &connection.message_id, &payload)
                .await?;
        }
        self.allowlists.update(&connection).await?;

        if changed {
            info!(
                event_name = "allowlist_post_synced",
                allowlist_id = info.id.as_str(),
                guild_id = link.guild_id.as_str(),
                "edited posted allowlist in place"
            );
            Ok(SyncOutcome::Applied)
        } else {
            Ok(SyncOutcome::Unchanged)
        }
    }
}

fn is_stale(
    incoming: Option<chrono::DateTime<Utc>>,
    stored: Option<chrono::DateTime<Utc>>,
) -> bool {
    match (incoming, stored) {
        (Some(incoming), Some(stored)) => incoming <= stored,
        // Updates without a timestamp are treated as fresh.
        _ => false,
    }
}

fn same_task_content(stored: &TaskSnapshot, incoming: &TaskSnapshot) -> bool {
    stored.title == incoming.title
        && stored.kind == incoming.kind
        && stored.description == incoming.description
        && stored.points == incoming.points
        && stored.requirements == incoming.requirements
}

fn same_allowlist_content(stored: &AllowlistSnapshot, incoming: &AllowlistSnapshot) -> bool {
    stored.title == incoming.title
        && stored.prize == incoming.prize
        && stored.winner_count == incoming.winner_count
        && stored.entry_price == incoming.entry_price
        && stored.ends_at == incoming.ends_at
}

/// Edits through the chat port. The port cannot probe a message without
/// editing it, so deletion is only discovered when the edit itself fails.
pub struct ChatPortEditor {
    chat: Arc<dyn ChatPort>,
}

impl ChatPortEditor {
    pub fn new(chat: Arc<dyn ChatPort>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl MessageEditor for ChatPortEditor {
    async fn message_exists(
        &self,
        _channel_id: &ChannelId,
        _message_id: &MessageId,
    ) -> Result<bool, ChatError> {
        Ok(true)
    }

    async fn edit(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        payload: &ReplyPayload,
    ) -> Result<(), ChatError> {
        self.chat.edit_message(channel_id, message_id, payload).await
    }
}

/// Test double recording edits and scripting message existence.
pub struct RecordingEditor {
    missing: tokio::sync::Mutex<Vec<MessageId>>,
    edits: tokio::sync::Mutex<Vec<(ChannelId, MessageId, ReplyPayload)>>,
}

impl RecordingEditor {
    pub fn new() -> Self {
        Self {
            missing: tokio::sync::Mutex::new(Vec::new()),
            edits: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn mark_missing(&self, message_id: MessageId) {
        self.missing.lock().await.push(message_id);
    }

    pub async fn edits(&self) -> Vec<(ChannelId, MessageId, ReplyPayload)> {
        self.edits.lock().await.clone()
    }
}

impl Default for RecordingEditor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageEditor for RecordingEditor {
    async fn message_exists(
        &self,
        _channel_id: &ChannelId,
        message_id: &MessageId,
    ) -> Result<bool, ChatError> {
        Ok(!self.missing.lock().await.contains(message_id))
    }

    async fn edit(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        payload: &ReplyPayload,
    ) -> Result<(), ChatError> {
        self.edits
            .lock()
            .await
            .push((channel_id.clone(), message_id.clone(), payload.clone()));
        Ok(())
    }
}

/// Drains a stream of updates, logging failures without stopping.
pub async fn drain_updates(
    sync: &RealtimeSync,
    updates: &mut tokio::sync::mpsc::Receiver<PlatformUpdate>,
) {
    while let Some(update) = updates.recv().await {
        match sync.apply(&update).await {
            Ok(outcome) => {
                debug!(event_name = "sync_update_applied", outcome = ?outcome, "update processed");
            }
            Err(error) => {
                warn!(event_name = "sync_update_failed", error = %error, "update dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::json;

    use taskbridge_core::domain::link::{GuildSnapshot, ServerCommunityLink};
    use taskbridge_core::domain::task::{TaskKind, TaskPost, TaskSnapshot, TaskStatus};
    use taskbridge_core::domain::{ChannelId, CommunityId, GuildId, MessageId, TaskId, UserId};
    use taskbridge_db::repositories::{
        InMemoryAllowlistRepository, InMemoryServerLinkRepository, InMemoryTaskPostRepository,
    };
    use taskbridge_db::{ServerLinkRepository, TaskPostRepository};
    use taskbridge_platform::PlatformTask;

    use super::{PlatformUpdate, RealtimeSync, RecordingEditor, SyncOutcome};

    fn guild_snapshot() -> GuildSnapshot {
        GuildSnapshot {
            name: "Test Guild".to_owned(),
            member_count: 42,
            owner_id: UserId::from("U0"),
            last_updated: Utc::now(),
        }
    }

    fn task_snapshot(title: &str) -> TaskSnapshot {
        TaskSnapshot {
            title: title.to_owned(),
            kind: TaskKind::TwitterFollow,
            description: "Follow us".to_owned(),
            points: 50,
            requirements: json!({ "handle": "@example" }),
            last_updated: Some(Utc::now() - Duration::hours(1)),
        }
    }

    fn platform_task(title: &str) -> PlatformTask {
        PlatformTask {
            id: "T1".to_owned(),
            community_id: "COM1".to_owned(),
            title: title.to_owned(),
            kind: TaskKind::TwitterFollow,
            description: "Follow us".to_owned(),
            points: 50,
            requirements: json!({ "handle": "@example" }),
            active: true,
            updated_at: Some(Utc::now()),
        }
    }

    struct Fixture {
        sync: RealtimeSync,
        posts: Arc<InMemoryTaskPostRepository>,
        editor: Arc<RecordingEditor>,
    }

    async fn fixture() -> Fixture {
        let links = Arc::new(InMemoryServerLinkRepository::new());
        links
            .create(&ServerCommunityLink::new(
                GuildId::from("G1"),
                CommunityId::from("COM1"),
                UserId::from("U1"),
                guild_snapshot(),
            ))
            .await
            .expect("seed link");
        let posts = Arc::new(InMemoryTaskPostRepository::new());
        let post = TaskPost::new(
            TaskId::from("T1"),
            GuildId::from("G1"),
            ChannelId::from("C1"),
            MessageId::from("M1"),
            UserId::from("U1"),
            task_snapshot("Follow our Twitter"),
            None,
        )
        .expect("post");
        posts.create(&post).await.expect("seed post");
        let editor = Arc::new(RecordingEditor::new());
        let sync = RealtimeSync::new(
            links,
            posts.clone(),
            Arc::new(InMemoryAllowlistRepository::new()),
            editor.clone(),
        );
        Fixture { sync, posts, editor }
    }

    fn update(task: PlatformTask) -> PlatformUpdate {
        PlatformUpdate::Task { community_id: CommunityId::from("COM1"), task }
    }

    #[tokio::test(start_paused = true)]
    async fn newer_update_edits_the_posted_message() {
        let fixture = fixture().await;

        let outcome = fixture
            .sync
            .apply(&update(platform_task("Follow our new handle")))
            .await
            .expect("apply");

        assert_eq!(outcome, SyncOutcome::Applied);
        let edits = fixture.editor.edits().await;
        assert_eq!(edits.len(), 1);
        let embed = edits[0].2.embed.clone().expect("embed");
        assert!(embed.title.contains("Follow our new handle"));
        let stored = fixture
            .posts
            .find(&TaskId::from("T1"), &GuildId::from("G1"))
            .await
            .expect("find")
            .expect("post");
        assert_eq!(stored.snapshot.title, "Follow our new handle");
        assert_eq!(stored.snapshot.kind, TaskKind::TwitterFollow);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_update_is_discarded() {
        let fixture = fixture().await;
        let mut task = platform_task("An older title");
        task.updated_at = Some(Utc::now() - Duration::hours(2));

        let outcome = fixture.sync.apply(&update(task)).await.expect("apply");

        assert_eq!(outcome, SyncOutcome::Stale);
        assert!(fixture.editor.edits().await.is_empty());
        let stored = fixture
            .posts
            .find(&TaskId::from("T1"), &GuildId::from("G1"))
            .await
            .expect("find")
            .expect("post");
        assert_eq!(stored.snapshot.title, "Follow our Twitter");
    }

    #[tokio::test(start_paused = true)]
    async fn applying_the_same_update_twice_edits_once() {
        let fixture = fixture().await;
        let first = platform_task("Follow our new handle");
        let mut second = first.clone();
        second.updated_at = Some(first.updated_at.expect("ts") + Duration::seconds(1));

        fixture.sync.apply(&update(first)).await.expect("first apply");
        let outcome = fixture.sync.apply(&update(second)).await.expect("second apply");

        assert_eq!(outcome, SyncOutcome::Unchanged);
        assert_eq!(fixture.editor.edits().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_message_marks_the_post_removed() {
        let fixture = fixture().await;
        fixture.editor.mark_missing(MessageId::from("M1")).await;

        let outcome = fixture
            .sync
            .apply(&update(platform_task("Whatever")))
            .await
            .expect("apply");

        assert_eq!(outcome, SyncOutcome::Removed);
        assert!(fixture.editor.edits().await.is_empty());
        let stored = fixture
            .posts
            .find(&TaskId::from("T1"), &GuildId::from("G1"))
            .await
            .expect("find")
            .expect("post");
        assert_eq!(stored.status, TaskStatus::Removed);
    }

    #[tokio::test(start_paused = true)]
    async fn update_for_an_unposted_task_reports_missing() {
        let fixture = fixture().await;
        let mut task = platform_task("Other task");
        task.id = "T9".to_owned();

        let outcome = fixture.sync.apply(&update(task)).await.expect("apply");

        assert_eq!(outcome, SyncOutcome::MissingPost);
    }
}
