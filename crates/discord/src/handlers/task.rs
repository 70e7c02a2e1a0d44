use std::sync::Arc;

use serde_json::json;
use tracing::info;

use taskbridge_cache::{StagedTaskDraft, TaskStaging};
use taskbridge_core::domain::task::{
    TaskKind, TaskPost, TaskSnapshot, TaskStatus, DEFAULT_DURATION_HOURS, MAX_DURATION_HOURS,
    MIN_DURATION_HOURS,
};
use taskbridge_core::domain::{MessageId, TaskId};
use taskbridge_db::{ServerLinkRepository, TaskPostRepository, UserLinkRepository};
use taskbridge_platform::{NewTask, PlatformApi, PlatformError, RetryExecutor};

use crate::commands::{ButtonAction, CommandOptions};
use crate::embeds::{task_post_message, EmbedBuilder, COLOR_INFO, COLOR_SUCCESS};
use crate::events::{ChatPort, GatewayEnvelope, GatewayEvent, ModalInput, ModalPrompt};
use crate::handlers::{HandlerContext, HandlerError, HandlerReply, InteractionHandler};

pub const CREATE_TASK_MODAL_ID: &str = "create_task_modal";

/// Requirement input gathered per task type. The field key doubles as the
/// key inside the snapshot's requirements object.
fn requirement_input(kind: TaskKind) -> ModalInput {
    let (field, label) = match kind {
        TaskKind::TwitterFollow => ("handle", "Twitter handle to follow"),
        TaskKind::DiscordJoin => ("invite_url", "Server invite URL"),
        TaskKind::TelegramJoin => ("channel_url", "Telegram channel URL"),
        TaskKind::Custom => ("instructions", "What should members do?"),
    };
    ModalInput { field: field.to_owned(), label: label.to_owned(), required: true }
}

fn create_task_modal(kind: TaskKind) -> ModalPrompt {
    ModalPrompt {
        custom_id: CREATE_TASK_MODAL_ID.to_owned(),
        title: "Create Task".to_owned(),
        inputs: vec![
            ModalInput { field: "title".to_owned(), label: "Title".to_owned(), required: true },
            ModalInput {
                field: "description".to_owned(),
                label: "Description".to_owned(),
                required: false,
            },
            ModalInput { field: "points".to_owned(), label: "Points".to_owned(), required: true },
            ModalInput {
                field: "duration_hours".to_owned(),
                label: "Duration in hours (default one week)".to_owned(),
                required: false,
            },
            requirement_input(kind),
        ],
    }
}

/// `/create-task type:<kind>`. Stages the draft and opens the modal; the
/// actual creation happens on modal submit.
pub struct CreateTaskHandler {
    staging: Arc<TaskStaging>,
}

impl CreateTaskHandler {
    pub fn new(staging: Arc<TaskStaging>) -> Self {
        Self { staging }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for CreateTaskHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let GatewayEvent::Command { options, .. } = &envelope.event else {
            return Err(HandlerError::user("This action is only available as a command."));
        };
        let options = CommandOptions::new(options);
        let raw_kind = options.require("type")?;
        let Some(kind) = TaskKind::parse(raw_kind) else {
            return Err(HandlerError::user(format!(
                "Unknown task type `{raw_kind}`. Use twitter_follow, discord_join, telegram_join or custom.",
            )));
        };

        let draft = StagedTaskDraft::new(kind, envelope.channel_id.clone());
        self.staging
            .stage(&envelope.member.user_id, &envelope.guild_id, &draft)
            .await
            .map_err(|e| HandlerError::cache("staging.stage", e))?;

        ctx.responder
            .open_modal(&create_task_modal(kind))
            .await
            .map_err(|e| HandlerError::respond("chat.open_modal", e))?;
        Ok(HandlerReply::already_responded().with_context(json!({ "kind": kind.as_str() })))
    }
}

/// Submit side of the create-task modal. The staged draft is consumed
/// exactly once, so a double submit creates at most one task.
pub struct CreateTaskModalHandler {
    staging: Arc<TaskStaging>,
    links: Arc<dyn ServerLinkRepository>,
    posts: Arc<dyn TaskPostRepository>,
    platform: Arc<dyn PlatformApi>,
    chat: Arc<dyn ChatPort>,
}

impl CreateTaskModalHandler {
    pub fn new(
        staging: Arc<TaskStaging>,
        links: Arc<dyn ServerLinkRepository>,
        posts: Arc<dyn TaskPostRepository>,
        platform: Arc<dyn PlatformApi>,
        chat: Arc<dyn ChatPort>,
    ) -> Self {
        Self { staging, links, posts, platform, chat }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for CreateTaskModalHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let GatewayEvent::ModalSubmit { fields, .. } = &envelope.event else {
            return Err(HandlerError::user("This action is only available as a modal submit."));
        };

        let Some(draft) = self
            .staging
            .take(&envelope.member.user_id, &envelope.guild_id)
            .await
            .map_err(|e| HandlerError::cache("staging.take", e))?
        else {
            return Err(HandlerError::user(
                "Your task creation session expired. Run /create-task again.",
            ));
        };

        let Some(link) = self
            .links
            .find_active_by_guild(&envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("server_link.find_active", e))?
        else {
            return Err(HandlerError::user(
                "Link this server to a community with /link-community first.",
            ));
        };

        let fields = CommandOptions::new(fields);
        let title = fields.require("title")?.to_owned();
        let description = fields.get("description").unwrap_or("").to_owned();
        let points = fields.u32_value("points")?;
        let duration_hours = fields.i64_opt("duration_hours")?;
        if let Some(hours) = duration_hours {
            if !(MIN_DURATION_HOURS..=MAX_DURATION_HOURS).contains(&hours) {
                return Err(HandlerError::user(format!(
                    "Duration must be {MIN_DURATION_HOURS}-{MAX_DURATION_HOURS} hours.",
                )));
            }
        }
        let requirement = requirement_input(draft.kind);
        let requirement_value = fields.require(&requirement.field)?;
        let mut requirement_map = serde_json::Map::new();
        requirement_map.insert(requirement.field.clone(), json!(requirement_value));
        let requirements = serde_json::Value::Object(requirement_map);

        let snapshot = TaskSnapshot {
            title,
            kind: draft.kind,
            description,
            points,
            requirements: requirements.clone(),
            last_updated: None,
        };
        snapshot.validate().map_err(|e| HandlerError::user(e.to_string()))?;

        // Not idempotent: a retry here could create duplicate tasks.
        let created = self
            .platform
            .create_task(&NewTask {
                community_id: link.community_id.as_str().to_owned(),
                title: snapshot.title.clone(),
                kind: snapshot.kind,
                description: snapshot.description.clone(),
                points: snapshot.points,
                requirements,
                duration_hours: duration_hours.unwrap_or(DEFAULT_DURATION_HOURS),
            })
            .await
            .map_err(|e| HandlerError::platform("platform.create_task", e))?;
        let task_id = TaskId::from(created.id.as_str());

        let snapshot = TaskSnapshot { last_updated: created.updated_at, ..snapshot };
        let preview = TaskPost::new(
            task_id.clone(),
            envelope.guild_id.clone(),
            draft.channel_id.clone(),
            MessageId::from(""),
            envelope.member.user_id.clone(),
            snapshot.clone(),
            duration_hours,
        )
        .map_err(|e| HandlerError::user(e.to_string()))?;

        let message_id = self
            .chat
            .post_message(
                &draft.channel_id,
                &task_post_message(task_id.as_str(), &snapshot, preview.ends_at),
            )
            .await
            .map_err(|e| HandlerError::chat("chat.post_message", e))?;

        let post = TaskPost { message_id, ..preview };
        self.posts
            .create(&post)
            .await
            .map_err(|e| HandlerError::persistence("task_post.create", e))?;

        let mut link = link;
        link.tasks_created += 1;
        link.record_audit(
            "task_created",
            envelope.member.user_id.clone(),
            format!("task {}", task_id.as_str()),
        );
        self.links
            .update(&link)
            .await
            .map_err(|e| HandlerError::persistence("server_link.update", e))?;

        info!(
            event_name = "task_posted",
            guild_id = envelope.guild_id.as_str(),
            task_id = task_id.as_str(),
            channel_id = draft.channel_id.as_str(),
            correlation_id = ctx.correlation_id,
            "task created and posted"
        );
        Ok(HandlerReply::payload(
            EmbedBuilder::new(
                "Task Created",
                format!("**{}** is live in this server.", post.snapshot.title),
            )
            .color(COLOR_SUCCESS)
            .field("Points", post.snapshot.points.to_string(), true)
            .field("Ends", post.ends_at.format("%Y-%m-%d %H:%M UTC").to_string(), true)
            .ephemeral()
            .build(),
        )
        .with_context(json!({ "task_id": task_id.as_str() })))
    }
}

/// `/list-tasks [status:<active|all>]`.
pub struct ListTasksHandler {
    links: Arc<dyn ServerLinkRepository>,
    posts: Arc<dyn TaskPostRepository>,
    platform: Arc<dyn PlatformApi>,
    retry: Arc<RetryExecutor>,
}

impl ListTasksHandler {
    pub fn new(
        links: Arc<dyn ServerLinkRepository>,
        posts: Arc<dyn TaskPostRepository>,
        platform: Arc<dyn PlatformApi>,
        retry: Arc<RetryExecutor>,
    ) -> Self {
        Self { links, posts, platform, retry }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for ListTasksHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        _ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let Some(link) = self
            .links
            .find_active_by_guild(&envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("server_link.find_active", e))?
        else {
            return Err(HandlerError::user(
                "Link this server to a community with /link-community first.",
            ));
        };

        let active_only = match &envelope.event {
            GatewayEvent::Command { options, .. } => {
                CommandOptions::new(options).get("status") != Some("all")
            }
            _ => true,
        };

        let community_id = link.community_id.clone();
        let tasks = self
            .retry
            .execute("platform.list_tasks", true, || self.platform.list_tasks(&community_id))
            .await
            .map_err(|e| HandlerError::platform("platform.list_tasks", e))?;
        let posted = self
            .posts
            .list_active_by_guild(&envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("task_post.list_active", e))?;

        let mut builder = EmbedBuilder::new(
            "Community Tasks",
            format!("Tasks for community `{}`.", community_id.as_str()),
        )
        .color(COLOR_INFO)
        .ephemeral();
        let mut shown = 0usize;
        for task in &tasks {
            if active_only && !task.active {
                continue;
            }
            if shown == 10 {
                break;
            }
            let local = posted.iter().find(|p| p.task_id.as_str() == task.id);
            let value = match local {
                Some(post) => format!(
                    "{} pts | {} | {} completion(s) here",
                    task.points,
                    task.kind.as_str(),
                    post.completions
                ),
                None => format!("{} pts | {} | not posted here", task.points, task.kind.as_str()),
            };
            builder = builder.field(task.title.clone(), value, false);
            shown += 1;
        }
        if shown == 0 {
            builder = builder.footer("No tasks yet. Use /create-task to add one.");
        }
        Ok(HandlerReply::payload(builder.build())
            .with_context(json!({ "task_count": shown })))
    }
}

/// `complete_task_<id>` button on a task post.
pub struct CompleteTaskHandler {
    posts: Arc<dyn TaskPostRepository>,
    users: Arc<dyn UserLinkRepository>,
    platform: Arc<dyn PlatformApi>,
}

impl CompleteTaskHandler {
    pub fn new(
        posts: Arc<dyn TaskPostRepository>,
        users: Arc<dyn UserLinkRepository>,
        platform: Arc<dyn PlatformApi>,
    ) -> Self {
        Self { posts, users, platform }
    }
}

fn button_task_id(envelope: &GatewayEnvelope) -> Result<TaskId, HandlerError> {
    match ButtonAction::parse(envelope.event.name()) {
        Some(ButtonAction::CompleteTask(task_id)) | Some(ButtonAction::ViewTask(task_id)) => {
            Ok(task_id)
        }
        _ => Err(HandlerError::user("This button is no longer recognized.")),
    }
}

#[async_trait::async_trait]
impl InteractionHandler for CompleteTaskHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let task_id = button_task_id(envelope)?;
        let Some(mut post) = self
            .posts
            .find(&task_id, &envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("task_post.find", e))?
        else {
            return Err(HandlerError::user("This task is no longer available."));
        };
        if post.status != TaskStatus::Active {
            return Err(HandlerError::user("This task has ended."));
        }

        let user_link = self
            .users
            .find_active_by_user(&envelope.member.user_id)
            .await
            .map_err(|e| HandlerError::persistence("user_link.find_active", e))?;
        let platform_user_id = match &user_link {
            Some(link) => link.platform_user_id.clone(),
            None => envelope.member.user_id.as_str().to_owned(),
        };

        // Not idempotent: completion awards points at most once.
        let completion = match self.platform.complete_task(&task_id, &platform_user_id).await {
            Ok(completion) => completion,
            Err(error) if error.is_not_found() => {
                return Err(HandlerError::user("This task no longer exists on the Platform."));
            }
            Err(PlatformError::Status { status: 409, .. }) => {
                return Err(HandlerError::user("You already completed this task."));
            }
            Err(error) => return Err(HandlerError::platform("platform.complete_task", error)),
        };

        post.completions += 1;
        self.posts
            .update(&post)
            .await
            .map_err(|e| HandlerError::persistence("task_post.update", e))?;
        if let Some(mut link) = user_link {
            link.tasks_completed += 1;
            self.users
                .update(&link)
                .await
                .map_err(|e| HandlerError::persistence("user_link.update", e))?;
        }

        info!(
            event_name = "task_completed",
            guild_id = envelope.guild_id.as_str(),
            task_id = task_id.as_str(),
            correlation_id = ctx.correlation_id,
            "task completion accepted"
        );
        Ok(HandlerReply::payload(
            EmbedBuilder::new(
                "Task Completed",
                format!(
                    "**{}** complete. You earned {} point(s).",
                    post.snapshot.title, completion.points_awarded
                ),
            )
            .color(COLOR_SUCCESS)
            .ephemeral()
            .build(),
        )
        .with_context(json!({ "task_id": task_id.as_str() })))
    }
}

/// `view_task_<id>` button on a task post.
pub struct ViewTaskHandler {
    posts: Arc<dyn TaskPostRepository>,
}

impl ViewTaskHandler {
    pub fn new(posts: Arc<dyn TaskPostRepository>) -> Self {
        Self { posts }
    }
}

#[async_trait::async_trait]
impl InteractionHandler for ViewTaskHandler {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        _ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError> {
        let task_id = button_task_id(envelope)?;
        let Some(mut post) = self
            .posts
            .find(&task_id, &envelope.guild_id)
            .await
            .map_err(|e| HandlerError::persistence("task_post.find", e))?
        else {
            return Err(HandlerError::user("This task is no longer available."));
        };

        post.views += 1;
        self.posts
            .update(&post)
            .await
            .map_err(|e| HandlerError::persistence("task_post.update", e))?;

        Ok(HandlerReply::payload(
            EmbedBuilder::new(post.snapshot.title.clone(), post.snapshot.description.clone())
                .color(COLOR_INFO)
                .field("Points", post.snapshot.points.to_string(), true)
                .field("Type", post.snapshot.kind.as_str().to_owned(), true)
                .field("Status", post.status.as_str().to_owned(), true)
                .field("Completions", post.completions.to_string(), true)
                .field("Ends", post.ends_at.format("%Y-%m-%d %H:%M UTC").to_string(), true)
                .ephemeral()
                .build(),
        )
        .with_context(json!({ "task_id": task_id.as_str() })))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use serde_json::json;

    use taskbridge_cache::{InMemoryCacheStore, TaskStaging};
    use taskbridge_core::classify::{ClassifierThresholds, ErrorClassifier};
    use taskbridge_core::domain::link::{GuildSnapshot, ServerCommunityLink};
    use taskbridge_core::domain::task::{TaskKind, TaskPost, TaskSnapshot};
    use taskbridge_core::domain::{
        ChannelId, CommunityId, EventId, GuildId, MessageId, TaskId, UserId,
    };
    use taskbridge_core::permissions::MemberSnapshot;
    use taskbridge_db::repositories::{
        InMemoryServerLinkRepository, InMemoryTaskPostRepository, InMemoryUserLinkRepository,
    };
    use taskbridge_db::{ServerLinkRepository, TaskPostRepository};
    use taskbridge_platform::{
        PlatformTask, RetryConfig, RetryExecutor, ScriptedPlatform, TaskCompletion,
    };

    use crate::events::{
        GatewayEnvelope, GatewayEvent, GuildProfile, InteractionResponder, RecordingChat,
        ResponderState,
    };
    use crate::handlers::{HandlerContext, HandlerError, InteractionHandler};

    use super::{
        CompleteTaskHandler, CreateTaskHandler, CreateTaskModalHandler, ListTasksHandler,
        ViewTaskHandler,
    };

    fn envelope(event: GatewayEvent) -> GatewayEnvelope {
        GatewayEnvelope {
            event_id: EventId::from("E1"),
            guild_id: GuildId::from("G1"),
            channel_id: ChannelId::from("C1"),
            message_id: None,
            member: MemberSnapshot {
                user_id: UserId::from("U1"),
                is_bot: false,
                account_created_at: Utc::now() - Duration::days(30),
                roles: Vec::new(),
                has_manage_server: true,
            },
            guild: GuildProfile {
                name: "Test Guild".to_owned(),
                member_count: 42,
                owner_id: UserId::from("U0"),
            },
            event,
        }
    }

    async fn seeded_links() -> Arc<InMemoryServerLinkRepository> {
        let links = Arc::new(InMemoryServerLinkRepository::new());
        links
            .create(&ServerCommunityLink::new(
                GuildId::from("G1"),
                CommunityId::from("COM1"),
                UserId::from("U1"),
                GuildSnapshot {
                    name: "Test Guild".to_owned(),
                    member_count: 42,
                    owner_id: UserId::from("U0"),
                    last_updated: Utc::now(),
                },
            ))
            .await
            .expect("seed link");
        links
    }

    fn retry() -> Arc<RetryExecutor> {
        Arc::new(RetryExecutor::new(
            RetryConfig::default(),
            Arc::new(ErrorClassifier::new(ClassifierThresholds::default())),
        ))
    }

    fn platform_task(id: &str) -> PlatformTask {
        PlatformTask {
            id: id.to_owned(),
            community_id: "COM1".to_owned(),
            title: "Follow us".to_owned(),
            kind: TaskKind::TwitterFollow,
            description: "Follow the community account".to_owned(),
            points: 50,
            requirements: json!({ "handle": "@example" }),
            active: true,
            updated_at: Some(Utc::now()),
        }
    }

    fn modal_fields() -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("title".to_owned(), "Follow us".to_owned());
        fields.insert("description".to_owned(), "Follow the community account".to_owned());
        fields.insert("points".to_owned(), "50".to_owned());
        fields.insert("handle".to_owned(), "@example".to_owned());
        fields
    }

    async fn staged() -> Arc<TaskStaging> {
        let staging = Arc::new(TaskStaging::new(Arc::new(InMemoryCacheStore::new())));
        staging
            .stage(
                &UserId::from("U1"),
                &GuildId::from("G1"),
                &taskbridge_cache::StagedTaskDraft::new(TaskKind::TwitterFollow, ChannelId::from("C1")),
            )
            .await
            .expect("stage");
        staging
    }

    fn seeded_post() -> TaskPost {
        TaskPost::new(
            TaskId::from("T1"),
            GuildId::from("G1"),
            ChannelId::from("C1"),
            MessageId::from("M1"),
            UserId::from("U1"),
            TaskSnapshot {
                title: "Follow us".to_owned(),
                kind: TaskKind::TwitterFollow,
                description: String::new(),
                points: 50,
                requirements: json!({ "handle": "@example" }),
                last_updated: None,
            },
            None,
        )
        .expect("valid post")
    }

    #[tokio::test(start_paused = true)]
    async fn create_task_command_stages_a_draft_and_opens_the_modal() {
        let staging = Arc::new(TaskStaging::new(Arc::new(InMemoryCacheStore::new())));
        let handler = CreateTaskHandler::new(staging.clone());
        let chat = Arc::new(RecordingChat::new());
        let responder = InteractionResponder::new(chat.clone(), EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };
        let mut options = HashMap::new();
        options.insert("type".to_owned(), "twitter_follow".to_owned());

        let reply = handler
            .handle(
                &envelope(GatewayEvent::Command { name: "create-task".to_owned(), options }),
                &ctx,
            )
            .await
            .expect("handled");

        assert!(reply.payload.is_none());
        assert_eq!(responder.state().await, ResponderState::Responded);
        assert_eq!(chat.modals().await.len(), 1);
        let draft = staging
            .peek(&UserId::from("U1"), &GuildId::from("G1"))
            .await
            .expect("peek")
            .expect("draft present");
        assert_eq!(draft.kind, TaskKind::TwitterFollow);
    }

    #[tokio::test(start_paused = true)]
    async fn modal_submit_creates_posts_and_counts_the_task() {
        let staging = staged().await;
        let links = seeded_links().await;
        let posts = Arc::new(InMemoryTaskPostRepository::new());
        let platform = Arc::new(ScriptedPlatform::new());
        platform.script_created_task(Ok(platform_task("T1"))).await;
        let chat = Arc::new(RecordingChat::new());
        let handler = CreateTaskModalHandler::new(
            staging,
            links.clone(),
            posts.clone(),
            platform.clone(),
            chat.clone(),
        );
        let responder = InteractionResponder::new(chat.clone(), EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };

        let reply = handler
            .handle(
                &envelope(GatewayEvent::ModalSubmit {
                    custom_id: "create_task_modal".to_owned(),
                    fields: modal_fields(),
                }),
                &ctx,
            )
            .await
            .expect("handled");

        assert_eq!(reply.payload.expect("payload").embed.expect("embed").title, "Task Created");
        assert_eq!(chat.posted().await.len(), 1);
        let post = posts
            .find(&TaskId::from("T1"), &GuildId::from("G1"))
            .await
            .expect("query")
            .expect("post present");
        assert_eq!(post.snapshot.points, 50);
        let link = links
            .find_active_by_guild(&GuildId::from("G1"))
            .await
            .expect("query")
            .expect("link present");
        assert_eq!(link.tasks_created, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_modal_submit_does_not_create_a_second_task() {
        let staging = staged().await;
        let links = seeded_links().await;
        let posts = Arc::new(InMemoryTaskPostRepository::new());
        let platform = Arc::new(ScriptedPlatform::new());
        platform.script_created_task(Ok(platform_task("T1"))).await;
        let chat = Arc::new(RecordingChat::new());
        let handler =
            CreateTaskModalHandler::new(staging, links, posts, platform.clone(), chat.clone());
        let responder = InteractionResponder::new(chat, EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };
        let submit = envelope(GatewayEvent::ModalSubmit {
            custom_id: "create_task_modal".to_owned(),
            fields: modal_fields(),
        });

        handler.handle(&submit, &ctx).await.expect("first submit");
        let error = handler.handle(&submit, &ctx).await.expect_err("second submit rejected");

        assert!(matches!(error, HandlerError::User { .. }));
        assert_eq!(platform.created_requests().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn modal_submit_without_a_server_link_is_rejected() {
        let staging = staged().await;
        let platform = Arc::new(ScriptedPlatform::new());
        let chat = Arc::new(RecordingChat::new());
        let handler = CreateTaskModalHandler::new(
            staging,
            Arc::new(InMemoryServerLinkRepository::new()),
            Arc::new(InMemoryTaskPostRepository::new()),
            platform.clone(),
            chat.clone(),
        );
        let responder = InteractionResponder::new(chat, EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };

        let error = handler
            .handle(
                &envelope(GatewayEvent::ModalSubmit {
                    custom_id: "create_task_modal".to_owned(),
                    fields: modal_fields(),
                }),
                &ctx,
            )
            .await
            .expect_err("rejected");

        assert!(matches!(error, HandlerError::User { .. }));
        assert!(platform.created_requests().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn list_tasks_renders_community_tasks() {
        let links = seeded_links().await;
        let platform = Arc::new(ScriptedPlatform::new());
        platform.script_task_list(Ok(vec![platform_task("T1"), platform_task("T2")])).await;
        let handler = ListTasksHandler::new(
            links,
            Arc::new(InMemoryTaskPostRepository::new()),
            platform,
            retry(),
        );
        let chat = Arc::new(RecordingChat::new());
        let responder = InteractionResponder::new(chat, EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };

        let reply = handler
            .handle(
                &envelope(GatewayEvent::Command {
                    name: "list-tasks".to_owned(),
                    options: HashMap::new(),
                }),
                &ctx,
            )
            .await
            .expect("handled");

        let embed = reply.payload.expect("payload").embed.expect("embed");
        assert_eq!(embed.fields.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn completing_a_task_updates_counters() {
        let posts = Arc::new(InMemoryTaskPostRepository::new());
        posts.create(&seeded_post()).await.expect("seed post");
        let platform = Arc::new(ScriptedPlatform::new());
        platform
            .script_completion(Ok(TaskCompletion {
                task_id: "T1".to_owned(),
                user_id: "U1".to_owned(),
                points_awarded: 50,
            }))
            .await;
        let handler = CompleteTaskHandler::new(
            posts.clone(),
            Arc::new(InMemoryUserLinkRepository::new()),
            platform,
        );
        let chat = Arc::new(RecordingChat::new());
        let responder = InteractionResponder::new(chat, EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };

        let reply = handler
            .handle(&envelope(GatewayEvent::Button { custom_id: "complete_task_T1".to_owned() }), &ctx)
            .await
            .expect("handled");

        let embed = reply.payload.expect("payload").embed.expect("embed");
        assert!(embed.description.contains("50 point(s)"));
        let post = posts
            .find(&TaskId::from("T1"), &GuildId::from("G1"))
            .await
            .expect("query")
            .expect("post present");
        assert_eq!(post.completions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completing_an_unknown_task_is_a_user_error() {
        let handler = CompleteTaskHandler::new(
            Arc::new(InMemoryTaskPostRepository::new()),
            Arc::new(InMemoryUserLinkRepository::new()),
            Arc::new(ScriptedPlatform::new()),
        );
        let chat = Arc::new(RecordingChat::new());
        let responder = InteractionResponder::new(chat, EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };

        let error = handler
            .handle(&envelope(GatewayEvent::Button { custom_id: "complete_task_T9".to_owned() }), &ctx)
            .await
            .expect_err("rejected");
        assert!(matches!(error, HandlerError::User { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn viewing_a_task_increments_views() {
        let posts = Arc::new(InMemoryTaskPostRepository::new());
        posts.create(&seeded_post()).await.expect("seed post");
        let handler = ViewTaskHandler::new(posts.clone());
        let chat = Arc::new(RecordingChat::new());
        let responder = InteractionResponder::new(chat, EventId::from("E1"));
        let ctx = HandlerContext { responder: &responder, correlation_id: "corr-1" };

        handler
            .handle(&envelope(GatewayEvent::Button { custom_id: "view_task_T1".to_owned() }), &ctx)
            .await
            .expect("handled");

        let post = posts
            .find(&TaskId::from("T1"), &GuildId::from("G1"))
            .await
            .expect("query")
            .expect("post present");
        assert_eq!(post.views, 1);
    }
}
