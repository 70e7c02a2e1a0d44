use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use taskbridge_core::classify::{ErrorDomain, RawFailure};
use taskbridge_core::domain::{ChannelId, EventId, GuildId, MessageId, UserId};
use taskbridge_core::permissions::MemberSnapshot;
use taskbridge_core::EventCategory;

use crate::embeds::ReplyPayload;

/// Point-in-time view of the guild delivered alongside each event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuildProfile {
    pub name: String,
    pub member_count: u64,
    pub owner_id: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayEvent {
    Command { name: String, options: HashMap<String, String> },
    Button { custom_id: String },
    ModalSubmit { custom_id: String, fields: HashMap<String, String> },
    MenuSelect { custom_id: String, values: Vec<String> },
}

impl GatewayEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            Self::Command { .. } => EventCategory::Command,
            Self::Button { .. } => EventCategory::Button,
            Self::ModalSubmit { .. } => EventCategory::Modal,
            Self::MenuSelect { .. } => EventCategory::Menu,
        }
    }

    /// Raw routing name: the command name or the component custom id.
    pub fn name(&self) -> &str {
        match self {
            Self::Command { name, .. } => name,
            Self::Button { custom_id }
            | Self::ModalSubmit { custom_id, .. }
            | Self::MenuSelect { custom_id, .. } => custom_id,
        }
    }
}

/// One user-originated gateway event, normalized by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayEnvelope {
    pub event_id: EventId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    /// Message the component was attached to, for button and menu events.
    pub message_id: Option<MessageId>,
    pub member: MemberSnapshot,
    pub guild: GuildProfile,
    pub event: GatewayEvent,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("chat transport failure: {0}")]
    Transport(String),
    #[error("message not found")]
    MissingMessage,
    #[error("missing permissions in channel")]
    MissingPermissions,
}

impl ChatError {
    pub fn to_raw_failure(&self) -> RawFailure {
        match self {
            Self::Transport(message) => {
                RawFailure::new(ErrorDomain::Chat, None, "TransportError", message)
            }
            Self::MissingMessage => {
                RawFailure::new(ErrorDomain::Chat, Some(10003), "UnknownMessage", "unknown message")
            }
            Self::MissingPermissions => RawFailure::new(
                ErrorDomain::Chat,
                Some(50013),
                "MissingPermissions",
                "missing permissions",
            ),
        }
    }
}

/// Type-specific modal fields requested from the user before task creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModalPrompt {
    pub custom_id: String,
    pub title: String,
    pub inputs: Vec<ModalInput>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModalInput {
    pub field: String,
    pub label: String,
    pub required: bool,
}

/// Outbound chat operations. The gateway wire protocol lives behind this
/// trait; tests use [`RecordingChat`].
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn defer(&self, event_id: &EventId) -> Result<(), ChatError>;
    async fn reply(&self, event_id: &EventId, payload: &ReplyPayload) -> Result<(), ChatError>;
    async fn open_modal(&self, event_id: &EventId, prompt: &ModalPrompt) -> Result<(), ChatError>;
    async fn post_message(
        &self,
        channel_id: &ChannelId,
        payload: &ReplyPayload,
    ) -> Result<MessageId, ChatError>;
    async fn edit_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        payload: &ReplyPayload,
    ) -> Result<(), ChatError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponderState {
    Fresh,
    Acknowledged,
    Responded,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RespondError {
    #[error("interaction already acknowledged")]
    AlreadyAcknowledged,
    #[error("interaction already responded to")]
    AlreadyResponded,
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Per-event response state machine. Exactly one terminal response is
/// allowed; acknowledgement may precede it to buy follow-up time.
pub struct InteractionResponder {
    chat: Arc<dyn ChatPort>,
    event_id: EventId,
    state: Mutex<ResponderState>,
}

impl InteractionResponder {
    pub fn new(chat: Arc<dyn ChatPort>, event_id: EventId) -> Self {
        Self { chat, event_id, state: Mutex::new(ResponderState::Fresh) }
    }

    pub async fn state(&self) -> ResponderState {
        *self.state.lock().await
    }

    pub async fn acknowledge(&self) -> Result<(), RespondError> {
        let mut state = self.state.lock().await;
        match *state {
            ResponderState::Fresh => {
                self.chat.defer(&self.event_id).await?;
                *state = ResponderState::Acknowledged;
                Ok(())
            }
            ResponderState::Acknowledged => Err(RespondError::AlreadyAcknowledged),
            ResponderState::Responded => Err(RespondError::AlreadyResponded),
        }
    }

    pub async fn respond(&self, payload: &ReplyPayload) -> Result<(), RespondError> {
        let mut state = self.state.lock().await;
        match *state {
            ResponderState::Fresh | ResponderState::Acknowledged => {
                self.chat.reply(&self.event_id, payload).await?;
                *state = ResponderState::Responded;
                Ok(())
            }
            ResponderState::Responded => Err(RespondError::AlreadyResponded),
        }
    }

    /// A modal is itself the terminal response to the triggering event.
    pub async fn open_modal(&self, prompt: &ModalPrompt) -> Result<(), RespondError> {
        let mut state = self.state.lock().await;
        match *state {
            ResponderState::Fresh => {
                self.chat.open_modal(&self.event_id, prompt).await?;
                *state = ResponderState::Responded;
                Ok(())
            }
            ResponderState::Acknowledged => Err(RespondError::AlreadyAcknowledged),
            ResponderState::Responded => Err(RespondError::AlreadyResponded),
        }
    }
}

/// Stands in for the chat transport when no live connection is configured.
/// Every outbound call succeeds without side effects.
#[derive(Default)]
pub struct NoopChat;

#[async_trait]
impl ChatPort for NoopChat {
    async fn defer(&self, _event_id: &EventId) -> Result<(), ChatError> {
        Ok(())
    }

    async fn reply(&self, _event_id: &EventId, _payload: &ReplyPayload) -> Result<(), ChatError> {
        Ok(())
    }

    async fn open_modal(
        &self,
        _event_id: &EventId,
        _prompt: &ModalPrompt,
    ) -> Result<(), ChatError> {
        Ok(())
    }

    async fn post_message(
        &self,
        _channel_id: &ChannelId,
        _payload: &ReplyPayload,
    ) -> Result<MessageId, ChatError> {
        Ok(MessageId::from("noop"))
    }

    async fn edit_message(
        &self,
        _channel_id: &ChannelId,
        _message_id: &MessageId,
        _payload: &ReplyPayload,
    ) -> Result<(), ChatError> {
        Ok(())
    }
}

/// In-memory chat port that records every outbound call, for tests and
/// offline smoke runs.
#[derive(Default)]
pub struct RecordingChat {
    state: Mutex<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    deferred: Vec<EventId>,
    replies: Vec<(EventId, ReplyPayload)>,
    modals: Vec<(EventId, ModalPrompt)>,
    posted: Vec<(ChannelId, ReplyPayload)>,
    edits: Vec<(ChannelId, MessageId, ReplyPayload)>,
    next_message: u64,
    fail_posts: bool,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_posts(&self) {
        self.state.lock().await.fail_posts = true;
    }

    pub async fn deferred(&self) -> Vec<EventId> {
        self.state.lock().await.deferred.clone()
    }

    pub async fn replies(&self) -> Vec<(EventId, ReplyPayload)> {
        self.state.lock().await.replies.clone()
    }

    pub async fn modals(&self) -> Vec<(EventId, ModalPrompt)> {
        self.state.lock().await.modals.clone()
    }

    pub async fn posted(&self) -> Vec<(ChannelId, ReplyPayload)> {
        self.state.lock().await.posted.clone()
    }

    pub async fn edits(&self) -> Vec<(ChannelId, MessageId, ReplyPayload)> {
        self.state.lock().await.edits.clone()
    }
}

#[async_trait]
impl ChatPort for RecordingChat {
    async fn defer(&self, event_id: &EventId) -> Result<(), ChatError> {
        self.state.lock().await.deferred.push(event_id.clone());
        Ok(())
    }

    async fn reply(&self, event_id: &EventId, payload: &ReplyPayload) -> Result<(), ChatError> {
        self.state.lock().await.replies.push((event_id.clone(), payload.clone()));
        Ok(())
    }

    async fn open_modal(&self, event_id: &EventId, prompt: &ModalPrompt) -> Result<(), ChatError> {
        self.state.lock().await.modals.push((event_id.clone(), prompt.clone()));
        Ok(())
    }

    async fn post_message(
        &self,
        channel_id: &ChannelId,
        payload: &ReplyPayload,
    ) -> Result<MessageId, ChatError> {
        let mut state = self.state.lock().await;
        if state.fail_posts {
            return Err(ChatError::Transport("connection reset".to_owned()));
        }
        state.next_message += 1;
        let message_id = MessageId(format!("M{}", state.next_message));
        state.posted.push((channel_id.clone(), payload.clone()));
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        channel_id: &ChannelId,
        message_id: &MessageId,
        payload: &ReplyPayload,
    ) -> Result<(), ChatError> {
        self.state
            .lock()
            .await
            .edits
            .push((channel_id.clone(), message_id.clone(), payload.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskbridge_core::domain::EventId;

    use super::{InteractionResponder, RecordingChat, RespondError, ResponderState};
    use crate::embeds::ReplyPayload;

    fn responder(chat: Arc<RecordingChat>) -> InteractionResponder {
        InteractionResponder::new(chat, EventId::from("E1"))
    }

    #[tokio::test]
    async fn respond_transitions_fresh_to_responded() {
        let chat = Arc::new(RecordingChat::new());
        let responder = responder(chat.clone());

        responder.respond(&ReplyPayload::text("done")).await.expect("respond");
        assert_eq!(responder.state().await, ResponderState::Responded);
        assert_eq!(chat.replies().await.len(), 1);
    }

    #[tokio::test]
    async fn acknowledge_then_respond_is_the_deferred_path() {
        let chat = Arc::new(RecordingChat::new());
        let responder = responder(chat.clone());

        responder.acknowledge().await.expect("acknowledge");
        assert_eq!(responder.state().await, ResponderState::Acknowledged);
        responder.respond(&ReplyPayload::text("follow-up")).await.expect("respond");

        assert_eq!(chat.deferred().await.len(), 1);
        assert_eq!(chat.replies().await.len(), 1);
    }

    #[tokio::test]
    async fn double_respond_is_rejected_without_a_second_send() {
        let chat = Arc::new(RecordingChat::new());
        let responder = responder(chat.clone());

        responder.respond(&ReplyPayload::text("first")).await.expect("respond");
        let error = responder.respond(&ReplyPayload::text("second")).await.expect_err("second");
        assert_eq!(error, RespondError::AlreadyResponded);
        assert_eq!(chat.replies().await.len(), 1);
    }

    #[tokio::test]
    async fn acknowledge_after_respond_is_rejected() {
        let chat = Arc::new(RecordingChat::new());
        let responder = responder(chat);

        responder.respond(&ReplyPayload::text("done")).await.expect("respond");
        assert_eq!(responder.acknowledge().await, Err(RespondError::AlreadyResponded));
    }
}
