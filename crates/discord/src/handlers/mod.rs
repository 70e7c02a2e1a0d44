use async_trait::async_trait;
use thiserror::Error;

use taskbridge_core::classify::{ErrorDomain, RawFailure};
use taskbridge_core::errors::DomainError;
use taskbridge_db::RepositoryError;
use taskbridge_platform::PlatformError;

use crate::commands::OptionError;
use crate::embeds::ReplyPayload;
use crate::events::{ChatError, GatewayEnvelope, InteractionResponder, RespondError};

pub mod allowlist;
pub mod info;
pub mod link;
pub mod task;

pub use allowlist::{
    AllowlistAnalyticsHandler, ConnectAllowlistHandler, EnterAllowlistHandler, ViewAllowlistHandler,
};
pub use info::{
    HelpButtonHandler, HelpHandler, RefreshStatusHandler, SecurityHandler, StatusHandler,
    StatusPanel, TestConnectionHandler,
};
pub use link::{LinkCommunityHandler, RelinkCommunityHandler, UnlinkCommunityHandler};
pub use task::{
    CompleteTaskHandler, CreateTaskHandler, CreateTaskModalHandler, ListTasksHandler,
    ViewTaskHandler,
};

/// Failure from one handler. `User` is a validation-style outcome shown as
/// an ephemeral message; `Failed` goes through the error classifier and the
/// degradation decision.
#[derive(Clone, Debug, Error)]
pub enum HandlerError {
    #[error("{message}")]
    User { message: String },
    #[error("operation `{operation}` failed: {message}")]
    Failed { operation: String, failure: RawFailure, message: String },
}

impl HandlerError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::User { message: message.into() }
    }

    pub fn platform(operation: &str, error: PlatformError) -> Self {
        Self::Failed {
            operation: operation.to_owned(),
            failure: error.to_raw_failure(),
            message: error.to_string(),
        }
    }

    pub fn persistence(operation: &str, error: RepositoryError) -> Self {
        let name = match &error {
            RepositoryError::Database(_) => "DatabaseError",
            RepositoryError::Decode(_) => "ValidationError",
            RepositoryError::Conflict(_) => "DuplicateKeyError",
        };
        Self::Failed {
            operation: operation.to_owned(),
            failure: RawFailure::new(ErrorDomain::Persistence, None, name, &error.to_string()),
            message: error.to_string(),
        }
    }

    pub fn domain(operation: &str, error: DomainError) -> Self {
        Self::Failed {
            operation: operation.to_owned(),
            failure: RawFailure::new(ErrorDomain::General, None, "DomainError", &error.to_string()),
            message: error.to_string(),
        }
    }

    pub fn chat(operation: &str, error: ChatError) -> Self {
        Self::Failed {
            operation: operation.to_owned(),
            failure: error.to_raw_failure(),
            message: error.to_string(),
        }
    }

    pub fn cache(operation: &str, error: taskbridge_cache::CacheError) -> Self {
        Self::Failed {
            operation: operation.to_owned(),
            failure: RawFailure::new(ErrorDomain::General, None, "CacheError", &error.to_string()),
            message: error.to_string(),
        }
    }

    pub fn respond(operation: &str, error: RespondError) -> Self {
        match error {
            RespondError::Chat(chat) => Self::chat(operation, chat),
            other => Self::Failed {
                operation: operation.to_owned(),
                failure: RawFailure::new(
                    ErrorDomain::General,
                    None,
                    "ResponderStateError",
                    &other.to_string(),
                ),
                message: other.to_string(),
            },
        }
    }
}

impl From<OptionError> for HandlerError {
    fn from(error: OptionError) -> Self {
        Self::User { message: error.to_string() }
    }
}

/// What the pipeline sends back unless the handler already responded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerReply {
    pub payload: Option<ReplyPayload>,
    pub context: serde_json::Value,
}

impl HandlerReply {
    pub fn payload(payload: ReplyPayload) -> Self {
        Self { payload: Some(payload), context: serde_json::Value::Null }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// The handler responded through the responder itself.
    pub fn already_responded() -> Self {
        Self { payload: None, context: serde_json::Value::Null }
    }
}

pub struct HandlerContext<'a> {
    pub responder: &'a InteractionResponder,
    pub correlation_id: &'a str,
}

#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: &GatewayEnvelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerReply, HandlerError>;
}
