//! Chat-platform surface of the bot: gateway event model, the interaction
//! pipeline with its abuse controls, command and button routing, embed
//! builders, the fallback responder, and real-time message sync.

pub mod commands;
pub mod embeds;
pub mod events;
pub mod fallback;
pub mod gateway;
pub mod handlers;
pub mod pipeline;
pub mod sync;

pub use commands::{ButtonAction, CommandOptions, HandlerRegistry};
pub use embeds::{Button, ButtonStyle, Embed, EmbedBuilder, ReplyPayload};
pub use events::{
    ChatError, ChatPort, GatewayEnvelope, GatewayEvent, GuildProfile, InteractionResponder,
    NoopChat, RecordingChat, ResponderState,
};
pub use fallback::{FallbackResponder, MaintenanceInfo};
pub use gateway::{
    GatewayRunner, GatewayTransport, NoopGatewayTransport, ReconnectPolicy, TransportError,
};
pub use handlers::{HandlerContext, HandlerError, HandlerReply, InteractionHandler};
pub use pipeline::{InteractionPipeline, PipelineReport, PipelineServices};
pub use sync::{
    drain_updates, ChatPortEditor, MessageEditor, PlatformUpdate, RealtimeSync, SyncError,
    SyncOutcome,
};
