pub mod audit;
pub mod classify;
pub mod config;
pub mod cooldown;
pub mod domain;
pub mod errors;
pub mod permissions;
pub mod seal;
pub mod security;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
pub use classify::{
    ErrorClassifier, ErrorDomain, ErrorKind, ErrorVerdict, RecoveryAction, Severity,
};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use cooldown::{CooldownMap, CooldownTable};
pub use domain::allowlist::{
    AllowlistConnection, AllowlistEntry, AllowlistSnapshot, EntryStatus, WinnerDrawState,
};
pub use domain::account::{ConsentFlags, UserAccountLink, VerificationState};
pub use domain::interaction::{EventCategory, InteractionRecord, PipelineOutcome};
pub use domain::link::{GuildSnapshot, LinkAuditEntry, ServerCommunityLink};
pub use domain::task::{TaskKind, TaskPost, TaskSnapshot, TaskStatus};
pub use domain::{
    AllowlistId, ChannelId, CommunityId, EventId, GuildId, MessageId, TaskId, UserId,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use permissions::{CommandPermission, MemberSnapshot, PermissionDecision, PermissionEvaluator};
pub use seal::{SealError, SealedToken, TokenSealer};
pub use security::{SecurityAlert, SecurityEventKind, SecurityMonitor};
