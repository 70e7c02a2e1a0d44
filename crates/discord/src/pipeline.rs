use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use taskbridge_cache::{RateDecision, RateLimiter};
use taskbridge_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use taskbridge_core::classify::{ErrorClassifier, ErrorDomain, ErrorKind, Severity};
use taskbridge_core::cooldown::{CooldownCheck, CooldownMap};
use taskbridge_core::domain::interaction::{InteractionRecord, PipelineOutcome};
use taskbridge_core::permissions::{PermissionEvaluator, RoleOverrides};
use taskbridge_core::security::{SecurityAlert, SecurityMonitor};
use taskbridge_core::EventCategory;
use taskbridge_db::{InteractionLogRepository, ServerLinkRepository};

use crate::commands::{permission_surface, HandlerRegistry};
use crate::embeds::{
    cooldown_message, error_message, permission_denied_message, rate_limited_message, ReplyPayload,
};
use crate::events::{ChatPort, GatewayEnvelope, InteractionResponder, RespondError, ResponderState};
use crate::fallback::FallbackResponder;
use crate::handlers::{HandlerContext, HandlerError};

/// Everything the pipeline consults, wired once in the composition root.
pub struct PipelineServices {
    pub permissions: PermissionEvaluator,
    pub limiter: RateLimiter,
    pub cooldowns: CooldownMap,
    pub classifier: Arc<ErrorClassifier>,
    pub security: SecurityMonitor,
    pub audit: Arc<dyn AuditSink>,
    pub logs: Arc<dyn InteractionLogRepository>,
    pub links: Arc<dyn ServerLinkRepository>,
    pub fallback: Arc<FallbackResponder>,
    pub registry: HandlerRegistry,
    pub chat: Arc<dyn ChatPort>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    /// Whether anything reached the user (reply, modal, or acknowledged edit).
    pub responded: bool,
    pub alerts: Vec<SecurityAlert>,
}

/// Ordered gate-and-dispatch for every inbound gateway event. Each event
/// ends in exactly one terminal outcome, which is always observed even when
/// responding to the user failed.
pub struct InteractionPipeline {
    services: PipelineServices,
}

impl InteractionPipeline {
    pub fn new(services: PipelineServices) -> Self {
        Self { services }
    }

    pub async fn process(&self, envelope: &GatewayEnvelope) -> PipelineReport {
        let started = Instant::now();
        let category = envelope.event.category();
        let name = envelope.event.name().to_owned();
        let correlation_id = envelope.event_id.as_str().to_owned();
        let responder =
            InteractionResponder::new(self.services.chat.clone(), envelope.event_id.clone());

        let (outcome, action, context) =
            self.run_stages(envelope, category, &name, &correlation_id, &responder).await;

        let responded = responder.state().await != ResponderState::Fresh;
        let alerts = self.observe(
            envelope, category, &name, &correlation_id, outcome, action, context, started,
        );
        PipelineReport { outcome, responded, alerts }
    }

    async fn run_stages(
        &self,
        envelope: &GatewayEnvelope,
        category: EventCategory,
        name: &str,
        correlation_id: &str,
        responder: &InteractionResponder,
    ) -> (PipelineOutcome, &'static str, serde_json::Value) {
        // Bots never get a response, only a denied record.
        if envelope.member.is_bot {
            return (PipelineOutcome::Denied, "bot_rejected", serde_json::Value::Null);
        }

        if !self.services.permissions.meets_age_floor(&envelope.member, chrono::Utc::now()) {
            self.send(responder, &permission_denied_message(
                taskbridge_core::permissions::reasons::ACCOUNT_TOO_NEW,
            ))
            .await;
            return (PipelineOutcome::Denied, "account_age", serde_json::Value::Null);
        }

        // Cache failures fail open: abuse control must not take the bot down.
        match self.services.limiter.check(&envelope.member.user_id, category).await {
            Ok(RateDecision::Allowed) => {}
            Ok(RateDecision::Limited { retry_after }) => {
                self.send(responder, &rate_limited_message(retry_after)).await;
                return (PipelineOutcome::RateLimit, "rate_limited", serde_json::Value::Null);
            }
            Err(error) => {
                warn!(
                    event_name = "rate_limit_unavailable",
                    error = %error,
                    "cache unreachable, allowing event through"
                );
            }
        }

        if category == EventCategory::Command {
            if let CooldownCheck::Blocked { remaining } =
                self.services.cooldowns.check(&envelope.member.user_id, name)
            {
                self.send(responder, &cooldown_message(name, remaining)).await;
                return (PipelineOutcome::Cooldown, "cooldown", serde_json::Value::Null);
            }
        }

        if let Some(info) = self.services.fallback.maintenance() {
            let notice = self.services.fallback.maintenance_notice(&info);
            self.send(responder, &notice).await;
            return (PipelineOutcome::Denied, "maintenance", serde_json::Value::Null);
        }

        let Some(surface) = permission_surface(category, name) else {
            self.send(responder, &error_message("This command is not recognized.")).await;
            return (PipelineOutcome::Denied, "unknown", serde_json::Value::Null);
        };
        let overrides = match self.services.links.role_overrides(&envelope.guild_id).await {
            Ok(overrides) => overrides,
            Err(error) => {
                warn!(
                    event_name = "role_overrides_unavailable",
                    error = %error,
                    "falling back to empty role overrides"
                );
                RoleOverrides::default()
            }
        };
        let decision = self.services.permissions.evaluate(&envelope.member, surface, &overrides);
        if !decision.allowed {
            self.audit_denied(envelope, correlation_id, surface, decision.reason);
            self.send(responder, &permission_denied_message(decision.reason)).await;
            return (PipelineOutcome::Denied, "permission_denied", serde_json::Value::Null);
        }

        let Some(handler) = self.services.registry.resolve(category, name) else {
            self.send(responder, &error_message("This command is not recognized.")).await;
            return (PipelineOutcome::Denied, "unknown", serde_json::Value::Null);
        };
        let ctx = HandlerContext { responder, correlation_id };
        match handler.handle(envelope, &ctx).await {
            Ok(reply) => {
                if let Some(payload) = &reply.payload {
                    self.send(responder, payload).await;
                }
                self.bump_command_count(envelope, category).await;
                (PipelineOutcome::Success, "completed", reply.context)
            }
            Err(HandlerError::User { message }) => {
                self.send(responder, &error_message(&message)).await;
                (PipelineOutcome::Denied, "rejected", serde_json::Value::Null)
            }
            Err(HandlerError::Failed { operation, failure, message }) => {
                debug!(
                    event_name = "handler_failed",
                    operation = operation.as_str(),
                    correlation_id,
                    error = message.as_str(),
                    "handler returned a failure"
                );
                let payload = self.degrade(envelope, correlation_id, surface, &failure);
                self.send(responder, &payload).await;
                (PipelineOutcome::Error, "failed", serde_json::Value::Null)
            }
        }
    }

    /// Picks the user-facing shape of a failure: chat trouble and connective
    /// Platform trouble degrade to website redirects, critical faults get a
    /// support correlation id, the rest show the classified message.
    fn degrade(
        &self,
        envelope: &GatewayEnvelope,
        correlation_id: &str,
        surface: &str,
        failure: &taskbridge_core::classify::RawFailure,
    ) -> ReplyPayload {
        let (verdict, breach) = self.services.classifier.classify_and_count(failure);
        if let Some(breach) = breach {
            let context = AuditContext::new(
                Some(envelope.guild_id.clone()),
                Some(envelope.member.user_id.clone()),
                correlation_id,
            );
            self.services.audit.emit(
                AuditEvent::new(&context, "error_threshold_breach", AuditCategory::Security, AuditOutcome::Failed)
                    .with_metadata("domain", breach.domain.as_str())
                    .with_metadata("count", breach.count.to_string()),
            );
        }

        let connective = matches!(
            verdict.kind,
            ErrorKind::Connection | ErrorKind::Network | ErrorKind::Timeout | ErrorKind::ServerError
        );
        if failure.domain == ErrorDomain::Chat {
            self.services.fallback.discord_failure()
        } else if failure.domain == ErrorDomain::Api
            && connective
            && verdict.severity >= Severity::High
        {
            self.services.fallback.api_unavailable(surface)
        } else if verdict.severity == Severity::Critical {
            self.services.fallback.critical_failure(failure.domain.as_str())
        } else {
            error_message(verdict.user_message)
        }
    }

    async fn send(&self, responder: &InteractionResponder, payload: &ReplyPayload) {
        match responder.respond(payload).await {
            Ok(()) => {}
            Err(RespondError::AlreadyResponded) => {}
            Err(error) => {
                debug!(event_name = "respond_failed", error = %error, "could not deliver response");
            }
        }
    }

    async fn bump_command_count(&self, envelope: &GatewayEnvelope, category: EventCategory) {
        if category != EventCategory::Command {
            return;
        }
        let result = async {
            let Some(mut link) =
                self.services.links.find_active_by_guild(&envelope.guild_id).await?
            else {
                return Ok(());
            };
            link.commands_handled += 1;
            self.services.links.update(&link).await
        }
        .await;
        if let Err(error) = result {
            debug!(event_name = "command_count_skipped", error = %error, "counter update failed");
        }
    }

    fn observe(
        &self,
        envelope: &GatewayEnvelope,
        category: EventCategory,
        name: &str,
        correlation_id: &str,
        outcome: PipelineOutcome,
        action: &'static str,
        context: serde_json::Value,
        started: Instant,
    ) -> Vec<SecurityAlert> {
        let response_time_ms = started.elapsed().as_millis() as u64;
        let mut record = InteractionRecord::new(
            envelope.guild_id.clone(),
            envelope.member.user_id.clone(),
            category,
            name,
            action,
            outcome,
            response_time_ms,
        );
        if !context.is_null() {
            record = record.with_context(context);
        }
        let logs = self.services.logs.clone();
        let log_record = record.clone();
        // Observation is off the response path; a lost log row is logged,
        // never surfaced.
        tokio::spawn(async move {
            if let Err(error) = logs.log(&log_record).await {
                warn!(event_name = "interaction_log_failed", error = %error, "log write failed");
            }
        });

        let alerts =
            self.services.security.observe(&envelope.guild_id, &envelope.member.user_id, outcome);
        for alert in &alerts {
            info!(
                event_name = "security_alert",
                kind = alert.kind.as_str(),
                guild_id = alert.guild_id.as_str(),
                user_id = alert.user_id.as_str(),
                count = alert.count,
                "abuse threshold crossed"
            );
            let context = AuditContext::new(
                Some(envelope.guild_id.clone()),
                Some(envelope.member.user_id.clone()),
                correlation_id,
            );
            self.services.audit.emit(
                AuditEvent::new(&context, "security_alert", AuditCategory::Security, AuditOutcome::Denied)
                    .with_metadata("kind", alert.kind.as_str())
                    .with_metadata("count", alert.count.to_string()),
            );
        }
        alerts
    }

    fn audit_denied(
        &self,
        envelope: &GatewayEnvelope,
        correlation_id: &str,
        surface: &str,
        reason: &str,
    ) {
        let context = AuditContext::new(
            Some(envelope.guild_id.clone()),
            Some(envelope.member.user_id.clone()),
            correlation_id,
        );
        self.services.audit.emit(
            AuditEvent::new(&context, "permission_denied", AuditCategory::Permission, AuditOutcome::Denied)
                .with_metadata("command", surface)
                .with_metadata("reason", reason),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use taskbridge_cache::{InMemoryCacheStore, RateLimiter, RateLimits};
    use taskbridge_core::audit::{AuditSink, InMemoryAuditSink};
    use taskbridge_core::classify::{ClassifierThresholds, ErrorClassifier, ErrorDomain, RawFailure};
    use taskbridge_core::cooldown::CooldownMap;
    use taskbridge_core::domain::interaction::PipelineOutcome;
    use taskbridge_core::domain::{ChannelId, EventId, GuildId, UserId};
    use taskbridge_core::permissions::{MemberSnapshot, PermissionEvaluator};
    use taskbridge_core::security::{SecurityEventKind, SecurityMonitor};
    use taskbridge_core::EventCategory;
    use taskbridge_db::repositories::{
        InMemoryInteractionLogRepository, InMemoryServerLinkRepository,
    };
    use taskbridge_db::{InteractionFilter, InteractionLogRepository};

    use crate::commands::HandlerRegistry;
    use crate::embeds::ReplyPayload;
    use crate::events::{GatewayEnvelope, GatewayEvent, GuildProfile, RecordingChat};
    use crate::fallback::{FallbackResponder, MaintenanceInfo};
    use crate::handlers::{HandlerContext, HandlerError, HandlerReply, InteractionHandler};

    use super::{InteractionPipeline, PipelineServices};

    struct EchoHandler;

    #[async_trait::async_trait]
    impl InteractionHandler for EchoHandler {
        async fn handle(
            &self,
            _envelope: &GatewayEnvelope,
            _ctx: &HandlerContext<'_>,
        ) -> Result<HandlerReply, HandlerError> {
            Ok(HandlerReply::payload(ReplyPayload::ephemeral_text("ok")))
        }
    }

    struct FailingHandler {
        failure: RawFailure,
    }

    #[async_trait::async_trait]
    impl InteractionHandler for FailingHandler {
        async fn handle(
            &self,
            _envelope: &GatewayEnvelope,
            _ctx: &HandlerContext<'_>,
        ) -> Result<HandlerReply, HandlerError> {
            Err(HandlerError::Failed {
                operation: "platform.list_tasks".to_owned(),
                failure: self.failure.clone(),
                message: "boom".to_owned(),
            })
        }
    }

    fn member(age_days: i64, is_bot: bool) -> MemberSnapshot {
        MemberSnapshot {
            user_id: UserId::from("U1"),
            is_bot,
            account_created_at: Utc::now() - Duration::days(age_days),
            roles: Vec::new(),
            has_manage_server: true,
        }
    }

    fn envelope_for(member: MemberSnapshot, event: GatewayEvent) -> GatewayEnvelope {
        GatewayEnvelope {
            event_id: EventId::from("E1"),
            guild_id: GuildId::from("G1"),
            channel_id: ChannelId::from("C1"),
            message_id: None,
            member,
            guild: GuildProfile {
                name: "Test Guild".to_owned(),
                member_count: 42,
                owner_id: UserId::from("U0"),
            },
            event,
        }
    }

    fn command(name: &str) -> GatewayEvent {
        GatewayEvent::Command { name: name.to_owned(), options: HashMap::new() }
    }

    struct Fixture {
        pipeline: InteractionPipeline,
        chat: Arc<RecordingChat>,
        audit: Arc<InMemoryAuditSink>,
        logs: Arc<InMemoryInteractionLogRepository>,
    }

    fn fixture_with(registry: HandlerRegistry) -> Fixture {
        let chat = Arc::new(RecordingChat::new());
        let audit = Arc::new(InMemoryAuditSink::default());
        let logs = Arc::new(InMemoryInteractionLogRepository::new());
        let pipeline = InteractionPipeline::new(PipelineServices {
            permissions: PermissionEvaluator::default(),
            limiter: RateLimiter::new(Arc::new(InMemoryCacheStore::new()), RateLimits::default()),
            cooldowns: CooldownMap::default(),
            classifier: Arc::new(ErrorClassifier::new(ClassifierThresholds::default())),
            security: SecurityMonitor::default(),
            audit: audit.clone() as Arc<dyn AuditSink>,
            logs: logs.clone(),
            links: Arc::new(InMemoryServerLinkRepository::new()),
            fallback: Arc::new(FallbackResponder::new(Default::default())),
            registry,
            chat: chat.clone(),
        });
        Fixture { pipeline, chat, audit, logs }
    }

    fn fixture() -> Fixture {
        let mut registry = HandlerRegistry::new();
        registry.register(EventCategory::Command, "help", Arc::new(EchoHandler));
        registry.register(EventCategory::Command, "status", Arc::new(EchoHandler));
        registry.register(EventCategory::Button, "refresh_status", Arc::new(EchoHandler));
        fixture_with(registry)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_command_responds_and_logs() {
        let fixture = fixture();
        let report = fixture
            .pipeline
            .process(&envelope_for(member(30, false), command("help")))
            .await;

        assert_eq!(report.outcome, PipelineOutcome::Success);
        assert!(report.responded);
        assert_eq!(fixture.chat.replies().await.len(), 1);
        tokio::task::yield_now().await;
        let rows = fixture.logs.query(&InteractionFilter::default()).await.expect("query");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, PipelineOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_events_are_denied_without_a_response() {
        let fixture = fixture();
        let report = fixture
            .pipeline
            .process(&envelope_for(member(30, true), command("help")))
            .await;

        assert_eq!(report.outcome, PipelineOutcome::Denied);
        assert!(!report.responded);
        assert!(fixture.chat.replies().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn young_accounts_are_gated() {
        let fixture = fixture();
        let report = fixture
            .pipeline
            .process(&envelope_for(member(3, false), command("help")))
            .await;

        assert_eq!(report.outcome, PipelineOutcome::Denied);
        let replies = fixture.chat.replies().await;
        assert_eq!(replies.len(), 1);
        let embed = replies[0].1.embed.clone().expect("embed");
        assert_eq!(embed.title, "Permission Denied");
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_command_in_a_minute_is_rate_limited() {
        let fixture = fixture();
        let envelope = envelope_for(member(30, false), command("help"));

        let mut last = fixture.pipeline.process(&envelope).await;
        for _ in 0..5 {
            // The help cooldown is 2 s; step past it so only the rate window gates.
            tokio::time::advance(std::time::Duration::from_secs(3)).await;
            last = fixture.pipeline.process(&envelope).await;
        }

        assert_eq!(last.outcome, PipelineOutcome::RateLimit);
    }

    #[tokio::test(start_paused = true)]
    async fn second_command_within_the_cooldown_gap_is_blocked() {
        let fixture = fixture();
        let envelope = envelope_for(member(30, false), command("status"));

        let first = fixture.pipeline.process(&envelope).await;
        let second = fixture.pipeline.process(&envelope).await;

        assert_eq!(first.outcome, PipelineOutcome::Success);
        assert_eq!(second.outcome, PipelineOutcome::Cooldown);
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_denies_before_dispatch() {
        let fixture = fixture();
        fixture.pipeline.services.fallback.set_maintenance(Some(MaintenanceInfo {
            reason: "Planned upgrade.".to_owned(),
            estimated_end: None,
        }));

        let report = fixture
            .pipeline
            .process(&envelope_for(member(30, false), command("help")))
            .await;

        assert_eq!(report.outcome, PipelineOutcome::Denied);
        let replies = fixture.chat.replies().await;
        assert_eq!(replies[0].1.embed.clone().expect("embed").title, "Scheduled Maintenance");
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denial_is_audited() {
        let mut registry = HandlerRegistry::new();
        registry.register(EventCategory::Command, "security", Arc::new(EchoHandler));
        let fixture = fixture_with(registry);
        let mut subject = member(30, false);
        subject.has_manage_server = false;

        let report = fixture
            .pipeline
            .process(&envelope_for(subject, command("security")))
            .await;

        assert_eq!(report.outcome, PipelineOutcome::Denied);
        assert_eq!(fixture.audit.events_of_type("permission_denied").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connective_api_failure_degrades_to_a_website_redirect() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            EventCategory::Command,
            "list-tasks",
            Arc::new(FailingHandler {
                failure: RawFailure::new(
                    ErrorDomain::Api,
                    None,
                    "NetworkError",
                    "connect ECONNREFUSED 10.0.0.1",
                ),
            }),
        );
        let fixture = fixture_with(registry);

        let report = fixture
            .pipeline
            .process(&envelope_for(member(30, false), command("list-tasks")))
            .await;

        assert_eq!(report.outcome, PipelineOutcome::Error);
        let replies = fixture.chat.replies().await;
        assert_eq!(replies[0].1.embed.clone().expect("embed").title, "Temporarily Unavailable");
        assert_eq!(fixture.pipeline.services.fallback.website_redirects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_rapid_event_raises_a_security_alert() {
        let fixture = fixture();
        let envelope =
            envelope_for(member(30, false), GatewayEvent::Button {
                custom_id: "refresh_status".to_owned(),
            });

        let mut last = fixture.pipeline.process(&envelope).await;
        for _ in 0..10 {
            last = fixture.pipeline.process(&envelope).await;
        }

        assert!(last
            .alerts
            .iter()
            .any(|alert| alert.kind == SecurityEventKind::RapidCommands));
        assert!(!fixture.audit.events_of_type("security_alert").is_empty());
    }
}
