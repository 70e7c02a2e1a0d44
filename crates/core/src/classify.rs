use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Where a raw failure originated. Drives both the classification table and
/// the per-domain occurrence thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorDomain {
    Chat,
    Api,
    Persistence,
    General,
}

impl ErrorDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Api => "api",
            Self::Persistence => "persistence",
            Self::General => "general",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    Permissions,
    NotFound,
    Connection,
    Authentication,
    Timeout,
    Network,
    BadRequest,
    Unauthorized,
    Forbidden,
    ServerError,
    Validation,
    Duplicate,
    TypeFault,
    ReferenceFault,
    SyntaxFault,
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    RetryWithDelay,
    CheckPermissions,
    CheckToken,
    CheckAuth,
    CheckUniqueness,
    ValidateInput,
    ValidateContext,
    ValidateResource,
    ValidateData,
    Reconnect,
    Report,
    None,
}

impl RecoveryAction {
    /// Actions the retry executor may act on, subject to idempotence.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retry | Self::RetryWithDelay)
    }
}

/// Shape of a raw failure before classification. Callers fill in whatever
/// they know; the table keys off code first, then name/message phrases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFailure {
    pub domain: ErrorDomain,
    pub code: Option<u32>,
    pub name: String,
    pub message: String,
}

impl RawFailure {
    pub fn new(domain: ErrorDomain, code: Option<u32>, name: &str, message: &str) -> Self {
        Self { domain, code, name: name.to_owned(), message: message.to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorVerdict {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub recoverable: bool,
    pub user_message: &'static str,
    pub action: RecoveryAction,
}

/// Raised when a (domain, kind) pair breaches its occurrence threshold
/// within the sliding window. The breach never alters the verdict itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThresholdBreach {
    pub domain: ErrorDomain,
    pub kind: ErrorKind,
    pub count: usize,
    pub threshold: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifierThresholds {
    pub chat: usize,
    pub api: usize,
    pub persistence: usize,
    pub general: usize,
    pub window: Duration,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self { chat: 10, api: 20, persistence: 5, general: 50, window: Duration::from_secs(300) }
    }
}

impl ClassifierThresholds {
    fn for_domain(&self, domain: ErrorDomain) -> usize {
        match domain {
            ErrorDomain::Chat => self.chat,
            ErrorDomain::Api => self.api,
            ErrorDomain::Persistence => self.persistence,
            ErrorDomain::General => self.general,
        }
    }
}

/// Deterministic failure-to-verdict mapping plus a sliding occurrence
/// counter. Injected as a service; tests construct their own instance.
pub struct ErrorClassifier {
    thresholds: ClassifierThresholds,
    occurrences: Mutex<HashMap<(ErrorDomain, ErrorKind), Vec<Instant>>>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(ClassifierThresholds::default())
    }
}

impl ErrorClassifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds, occurrences: Mutex::new(HashMap::new()) }
    }

    /// Pure classification. Reclassifying a verdict's constituents yields
    /// the same verdict.
    pub fn classify(&self, failure: &RawFailure) -> ErrorVerdict {
        match failure.domain {
            ErrorDomain::Chat => classify_chat(failure),
            ErrorDomain::Api => classify_api(failure),
            ErrorDomain::Persistence => classify_persistence(failure),
            ErrorDomain::General => classify_general(failure),
        }
    }

    /// Classifies and records the occurrence. Returns the verdict along
    /// with a breach notification when the per-domain threshold is crossed.
    pub fn classify_and_count(&self, failure: &RawFailure) -> (ErrorVerdict, Option<ThresholdBreach>) {
        self.classify_and_count_at(failure, Instant::now())
    }

    pub fn classify_and_count_at(
        &self,
        failure: &RawFailure,
        now: Instant,
    ) -> (ErrorVerdict, Option<ThresholdBreach>) {
        let verdict = self.classify(failure);
        let threshold = self.thresholds.for_domain(failure.domain);
        let window = self.thresholds.window;

        let count = {
            let mut occurrences = match self.occurrences.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let bucket = occurrences.entry((failure.domain, verdict.kind)).or_default();
            bucket.retain(|at| now.duration_since(*at) < window);
            bucket.push(now);
            bucket.len()
        };

        let breach = (count == threshold).then(|| ThresholdBreach {
            domain: failure.domain,
            kind: verdict.kind,
            count,
            threshold,
        });
        (verdict, breach)
    }
}

fn has_phrase(failure: &RawFailure, phrases: &[&str]) -> bool {
    let name = failure.name.to_ascii_lowercase();
    let message = failure.message.to_ascii_lowercase();
    phrases.iter().any(|phrase| name.contains(phrase) || message.contains(phrase))
}

fn verdict(
    kind: ErrorKind,
    severity: Severity,
    recoverable: bool,
    user_message: &'static str,
    action: RecoveryAction,
) -> ErrorVerdict {
    ErrorVerdict { kind, severity, recoverable, user_message, action }
}

fn classify_chat(failure: &RawFailure) -> ErrorVerdict {
    match failure.code {
        Some(429) => {
            return verdict(
                ErrorKind::RateLimit,
                Severity::Medium,
                true,
                "The chat platform is rate limiting the bot. Please try again shortly.",
                RecoveryAction::RetryWithDelay,
            )
        }
        Some(50013) => {
            return verdict(
                ErrorKind::Permissions,
                Severity::Medium,
                false,
                "The bot is missing permissions in this channel.",
                RecoveryAction::CheckPermissions,
            )
        }
        Some(10003) | Some(10004) => {
            return verdict(
                ErrorKind::NotFound,
                Severity::Low,
                false,
                "That channel or server could not be found.",
                RecoveryAction::ValidateContext,
            )
        }
        Some(401) => {
            return verdict(
                ErrorKind::Authentication,
                Severity::Critical,
                false,
                "The bot could not authenticate with the chat platform.",
                RecoveryAction::CheckToken,
            )
        }
        _ => {}
    }

    if has_phrase(failure, &["rate limit", "too many requests"]) {
        return verdict(
            ErrorKind::RateLimit,
            Severity::Medium,
            true,
            "The chat platform is rate limiting the bot. Please try again shortly.",
            RecoveryAction::RetryWithDelay,
        );
    }
    if has_phrase(failure, &["missing permissions", "missing access"]) {
        return verdict(
            ErrorKind::Permissions,
            Severity::Medium,
            false,
            "The bot is missing permissions in this channel.",
            RecoveryAction::CheckPermissions,
        );
    }
    if has_phrase(failure, &["unknown channel", "unknown guild", "unknown"]) {
        return verdict(
            ErrorKind::NotFound,
            Severity::Low,
            false,
            "That channel or server could not be found.",
            RecoveryAction::ValidateContext,
        );
    }
    if has_phrase(failure, &["connection", "network", "socket"]) {
        return verdict(
            ErrorKind::Connection,
            Severity::High,
            true,
            "Lost connection to the chat platform. Reconnecting.",
            RecoveryAction::Reconnect,
        );
    }
    if has_phrase(failure, &["unauthorized"]) {
        return verdict(
            ErrorKind::Authentication,
            Severity::Critical,
            false,
            "The bot could not authenticate with the chat platform.",
            RecoveryAction::CheckToken,
        );
    }

    unknown_verdict()
}

fn classify_api(failure: &RawFailure) -> ErrorVerdict {
    if has_phrase(failure, &["timeout", "timed out", "econnaborted"]) {
        return verdict(
            ErrorKind::Timeout,
            Severity::Medium,
            true,
            "The community platform took too long to respond.",
            RecoveryAction::Retry,
        );
    }
    if has_phrase(failure, &["econnrefused", "enotfound", "dns"]) {
        return verdict(
            ErrorKind::Network,
            Severity::High,
            true,
            "Could not reach the community platform.",
            RecoveryAction::RetryWithDelay,
        );
    }

    match failure.code {
        Some(400) => verdict(
            ErrorKind::BadRequest,
            Severity::Low,
            false,
            "The platform rejected the request. Check your inputs.",
            RecoveryAction::ValidateInput,
        ),
        Some(401) => verdict(
            ErrorKind::Unauthorized,
            Severity::High,
            false,
            "The platform rejected the bot's credentials.",
            RecoveryAction::CheckAuth,
        ),
        Some(403) => verdict(
            ErrorKind::Forbidden,
            Severity::Medium,
            false,
            "You do not have access to that platform resource.",
            RecoveryAction::CheckPermissions,
        ),
        Some(404) => verdict(
            ErrorKind::NotFound,
            Severity::Low,
            false,
            "That platform resource could not be found.",
            RecoveryAction::ValidateResource,
        ),
        Some(429) => verdict(
            ErrorKind::RateLimit,
            Severity::Medium,
            true,
            "The community platform is rate limiting requests.",
            RecoveryAction::RetryWithDelay,
        ),
        Some(code) if (500..600).contains(&code) => verdict(
            ErrorKind::ServerError,
            Severity::High,
            true,
            "The community platform is having trouble. Please try again shortly.",
            RecoveryAction::RetryWithDelay,
        ),
        _ => unknown_verdict(),
    }
}

fn classify_persistence(failure: &RawFailure) -> ErrorVerdict {
    if has_phrase(failure, &["connection", "connectionerror"]) {
        return verdict(
            ErrorKind::Connection,
            Severity::Critical,
            true,
            "A storage problem interrupted the request. Please try again.",
            RecoveryAction::Reconnect,
        );
    }
    if has_phrase(failure, &["validation"]) {
        return verdict(
            ErrorKind::Validation,
            Severity::Low,
            false,
            "The data did not pass validation.",
            RecoveryAction::ValidateData,
        );
    }
    if has_phrase(failure, &["duplicate", "unique"]) {
        return verdict(
            ErrorKind::Duplicate,
            Severity::Low,
            false,
            "That record already exists.",
            RecoveryAction::CheckUniqueness,
        );
    }
    if has_phrase(failure, &["timeout", "timed out"]) {
        return verdict(
            ErrorKind::Timeout,
            Severity::Medium,
            true,
            "Storage took too long to respond. Please try again.",
            RecoveryAction::Retry,
        );
    }

    unknown_verdict()
}

fn classify_general(failure: &RawFailure) -> ErrorVerdict {
    if has_phrase(failure, &["typeerror", "type error"]) {
        return verdict(
            ErrorKind::TypeFault,
            Severity::High,
            false,
            "An unexpected internal error occurred.",
            RecoveryAction::Report,
        );
    }
    if has_phrase(failure, &["referenceerror", "reference error"]) {
        return verdict(
            ErrorKind::ReferenceFault,
            Severity::High,
            false,
            "An unexpected internal error occurred.",
            RecoveryAction::Report,
        );
    }
    if has_phrase(failure, &["syntaxerror", "syntax error"]) {
        return verdict(
            ErrorKind::SyntaxFault,
            Severity::Medium,
            false,
            "An unexpected internal error occurred.",
            RecoveryAction::Report,
        );
    }

    unknown_verdict()
}

fn unknown_verdict() -> ErrorVerdict {
    verdict(
        ErrorKind::Unknown,
        Severity::Medium,
        false,
        "Something went wrong. Please try again.",
        RecoveryAction::None,
    )
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{
        ClassifierThresholds, ErrorClassifier, ErrorDomain, ErrorKind, RawFailure, RecoveryAction,
        Severity,
    };

    fn api_failure(code: u32) -> RawFailure {
        RawFailure::new(ErrorDomain::Api, Some(code), "HttpError", "request failed")
    }

    #[test]
    fn chat_rate_limit_by_code_and_phrase_agree() {
        let classifier = ErrorClassifier::default();
        let by_code =
            classifier.classify(&RawFailure::new(ErrorDomain::Chat, Some(429), "", ""));
        let by_phrase = classifier.classify(&RawFailure::new(
            ErrorDomain::Chat,
            None,
            "DiscordAPIError",
            "You are being rate limited",
        ));
        assert_eq!(by_code, by_phrase);
        assert_eq!(by_code.kind, ErrorKind::RateLimit);
        assert_eq!(by_code.action, RecoveryAction::RetryWithDelay);
        assert!(by_code.recoverable);
    }

    #[test]
    fn chat_missing_permissions_is_not_recoverable() {
        let classifier = ErrorClassifier::default();
        let verdict =
            classifier.classify(&RawFailure::new(ErrorDomain::Chat, Some(50013), "", ""));
        assert_eq!(verdict.kind, ErrorKind::Permissions);
        assert!(!verdict.recoverable);
        assert_eq!(verdict.action, RecoveryAction::CheckPermissions);
    }

    #[test]
    fn chat_unauthorized_is_critical() {
        let classifier = ErrorClassifier::default();
        let verdict = classifier.classify(&RawFailure::new(ErrorDomain::Chat, Some(401), "", ""));
        assert_eq!(verdict.severity, Severity::Critical);
        assert_eq!(verdict.action, RecoveryAction::CheckToken);
    }

    #[test]
    fn api_status_codes_follow_the_table() {
        let classifier = ErrorClassifier::default();
        assert_eq!(classifier.classify(&api_failure(400)).kind, ErrorKind::BadRequest);
        assert_eq!(classifier.classify(&api_failure(401)).kind, ErrorKind::Unauthorized);
        assert_eq!(classifier.classify(&api_failure(403)).kind, ErrorKind::Forbidden);
        assert_eq!(classifier.classify(&api_failure(404)).kind, ErrorKind::NotFound);
        assert_eq!(classifier.classify(&api_failure(429)).kind, ErrorKind::RateLimit);
        assert_eq!(classifier.classify(&api_failure(500)).kind, ErrorKind::ServerError);
        assert_eq!(classifier.classify(&api_failure(503)).kind, ErrorKind::ServerError);
    }

    #[test]
    fn api_timeout_phrase_wins_over_code() {
        let classifier = ErrorClassifier::default();
        let verdict = classifier.classify(&RawFailure::new(
            ErrorDomain::Api,
            Some(500),
            "Error",
            "request timed out (ECONNABORTED)",
        ));
        assert_eq!(verdict.kind, ErrorKind::Timeout);
        assert_eq!(verdict.action, RecoveryAction::Retry);
    }

    #[test]
    fn api_connection_refused_is_retry_with_delay() {
        let classifier = ErrorClassifier::default();
        let verdict = classifier.classify(&RawFailure::new(
            ErrorDomain::Api,
            None,
            "Error",
            "connect ECONNREFUSED 127.0.0.1:4000",
        ));
        assert_eq!(verdict.kind, ErrorKind::Network);
        assert_eq!(verdict.severity, Severity::High);
        assert_eq!(verdict.action, RecoveryAction::RetryWithDelay);
    }

    #[test]
    fn persistence_duplicate_key_is_low_and_final() {
        let classifier = ErrorClassifier::default();
        let verdict = classifier.classify(&RawFailure::new(
            ErrorDomain::Persistence,
            None,
            "SqlError",
            "UNIQUE constraint failed: server_community_link.guild_id",
        ));
        assert_eq!(verdict.kind, ErrorKind::Duplicate);
        assert!(!verdict.recoverable);
        assert_eq!(verdict.action, RecoveryAction::CheckUniqueness);
    }

    #[test]
    fn classification_is_stable_under_reclassification() {
        let classifier = ErrorClassifier::default();
        let failure = api_failure(503);
        let first = classifier.classify(&failure);
        let second = classifier.classify(&failure);
        assert_eq!(first, second);
    }

    #[test]
    fn persistence_threshold_fires_once_at_the_boundary() {
        let classifier = ErrorClassifier::new(ClassifierThresholds {
            persistence: 3,
            ..ClassifierThresholds::default()
        });
        let failure = RawFailure::new(ErrorDomain::Persistence, None, "SqlError", "connection lost");
        let now = Instant::now();

        let (_, first) = classifier.classify_and_count_at(&failure, now);
        let (_, second) = classifier.classify_and_count_at(&failure, now);
        let (_, third) = classifier.classify_and_count_at(&failure, now);
        let (_, fourth) = classifier.classify_and_count_at(&failure, now);

        assert!(first.is_none());
        assert!(second.is_none());
        let breach = third.expect("third occurrence should breach");
        assert_eq!(breach.count, 3);
        assert!(fourth.is_none(), "breach fires only when the threshold is first crossed");
    }

    #[test]
    fn occurrences_age_out_of_the_window() {
        let classifier = ErrorClassifier::new(ClassifierThresholds {
            persistence: 2,
            window: Duration::from_secs(300),
            ..ClassifierThresholds::default()
        });
        let failure = RawFailure::new(ErrorDomain::Persistence, None, "SqlError", "connection lost");
        let start = Instant::now();

        classifier.classify_and_count_at(&failure, start);
        let (_, later) =
            classifier.classify_and_count_at(&failure, start + Duration::from_secs(301));
        assert!(later.is_none(), "aged-out occurrence should not count toward the threshold");
    }
}
