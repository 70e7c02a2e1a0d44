use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::interaction::PipelineOutcome;
use crate::domain::{GuildId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    RapidCommands,
    RepeatedDenials,
    RateLimitAbuse,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RapidCommands => "rapid_commands",
            Self::RepeatedDenials => "repeated_denials",
            Self::RateLimitAbuse => "rate_limit_abuse",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityAlert {
    pub kind: SecurityEventKind,
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub count: usize,
    pub threshold: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityThresholds {
    /// Events per subject within the window before `rapid_commands` fires.
    pub rapid_events: usize,
    /// Denied outcomes per subject within the window.
    pub repeated_denials: usize,
    /// Rate-limited outcomes per subject within the window.
    pub rate_limit_hits: usize,
    pub window: Duration,
}

impl Default for SecurityThresholds {
    fn default() -> Self {
        Self {
            rapid_events: 10,
            repeated_denials: 5,
            rate_limit_hits: 3,
            window: Duration::from_secs(60),
        }
    }
}

/// Tracks per-subject sliding windows of pipeline outcomes and raises
/// alerts when abuse thresholds are crossed. Injected as a service; the
/// pipeline feeds it on every observed outcome.
pub struct SecurityMonitor {
    thresholds: SecurityThresholds,
    events: Mutex<HashMap<UserId, Vec<Instant>>>,
    denials: Mutex<HashMap<UserId, Vec<Instant>>>,
    rate_limits: Mutex<HashMap<UserId, Vec<Instant>>>,
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new(SecurityThresholds::default())
    }
}

impl SecurityMonitor {
    pub fn new(thresholds: SecurityThresholds) -> Self {
        Self {
            thresholds,
            events: Mutex::new(HashMap::new()),
            denials: Mutex::new(HashMap::new()),
            rate_limits: Mutex::new(HashMap::new()),
        }
    }

    pub fn observe(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        outcome: PipelineOutcome,
    ) -> Vec<SecurityAlert> {
        self.observe_at(guild_id, user_id, outcome, Instant::now())
    }

    pub fn observe_at(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        outcome: PipelineOutcome,
        now: Instant,
    ) -> Vec<SecurityAlert> {
        let window = self.thresholds.window;
        let mut alerts = Vec::new();

        let event_count = record(&self.events, user_id, now, window);
        if event_count == self.thresholds.rapid_events + 1 {
            alerts.push(SecurityAlert {
                kind: SecurityEventKind::RapidCommands,
                guild_id: guild_id.clone(),
                user_id: user_id.clone(),
                count: event_count,
                threshold: self.thresholds.rapid_events,
            });
        }

        if outcome == PipelineOutcome::Denied {
            let denial_count = record(&self.denials, user_id, now, window);
            if denial_count == self.thresholds.repeated_denials {
                alerts.push(SecurityAlert {
                    kind: SecurityEventKind::RepeatedDenials,
                    guild_id: guild_id.clone(),
                    user_id: user_id.clone(),
                    count: denial_count,
                    threshold: self.thresholds.repeated_denials,
                });
            }
        }

        if outcome == PipelineOutcome::RateLimit {
            let hit_count = record(&self.rate_limits, user_id, now, window);
            if hit_count == self.thresholds.rate_limit_hits {
                alerts.push(SecurityAlert {
                    kind: SecurityEventKind::RateLimitAbuse,
                    guild_id: guild_id.clone(),
                    user_id: user_id.clone(),
                    count: hit_count,
                    threshold: self.thresholds.rate_limit_hits,
                });
            }
        }

        alerts
    }
}

fn record(
    windows: &Mutex<HashMap<UserId, Vec<Instant>>>,
    user_id: &UserId,
    now: Instant,
    window: Duration,
) -> usize {
    let mut windows = match windows.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let bucket = windows.entry(user_id.clone()).or_default();
    bucket.retain(|at| now.duration_since(*at) < window);
    bucket.push(now);
    bucket.len()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{SecurityEventKind, SecurityMonitor};
    use crate::domain::interaction::PipelineOutcome;
    use crate::domain::{GuildId, UserId};

    #[test]
    fn eleventh_rapid_event_raises_rapid_commands_once() {
        let monitor = SecurityMonitor::default();
        let guild = GuildId::from("G1");
        let user = UserId::from("U1");
        let now = Instant::now();

        for i in 0..10 {
            let alerts = monitor.observe_at(
                &guild,
                &user,
                PipelineOutcome::Success,
                now + Duration::from_millis(i),
            );
            assert!(alerts.is_empty(), "first ten events should not alert");
        }

        let alerts =
            monitor.observe_at(&guild, &user, PipelineOutcome::RateLimit, now + Duration::from_millis(10));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, SecurityEventKind::RapidCommands);
        assert_eq!(alerts[0].count, 11);

        let alerts =
            monitor.observe_at(&guild, &user, PipelineOutcome::Success, now + Duration::from_millis(11));
        assert!(alerts.is_empty(), "alert fires once per window crossing");
    }

    #[test]
    fn repeated_denials_alert_at_threshold() {
        let monitor = SecurityMonitor::default();
        let guild = GuildId::from("G1");
        let user = UserId::from("U1");
        let now = Instant::now();

        for i in 0..4 {
            let alerts = monitor.observe_at(
                &guild,
                &user,
                PipelineOutcome::Denied,
                now + Duration::from_millis(i),
            );
            assert!(alerts.is_empty());
        }

        let alerts =
            monitor.observe_at(&guild, &user, PipelineOutcome::Denied, now + Duration::from_millis(4));
        assert!(alerts.iter().any(|alert| alert.kind == SecurityEventKind::RepeatedDenials));
    }

    #[test]
    fn windows_age_out() {
        let monitor = SecurityMonitor::default();
        let guild = GuildId::from("G1");
        let user = UserId::from("U1");
        let start = Instant::now();

        for i in 0..10 {
            monitor.observe_at(&guild, &user, PipelineOutcome::Success, start + Duration::from_millis(i));
        }
        let alerts = monitor.observe_at(
            &guild,
            &user,
            PipelineOutcome::Success,
            start + Duration::from_secs(61),
        );
        assert!(alerts.is_empty(), "events outside the window should not trigger an alert");
    }

    #[test]
    fn subjects_are_tracked_independently() {
        let monitor = SecurityMonitor::default();
        let guild = GuildId::from("G1");
        let now = Instant::now();

        for i in 0..10 {
            monitor.observe_at(
                &guild,
                &UserId::from("U1"),
                PipelineOutcome::Success,
                now + Duration::from_millis(i),
            );
        }
        let alerts = monitor.observe_at(
            &guild,
            &UserId::from("U2"),
            PipelineOutcome::Success,
            now + Duration::from_millis(10),
        );
        assert!(alerts.is_empty());
    }
}
