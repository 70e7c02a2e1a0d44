use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::info;

use taskbridge_core::config::UrlsConfig;

use crate::embeds::{Button, EmbedBuilder, ReplyPayload, COLOR_ERROR, COLOR_WARNING};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaintenanceInfo {
    pub reason: String,
    pub estimated_end: Option<DateTime<Utc>>,
}

struct DegradationRoute {
    alternative: &'static str,
    message: &'static str,
    deep_link_path: &'static str,
}

fn degradation_table() -> HashMap<&'static str, DegradationRoute> {
    let mut table = HashMap::new();
    table.insert(
        "create-task",
        DegradationRoute {
            alternative: "Create the task on the website",
            message: "Task creation is temporarily unavailable here.",
            deep_link_path: "/tasks/new",
        },
    );
    table.insert(
        "list-tasks",
        DegradationRoute {
            alternative: "Browse tasks on the website",
            message: "Task listings are temporarily unavailable here.",
            deep_link_path: "/tasks",
        },
    );
    table.insert(
        "complete-task",
        DegradationRoute {
            alternative: "Complete the task on the website",
            message: "Task completion is temporarily unavailable here.",
            deep_link_path: "/tasks",
        },
    );
    table.insert(
        "connect-allowlist",
        DegradationRoute {
            alternative: "Manage allowlists on the website",
            message: "Allowlist connections are temporarily unavailable here.",
            deep_link_path: "/allowlists",
        },
    );
    table.insert(
        "enter-allowlist",
        DegradationRoute {
            alternative: "Enter the allowlist on the website",
            message: "Allowlist entry is temporarily unavailable here.",
            deep_link_path: "/allowlists",
        },
    );
    table.insert(
        "link-community",
        DegradationRoute {
            alternative: "Link your community from the dashboard",
            message: "Community linking is temporarily unavailable here.",
            deep_link_path: "/dashboard/integrations",
        },
    );
    table
}

/// Produces degraded outcomes when an upstream is unavailable: web
/// redirects, maintenance notices, and correlated critical-failure stubs.
pub struct FallbackResponder {
    urls: UrlsConfig,
    degradations: HashMap<&'static str, DegradationRoute>,
    maintenance: Mutex<Option<MaintenanceInfo>>,
    website_redirects: AtomicU64,
}

impl FallbackResponder {
    pub fn new(urls: UrlsConfig) -> Self {
        Self {
            urls,
            degradations: degradation_table(),
            maintenance: Mutex::new(None),
            website_redirects: AtomicU64::new(0),
        }
    }

    pub fn set_maintenance(&self, info: Option<MaintenanceInfo>) {
        let mut maintenance = match self.maintenance.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *maintenance = info;
    }

    pub fn maintenance(&self) -> Option<MaintenanceInfo> {
        match self.maintenance.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Total redirect-to-web outcomes produced since startup.
    pub fn website_redirects(&self) -> u64 {
        self.website_redirects.load(Ordering::Relaxed)
    }

    pub fn api_unavailable(&self, operation: &str) -> ReplyPayload {
        self.website_redirects.fetch_add(1, Ordering::Relaxed);
        info!(
            event_name = "fallback_redirect",
            operation, "redirecting to the website while the Platform is unavailable"
        );

        match self.degradations.get(operation) {
            Some(route) => EmbedBuilder::new(
                "Temporarily Unavailable",
                format!("{} {}.", route.message, route.alternative.to_lowercase()),
            )
            .color(COLOR_WARNING)
            .ephemeral()
            .button(Button::link(
                format!("{}{}", self.urls.web.trim_end_matches('/'), route.deep_link_path),
                route.alternative,
            ))
            .button(Button::link(self.urls.status.clone(), "Service Status"))
            .build(),
            None => self.generic_redirect(),
        }
    }

    pub fn discord_failure(&self) -> ReplyPayload {
        self.website_redirects.fetch_add(1, Ordering::Relaxed);
        self.generic_redirect()
    }

    pub fn maintenance_notice(&self, info: &MaintenanceInfo) -> ReplyPayload {
        let eta = match info.estimated_end {
            Some(end) => format!("Expected back by {}.", end.format("%Y-%m-%d %H:%M UTC")),
            None => "No estimated end time yet.".to_owned(),
        };
        EmbedBuilder::new("Scheduled Maintenance", format!("{} {eta}", info.reason))
            .color(COLOR_WARNING)
            .ephemeral()
            .button(Button::link(self.urls.status.clone(), "Service Status"))
            .build()
    }

    pub fn critical_failure(&self, kind: &str) -> ReplyPayload {
        let error_id = synthetic_error_id();
        EmbedBuilder::new(
            "Unexpected Error",
            format!(
                "An unexpected {kind} error occurred. Contact support with error id `{error_id}`."
            ),
        )
        .color(COLOR_ERROR)
        .ephemeral()
        .footer(format!("Error ID: {error_id}"))
        .button(Button::link(self.urls.support.clone(), "Contact Support"))
        .build()
    }

    fn generic_redirect(&self) -> ReplyPayload {
        EmbedBuilder::new(
            "Temporarily Unavailable",
            "This action is temporarily unavailable. Everything is still available on the website.",
        )
        .color(COLOR_WARNING)
        .ephemeral()
        .button(Button::link(self.urls.web.clone(), "Open Website"))
        .button(Button::link(self.urls.status.clone(), "Service Status"))
        .build()
    }
}

/// `<timestamp>-<random>` id for support correlation.
fn synthetic_error_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0x1000..0xffff);
    format!("{}-{suffix:x}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use taskbridge_core::config::UrlsConfig;

    use super::{FallbackResponder, MaintenanceInfo};

    fn responder() -> FallbackResponder {
        FallbackResponder::new(UrlsConfig::default())
    }

    #[test]
    fn known_operation_gets_a_deep_link() {
        let responder = responder();
        let payload = responder.api_unavailable("create-task");
        let urls: Vec<_> = payload.buttons.iter().filter_map(|b| b.url.as_deref()).collect();
        assert!(urls.iter().any(|url| url.ends_with("/tasks/new")), "deep link missing: {urls:?}");
        assert_eq!(responder.website_redirects(), 1);
    }

    #[test]
    fn unknown_operation_falls_back_to_the_generic_redirect() {
        let responder = responder();
        let payload = responder.api_unavailable("draw-winners");
        let embed = payload.embed.expect("embed");
        assert!(embed.description.contains("available on the website"));
        assert_eq!(responder.website_redirects(), 1);
    }

    #[test]
    fn redirect_counter_accumulates_across_outcomes() {
        let responder = responder();
        responder.api_unavailable("list-tasks");
        responder.discord_failure();
        assert_eq!(responder.website_redirects(), 2);
    }

    #[test]
    fn maintenance_flag_round_trips() {
        let responder = responder();
        assert!(responder.maintenance().is_none());
        responder.set_maintenance(Some(MaintenanceInfo {
            reason: "Database upgrade in progress.".to_owned(),
            estimated_end: None,
        }));
        let info = responder.maintenance().expect("maintenance set");
        let payload = responder.maintenance_notice(&info);
        let embed = payload.embed.expect("embed");
        assert_eq!(embed.title, "Scheduled Maintenance");
        assert!(embed.description.contains("Database upgrade"));
    }

    #[test]
    fn critical_failure_carries_a_synthetic_error_id() {
        let payload = responder().critical_failure("persistence");
        let embed = payload.embed.expect("embed");
        let footer = embed.footer.expect("footer");
        let id = footer.trim_start_matches("Error ID: ");
        let (timestamp, random) = id.split_once('-').expect("timestamp-random format");
        assert!(timestamp.parse::<i64>().is_ok());
        assert!(!random.is_empty());
    }
}
