use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::UserId;

/// What the gateway knows about the invoking member at event time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub user_id: UserId,
    pub is_bot: bool,
    pub account_created_at: DateTime<Utc>,
    pub roles: Vec<String>,
    pub has_manage_server: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandPermission {
    /// Manage-Server plus Platform-side community ownership (validated by
    /// the handler before mutation).
    ManageServerAndOwnership,
    /// Manage-Server by default; per-guild role overrides may grant it.
    ManageServerOverridable,
    ManageServer,
    Anyone,
}

/// Fixed strings suitable for user display and audit diffing.
pub mod reasons {
    pub const ALLOWED: &str = "allowed";
    pub const BOT_SUBJECT: &str = "bots cannot use this command";
    pub const ACCOUNT_TOO_NEW: &str = "your account is too new to use this command";
    pub const MANAGE_SERVER_REQUIRED: &str = "you need the Manage Server permission";
    pub const UNKNOWN_COMMAND: &str = "unknown command";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: &'static str,
}

impl PermissionDecision {
    fn allow() -> Self {
        Self { allowed: true, reason: reasons::ALLOWED }
    }

    fn deny(reason: &'static str) -> Self {
        Self { allowed: false, reason }
    }
}

/// Per-guild role grants for the overridable commands, loaded from the
/// server link record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleOverrides {
    pub create_task_roles: Vec<String>,
    pub connect_allowlist_roles: Vec<String>,
}

impl RoleOverrides {
    fn grants(&self, command: &str, roles: &[String]) -> bool {
        let granted = match command {
            "create-task" => &self.create_task_roles,
            "connect-allowlist" => &self.connect_allowlist_roles,
            _ => return false,
        };
        roles.iter().any(|role| granted.contains(role))
    }
}

pub struct PermissionEvaluator {
    account_age_floor: Duration,
}

impl Default for PermissionEvaluator {
    fn default() -> Self {
        Self { account_age_floor: Duration::days(7) }
    }
}

impl PermissionEvaluator {
    pub fn new(account_age_floor: Duration) -> Self {
        Self { account_age_floor }
    }

    pub fn command_permission(command: &str) -> Option<CommandPermission> {
        match command {
            "link-community" | "unlink-community" | "relink-community" => {
                Some(CommandPermission::ManageServerAndOwnership)
            }
            "create-task" | "connect-allowlist" => Some(CommandPermission::ManageServerOverridable),
            "allowlist-analytics" | "security" => Some(CommandPermission::ManageServer),
            "list-tasks" | "status" | "help" => Some(CommandPermission::Anyone),
            _ => None,
        }
    }

    /// Account age at exactly the floor is allowed.
    pub fn meets_age_floor(&self, member: &MemberSnapshot, now: DateTime<Utc>) -> bool {
        now - member.account_created_at >= self.account_age_floor
    }

    pub fn evaluate(
        &self,
        member: &MemberSnapshot,
        command: &str,
        overrides: &RoleOverrides,
    ) -> PermissionDecision {
        self.evaluate_at(member, command, overrides, Utc::now())
    }

    pub fn evaluate_at(
        &self,
        member: &MemberSnapshot,
        command: &str,
        overrides: &RoleOverrides,
        now: DateTime<Utc>,
    ) -> PermissionDecision {
        if member.is_bot {
            return PermissionDecision::deny(reasons::BOT_SUBJECT);
        }

        let Some(permission) = Self::command_permission(command) else {
            return PermissionDecision::deny(reasons::UNKNOWN_COMMAND);
        };

        if !self.meets_age_floor(member, now) {
            return PermissionDecision::deny(reasons::ACCOUNT_TOO_NEW);
        }

        match permission {
            CommandPermission::Anyone => PermissionDecision::allow(),
            CommandPermission::ManageServer | CommandPermission::ManageServerAndOwnership => {
                if member.has_manage_server {
                    PermissionDecision::allow()
                } else {
                    PermissionDecision::deny(reasons::MANAGE_SERVER_REQUIRED)
                }
            }
            CommandPermission::ManageServerOverridable => {
                if member.has_manage_server || overrides.grants(command, &member.roles) {
                    PermissionDecision::allow()
                } else {
                    PermissionDecision::deny(reasons::MANAGE_SERVER_REQUIRED)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{reasons, MemberSnapshot, PermissionEvaluator, RoleOverrides};
    use crate::domain::UserId;

    fn member(is_bot: bool, age_days: i64, has_manage_server: bool) -> MemberSnapshot {
        MemberSnapshot {
            user_id: UserId::from("U1"),
            is_bot,
            account_created_at: Utc::now() - Duration::days(age_days),
            roles: vec!["moderator".to_owned()],
            has_manage_server,
        }
    }

    #[test]
    fn bots_are_always_denied() {
        let evaluator = PermissionEvaluator::default();
        let decision = evaluator.evaluate(&member(true, 400, true), "help", &RoleOverrides::default());
        assert!(!decision.allowed);
        assert_eq!(decision.reason, reasons::BOT_SUBJECT);
    }

    #[test]
    fn account_age_exactly_at_floor_is_allowed() {
        let evaluator = PermissionEvaluator::default();
        let now = Utc::now();
        let member = MemberSnapshot {
            account_created_at: now - Duration::days(7),
            ..member(false, 0, false)
        };
        let decision = evaluator.evaluate_at(&member, "help", &RoleOverrides::default(), now);
        assert!(decision.allowed);
    }

    #[test]
    fn account_below_floor_is_denied() {
        let evaluator = PermissionEvaluator::default();
        let decision =
            evaluator.evaluate(&member(false, 6, true), "link-community", &RoleOverrides::default());
        assert!(!decision.allowed);
        assert_eq!(decision.reason, reasons::ACCOUNT_TOO_NEW);
    }

    #[test]
    fn link_requires_manage_server() {
        let evaluator = PermissionEvaluator::default();
        let denied =
            evaluator.evaluate(&member(false, 30, false), "link-community", &RoleOverrides::default());
        assert_eq!(denied.reason, reasons::MANAGE_SERVER_REQUIRED);

        let allowed =
            evaluator.evaluate(&member(false, 30, true), "link-community", &RoleOverrides::default());
        assert!(allowed.allowed);
    }

    #[test]
    fn read_only_commands_allow_everyone() {
        let evaluator = PermissionEvaluator::default();
        for command in ["list-tasks", "status", "help"] {
            let decision =
                evaluator.evaluate(&member(false, 30, false), command, &RoleOverrides::default());
            assert!(decision.allowed, "{command} should be open to all non-bots");
        }
    }

    #[test]
    fn role_override_grants_create_task_without_manage_server() {
        let evaluator = PermissionEvaluator::default();
        let overrides = RoleOverrides {
            create_task_roles: vec!["moderator".to_owned()],
            ..RoleOverrides::default()
        };

        let decision = evaluator.evaluate(&member(false, 30, false), "create-task", &overrides);
        assert!(decision.allowed);

        let decision =
            evaluator.evaluate(&member(false, 30, false), "connect-allowlist", &overrides);
        assert!(!decision.allowed, "override lists are per command");
    }

    #[test]
    fn unknown_commands_are_denied() {
        let evaluator = PermissionEvaluator::default();
        let decision =
            evaluator.evaluate(&member(false, 30, true), "nuke-everything", &RoleOverrides::default());
        assert_eq!(decision.reason, reasons::UNKNOWN_COMMAND);
    }
}
