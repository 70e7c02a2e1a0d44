use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use taskbridge_core::domain::{AllowlistId, TaskId};
use taskbridge_core::EventCategory;

use crate::handlers::InteractionHandler;

pub const MAX_ID_OPTION_LEN: usize = 50;

/// Parsed component custom id. Buttons follow a `verb_noun_<id>` scheme
/// plus a fixed set of linking and help actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    CompleteTask(TaskId),
    ViewTask(TaskId),
    EnterAllowlist(AllowlistId),
    ViewAllowlist(AllowlistId),
    UnlinkCommunity,
    RelinkCommunity,
    TestConnection,
    RefreshStatus,
    LinkCommunityHelp,
    HelpCommands,
    HelpSetup,
}

impl ButtonAction {
    pub fn parse(custom_id: &str) -> Option<Self> {
        match custom_id {
            "unlink_community" => return Some(Self::UnlinkCommunity),
            "relink_community" => return Some(Self::RelinkCommunity),
            "test_connection" => return Some(Self::TestConnection),
            "refresh_status" => return Some(Self::RefreshStatus),
            "link_community_help" => return Some(Self::LinkCommunityHelp),
            "help_commands" => return Some(Self::HelpCommands),
            "help_setup" => return Some(Self::HelpSetup),
            _ => {}
        }

        // Nouns may themselves contain underscores, so match verbs by prefix.
        if let Some(id) = non_empty_suffix(custom_id, "complete_task_") {
            return Some(Self::CompleteTask(TaskId::from(id)));
        }
        if let Some(id) = non_empty_suffix(custom_id, "view_task_") {
            return Some(Self::ViewTask(TaskId::from(id)));
        }
        if let Some(id) = non_empty_suffix(custom_id, "enter_allowlist_") {
            return Some(Self::EnterAllowlist(AllowlistId::from(id)));
        }
        if let Some(id) = non_empty_suffix(custom_id, "view_allowlist_") {
            return Some(Self::ViewAllowlist(AllowlistId::from(id)));
        }
        None
    }

    /// Registry key for the action; the noun becomes a handler argument.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::CompleteTask(_) => "complete_task",
            Self::ViewTask(_) => "view_task",
            Self::EnterAllowlist(_) => "enter_allowlist",
            Self::ViewAllowlist(_) => "view_allowlist",
            Self::UnlinkCommunity => "unlink_community",
            Self::RelinkCommunity => "relink_community",
            Self::TestConnection => "test_connection",
            Self::RefreshStatus => "refresh_status",
            Self::LinkCommunityHelp => "link_community_help",
            Self::HelpCommands => "help_commands",
            Self::HelpSetup => "help_setup",
        }
    }
}

fn non_empty_suffix<'a>(custom_id: &'a str, prefix: &str) -> Option<&'a str> {
    custom_id.strip_prefix(prefix).filter(|id| !id.is_empty())
}

/// Routing key for one event: the command name, button verb, or modal id.
pub fn route_key(category: EventCategory, name: &str) -> Option<String> {
    match category {
        EventCategory::Command | EventCategory::Modal => Some(name.to_owned()),
        EventCategory::Button | EventCategory::Menu => {
            ButtonAction::parse(name).map(|action| action.verb().to_owned())
        }
    }
}

/// Maps an event to the command-surface name the permission evaluator
/// understands. Component actions inherit the permission of the closest
/// command: entry and view buttons are open like `list-tasks`, link
/// management buttons require what the link commands require.
pub fn permission_surface(category: EventCategory, name: &str) -> Option<&'static str> {
    match category {
        EventCategory::Command => match name {
            "link-community" => Some("link-community"),
            "create-task" => Some("create-task"),
            "list-tasks" => Some("list-tasks"),
            "connect-allowlist" => Some("connect-allowlist"),
            "status" => Some("status"),
            "help" => Some("help"),
            "allowlist-analytics" => Some("allowlist-analytics"),
            "security" => Some("security"),
            _ => None,
        },
        EventCategory::Modal => match name {
            "create_task_modal" => Some("create-task"),
            _ => None,
        },
        EventCategory::Button | EventCategory::Menu => {
            let action = ButtonAction::parse(name)?;
            Some(match action {
                ButtonAction::UnlinkCommunity => "unlink-community",
                ButtonAction::RelinkCommunity => "relink-community",
                ButtonAction::CompleteTask(_)
                | ButtonAction::ViewTask(_)
                | ButtonAction::EnterAllowlist(_)
                | ButtonAction::ViewAllowlist(_) => "list-tasks",
                ButtonAction::TestConnection | ButtonAction::RefreshStatus => "status",
                ButtonAction::LinkCommunityHelp
                | ButtonAction::HelpCommands
                | ButtonAction::HelpSetup => "help",
            })
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OptionError {
    #[error("option `{0}` is required")]
    Missing(String),
    #[error("option `{name}` must be at most {max} characters")]
    TooLong { name: String, max: usize },
    #[error("option `{name}` is not a valid number")]
    NotANumber { name: String },
    #[error("option `{name}` has unsupported value `{value}`")]
    Unsupported { name: String, value: String },
}

/// Typed access to slash-command options and modal fields.
pub struct CommandOptions<'a> {
    values: &'a HashMap<String, String>,
}

impl<'a> CommandOptions<'a> {
    pub fn new(values: &'a HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.values.get(name).map(String::as_str).filter(|value| !value.is_empty())
    }

    pub fn require(&self, name: &str) -> Result<&'a str, OptionError> {
        self.get(name).ok_or_else(|| OptionError::Missing(name.to_owned()))
    }

    pub fn require_id(&self, name: &str) -> Result<&'a str, OptionError> {
        let value = self.require(name)?;
        if value.chars().count() > MAX_ID_OPTION_LEN {
            return Err(OptionError::TooLong { name: name.to_owned(), max: MAX_ID_OPTION_LEN });
        }
        Ok(value)
    }

    pub fn u32_value(&self, name: &str) -> Result<u32, OptionError> {
        self.require(name)?
            .parse()
            .map_err(|_| OptionError::NotANumber { name: name.to_owned() })
    }

    pub fn i64_opt(&self, name: &str) -> Result<Option<i64>, OptionError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| OptionError::NotANumber { name: name.to_owned() }),
        }
    }
}

/// Handler registry keyed by (category, verb). Wiring happens in the
/// composition root; the pipeline only resolves.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(EventCategory, String), Arc<dyn InteractionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        category: EventCategory,
        verb: impl Into<String>,
        handler: Arc<dyn InteractionHandler>,
    ) {
        self.handlers.insert((category, verb.into()), handler);
    }

    pub fn resolve(
        &self,
        category: EventCategory,
        name: &str,
    ) -> Option<Arc<dyn InteractionHandler>> {
        let key = route_key(category, name)?;
        self.handlers.get(&(category, key)).cloned()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use taskbridge_core::domain::{AllowlistId, TaskId};
    use taskbridge_core::EventCategory;

    use super::{permission_surface, route_key, ButtonAction, CommandOptions, OptionError};

    #[test]
    fn parses_noun_carrying_custom_ids() {
        assert_eq!(
            ButtonAction::parse("complete_task_T123"),
            Some(ButtonAction::CompleteTask(TaskId::from("T123")))
        );
        assert_eq!(
            ButtonAction::parse("enter_allowlist_A9"),
            Some(ButtonAction::EnterAllowlist(AllowlistId::from("A9")))
        );
        assert_eq!(
            ButtonAction::parse("view_allowlist_A_1"),
            Some(ButtonAction::ViewAllowlist(AllowlistId::from("A_1")))
        );
    }

    #[test]
    fn parses_fixed_custom_ids() {
        assert_eq!(ButtonAction::parse("unlink_community"), Some(ButtonAction::UnlinkCommunity));
        assert_eq!(ButtonAction::parse("refresh_status"), Some(ButtonAction::RefreshStatus));
        assert_eq!(ButtonAction::parse("help_setup"), Some(ButtonAction::HelpSetup));
    }

    #[test]
    fn rejects_unknown_and_empty_noun_ids() {
        assert_eq!(ButtonAction::parse("launch_rocket_T1"), None);
        assert_eq!(ButtonAction::parse("complete_task_"), None);
        assert_eq!(ButtonAction::parse("nonsense"), None);
    }

    #[test]
    fn route_key_strips_the_noun() {
        assert_eq!(
            route_key(EventCategory::Button, "view_task_T5").as_deref(),
            Some("view_task")
        );
        assert_eq!(
            route_key(EventCategory::Command, "list-tasks").as_deref(),
            Some("list-tasks")
        );
    }

    #[test]
    fn component_permissions_inherit_from_commands() {
        assert_eq!(
            permission_surface(EventCategory::Button, "unlink_community"),
            Some("unlink-community")
        );
        assert_eq!(
            permission_surface(EventCategory::Button, "enter_allowlist_A1"),
            Some("list-tasks")
        );
        assert_eq!(
            permission_surface(EventCategory::Modal, "create_task_modal"),
            Some("create-task")
        );
        assert_eq!(permission_surface(EventCategory::Command, "unknown"), None);
    }

    #[test]
    fn id_options_enforce_the_length_cap() {
        let mut values = HashMap::new();
        values.insert("community_id".to_owned(), "C".repeat(51));
        let options = CommandOptions::new(&values);
        assert!(matches!(
            options.require_id("community_id"),
            Err(OptionError::TooLong { max: 50, .. })
        ));

        values.insert("community_id".to_owned(), "C1".to_owned());
        let options = CommandOptions::new(&values);
        assert_eq!(options.require_id("community_id"), Ok("C1"));
    }

    #[test]
    fn missing_and_malformed_options_are_named() {
        let values = HashMap::new();
        let options = CommandOptions::new(&values);
        assert!(matches!(options.require("title"), Err(OptionError::Missing(_))));

        let mut values = HashMap::new();
        values.insert("points".to_owned(), "lots".to_owned());
        let options = CommandOptions::new(&values);
        assert!(matches!(options.u32_value("points"), Err(OptionError::NotANumber { .. })));
    }
}
