use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskbridge_core::domain::allowlist::AllowlistSnapshot;
use taskbridge_core::domain::task::TaskSnapshot;

pub const COLOR_SUCCESS: u32 = 0x2e_cc71;
pub const COLOR_WARNING: u32 = 0xf3_9c12;
pub const COLOR_ERROR: u32 = 0xe7_4c3c;
pub const COLOR_INFO: u32 = 0x34_98db;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub fields: Vec<EmbedField>,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Danger,
    Link,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub label: String,
    pub style: ButtonStyle,
}

impl Button {
    pub fn action(custom_id: impl Into<String>, label: impl Into<String>, style: ButtonStyle) -> Self {
        Self { custom_id: Some(custom_id.into()), url: None, label: label.into(), style }
    }

    pub fn link(url: impl Into<String>, label: impl Into<String>) -> Self {
        Self { custom_id: None, url: Some(url.into()), label: label.into(), style: ButtonStyle::Link }
    }
}

/// One outbound interaction response or channel message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    pub buttons: Vec<Button>,
    pub ephemeral: bool,
}

impl ReplyPayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), embed: None, buttons: Vec::new(), ephemeral: false }
    }

    pub fn ephemeral_text(content: impl Into<String>) -> Self {
        Self { content: Some(content.into()), embed: None, buttons: Vec::new(), ephemeral: true }
    }
}

pub struct EmbedBuilder {
    title: String,
    description: String,
    fields: Vec<EmbedField>,
    color: u32,
    footer: Option<String>,
    buttons: Vec<Button>,
    ephemeral: bool,
}

impl EmbedBuilder {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
            color: COLOR_INFO,
            footer: None,
            buttons: Vec::new(),
            ephemeral: false,
        }
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField { name: name.into(), value: value.into(), inline });
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn button(mut self, button: Button) -> Self {
        self.buttons.push(button);
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn build(self) -> ReplyPayload {
        ReplyPayload {
            content: None,
            embed: Some(Embed {
                title: self.title,
                description: self.description,
                fields: self.fields,
                color: self.color,
                footer: self.footer,
            }),
            buttons: self.buttons,
            ephemeral: self.ephemeral,
        }
    }
}

fn seconds_up(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

pub fn rate_limited_message(retry_after: Duration) -> ReplyPayload {
    EmbedBuilder::new(
        "Slow Down",
        format!(
            "You're clicking too quickly. Try again in {} second(s).",
            seconds_up(retry_after)
        ),
    )
    .color(COLOR_WARNING)
    .ephemeral()
    .build()
}

pub fn cooldown_message(command: &str, remaining: Duration) -> ReplyPayload {
    EmbedBuilder::new(
        "Command Cooldown",
        format!("`/{command}` is on cooldown. Try again in {} second(s).", seconds_up(remaining)),
    )
    .color(COLOR_WARNING)
    .ephemeral()
    .build()
}

pub fn permission_denied_message(reason: &str) -> ReplyPayload {
    EmbedBuilder::new("Permission Denied", reason.to_owned())
        .color(COLOR_ERROR)
        .ephemeral()
        .build()
}

pub fn error_message(user_message: &str) -> ReplyPayload {
    EmbedBuilder::new("Something Went Wrong", user_message.to_owned())
        .color(COLOR_ERROR)
        .ephemeral()
        .build()
}

pub fn already_linked_message(community_id: &str) -> ReplyPayload {
    EmbedBuilder::new(
        "Server Already Linked",
        format!(
            "This server is already linked to community `{community_id}`. \
             Unlink it first, or relink to refresh the connection."
        ),
    )
    .color(COLOR_WARNING)
    .ephemeral()
    .button(Button::action("unlink_community", "Unlink", ButtonStyle::Danger))
    .button(Button::action("relink_community", "Relink", ButtonStyle::Secondary))
    .button(Button::action("link_community_help", "Help", ButtonStyle::Secondary))
    .build()
}

pub fn linked_message(community_name: &str, community_id: &str) -> ReplyPayload {
    EmbedBuilder::new(
        "Community Linked",
        format!("This server is now successfully linked to **{community_name}** (`{community_id}`)."),
    )
    .color(COLOR_SUCCESS)
    .ephemeral()
    .button(Button::action("test_connection", "Test Connection", ButtonStyle::Secondary))
    .button(Button::action("refresh_status", "Refresh Status", ButtonStyle::Secondary))
    .build()
}

/// The public message a task is posted (and kept up to date) as. Rendered
/// from the stored snapshot so the sync path produces identical output.
pub fn task_post_message(task_id: &str, snapshot: &TaskSnapshot, ends_at: DateTime<Utc>) -> ReplyPayload {
    EmbedBuilder::new(format!("📋 {}", snapshot.title), snapshot.description.clone())
        .color(COLOR_INFO)
        .field("Points", snapshot.points.to_string(), true)
        .field("Type", snapshot.kind.as_str().to_owned(), true)
        .field("Ends", ends_at.format("%Y-%m-%d %H:%M UTC").to_string(), true)
        .button(Button::action(format!("complete_task_{task_id}"), "Complete", ButtonStyle::Primary))
        .button(Button::action(format!("view_task_{task_id}"), "Details", ButtonStyle::Secondary))
        .build()
}

/// The public message an allowlist connection is posted as.
pub fn allowlist_message(
    allowlist_id: &str,
    snapshot: &AllowlistSnapshot,
    entry_count: usize,
) -> ReplyPayload {
    let ends = match snapshot.ends_at {
        Some(at) => at.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => "open-ended".to_owned(),
    };
    EmbedBuilder::new(format!("🎟️ {}", snapshot.title), format!("Prize: {}", snapshot.prize))
        .color(COLOR_INFO)
        .field("Winners", snapshot.winner_count.to_string(), true)
        .field("Entry Price", snapshot.entry_price.to_string(), true)
        .field("Ends", ends, true)
        .field("Entries", entry_count.to_string(), true)
        .button(Button::action(format!("enter_allowlist_{allowlist_id}"), "Enter", ButtonStyle::Primary))
        .button(Button::action(format!("view_allowlist_{allowlist_id}"), "Details", ButtonStyle::Secondary))
        .build()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{already_linked_message, cooldown_message, rate_limited_message, Button, ButtonStyle};

    #[test]
    fn rate_limit_message_rounds_partial_seconds_up() {
        let payload = rate_limited_message(Duration::from_millis(1_500));
        let embed = payload.embed.expect("embed");
        assert!(embed.description.contains("2 second(s)"));
        assert!(embed.description.contains("clicking too quickly"));
        assert!(payload.ephemeral);
    }

    #[test]
    fn cooldown_message_names_the_command() {
        let payload = cooldown_message("link-community", Duration::from_secs(20));
        let embed = payload.embed.expect("embed");
        assert!(embed.description.contains("/link-community"));
        assert!(embed.description.contains("20 second(s)"));
    }

    #[test]
    fn already_linked_embed_offers_unlink_and_relink() {
        let payload = already_linked_message("C1");
        let embed = payload.embed.as_ref().expect("embed");
        assert_eq!(embed.title, "Server Already Linked");
        let ids: Vec<_> = payload.buttons.iter().filter_map(|b| b.custom_id.as_deref()).collect();
        assert!(ids.contains(&"unlink_community"));
        assert!(ids.contains(&"relink_community"));
    }

    #[test]
    fn link_buttons_carry_urls_not_custom_ids() {
        let button = Button::link("https://example.community", "Open Website");
        assert_eq!(button.style, ButtonStyle::Link);
        assert!(button.custom_id.is_none());
        assert_eq!(button.url.as_deref(), Some("https://example.community"));
    }
}
