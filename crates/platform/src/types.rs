use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskbridge_core::domain::task::TaskKind;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub member_count: u64,
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub community_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub description: String,
    pub points: u32,
    pub requirements: serde_json::Value,
    pub duration_hours: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlatformTask {
    pub id: String,
    pub community_id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub description: String,
    pub points: u32,
    #[serde(default)]
    pub requirements: serde_json::Value,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub task_id: String,
    pub user_id: String,
    #[serde(default)]
    pub points_awarded: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllowlistInfo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub prize: String,
    #[serde(default)]
    pub winner_count: u32,
    #[serde(default)]
    pub entry_price: u32,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryReceipt {
    pub allowlist_id: String,
    pub user_id: String,
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}
