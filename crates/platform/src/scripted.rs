use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use taskbridge_core::domain::{AllowlistId, CommunityId, TaskId};

use crate::client::PlatformApi;
use crate::error::PlatformError;
use crate::types::{
    AllowlistInfo, Community, EntryReceipt, NewTask, NotificationPayload, PlatformTask,
    TaskCompletion,
};

/// In-process stand-in for the Platform API. Replies are scripted per method
/// and consumed front to back; an unscripted call fails with a decode error
/// naming the method so the test that forgot it fails loudly.
#[derive(Default)]
pub struct ScriptedPlatform {
    state: Mutex<ScriptedState>,
}

#[derive(Default)]
struct ScriptedState {
    auth_results: VecDeque<Result<(), PlatformError>>,
    ownership_results: VecDeque<Result<bool, PlatformError>>,
    communities: VecDeque<Result<Community, PlatformError>>,
    notify_results: VecDeque<Result<(), PlatformError>>,
    task_lists: VecDeque<Result<Vec<PlatformTask>, PlatformError>>,
    created_tasks: VecDeque<Result<PlatformTask, PlatformError>>,
    tasks: VecDeque<Result<PlatformTask, PlatformError>>,
    completions: VecDeque<Result<TaskCompletion, PlatformError>>,
    allowlists: VecDeque<Result<AllowlistInfo, PlatformError>>,
    entries: VecDeque<Result<EntryReceipt, PlatformError>>,
    calls: Vec<String>,
    notifications: Vec<NotificationPayload>,
    created_requests: Vec<NewTask>,
}

fn unscripted<T>(method: &str) -> Result<T, PlatformError> {
    Err(PlatformError::Decode {
        endpoint: method.to_owned(),
        message: format!("no scripted reply for {method}"),
    })
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn script_auth(&self, result: Result<(), PlatformError>) {
        self.state.lock().await.auth_results.push_back(result);
    }

    pub async fn script_ownership(&self, result: Result<bool, PlatformError>) {
        self.state.lock().await.ownership_results.push_back(result);
    }

    pub async fn script_community(&self, result: Result<Community, PlatformError>) {
        self.state.lock().await.communities.push_back(result);
    }

    pub async fn script_notify(&self, result: Result<(), PlatformError>) {
        self.state.lock().await.notify_results.push_back(result);
    }

    pub async fn script_task_list(&self, result: Result<Vec<PlatformTask>, PlatformError>) {
        self.state.lock().await.task_lists.push_back(result);
    }

    pub async fn script_created_task(&self, result: Result<PlatformTask, PlatformError>) {
        self.state.lock().await.created_tasks.push_back(result);
    }

    pub async fn script_task(&self, result: Result<PlatformTask, PlatformError>) {
        self.state.lock().await.tasks.push_back(result);
    }

    pub async fn script_completion(&self, result: Result<TaskCompletion, PlatformError>) {
        self.state.lock().await.completions.push_back(result);
    }

    pub async fn script_allowlist(&self, result: Result<AllowlistInfo, PlatformError>) {
        self.state.lock().await.allowlists.push_back(result);
    }

    pub async fn script_entry(&self, result: Result<EntryReceipt, PlatformError>) {
        self.state.lock().await.entries.push_back(result);
    }

    /// Method names in invocation order, with the primary argument appended.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn notifications(&self) -> Vec<NotificationPayload> {
        self.state.lock().await.notifications.clone()
    }

    pub async fn created_requests(&self) -> Vec<NewTask> {
        self.state.lock().await.created_requests.clone()
    }
}

#[async_trait]
impl PlatformApi for ScriptedPlatform {
    async fn validate_auth(&self) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push("validate_auth".to_owned());
        state.auth_results.pop_front().unwrap_or(Ok(()))
    }

    async fn validate_ownership(
        &self,
        community_id: &CommunityId,
        platform_user_id: &str,
    ) -> Result<bool, PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("validate_ownership {community_id} {platform_user_id}"));
        state.ownership_results.pop_front().unwrap_or(Ok(true))
    }

    async fn get_community(&self, community_id: &CommunityId) -> Result<Community, PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("get_community {community_id}"));
        state.communities.pop_front().unwrap_or_else(|| unscripted("get_community"))
    }

    async fn notify(
        &self,
        community_id: &CommunityId,
        payload: &NotificationPayload,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("notify {community_id}"));
        state.notifications.push(payload.clone());
        state.notify_results.pop_front().unwrap_or(Ok(()))
    }

    async fn list_tasks(
        &self,
        community_id: &CommunityId,
    ) -> Result<Vec<PlatformTask>, PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("list_tasks {community_id}"));
        state.task_lists.pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn create_task(&self, task: &NewTask) -> Result<PlatformTask, PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("create_task {}", task.title));
        state.created_requests.push(task.clone());
        state.created_tasks.pop_front().unwrap_or_else(|| unscripted("create_task"))
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<PlatformTask, PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("get_task {task_id}"));
        state.tasks.pop_front().unwrap_or_else(|| unscripted("get_task"))
    }

    async fn complete_task(
        &self,
        task_id: &TaskId,
        platform_user_id: &str,
    ) -> Result<TaskCompletion, PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("complete_task {task_id} {platform_user_id}"));
        state.completions.pop_front().unwrap_or_else(|| unscripted("complete_task"))
    }

    async fn get_allowlist(
        &self,
        allowlist_id: &AllowlistId,
    ) -> Result<AllowlistInfo, PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("get_allowlist {allowlist_id}"));
        state.allowlists.pop_front().unwrap_or_else(|| unscripted("get_allowlist"))
    }

    async fn enter_allowlist(
        &self,
        allowlist_id: &AllowlistId,
        platform_user_id: &str,
    ) -> Result<EntryReceipt, PlatformError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("enter_allowlist {allowlist_id} {platform_user_id}"));
        state.entries.pop_front().unwrap_or_else(|| unscripted("enter_allowlist"))
    }
}
