use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use taskbridge_core::config::PlatformConfig;
use taskbridge_core::domain::{AllowlistId, CommunityId, TaskId};

use crate::error::PlatformError;
use crate::types::{
    AllowlistInfo, Community, EntryReceipt, NewTask, NotificationPayload, PlatformTask,
    TaskCompletion,
};

/// Outbound surface of the Platform HTTP API. Handlers depend on this trait
/// so tests can script responses without a network.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn validate_auth(&self) -> Result<(), PlatformError>;
    async fn validate_ownership(
        &self,
        community_id: &CommunityId,
        platform_user_id: &str,
    ) -> Result<bool, PlatformError>;
    async fn get_community(&self, community_id: &CommunityId) -> Result<Community, PlatformError>;
    async fn notify(
        &self,
        community_id: &CommunityId,
        payload: &NotificationPayload,
    ) -> Result<(), PlatformError>;
    async fn list_tasks(
        &self,
        community_id: &CommunityId,
    ) -> Result<Vec<PlatformTask>, PlatformError>;
    async fn create_task(&self, task: &NewTask) -> Result<PlatformTask, PlatformError>;
    async fn get_task(&self, task_id: &TaskId) -> Result<PlatformTask, PlatformError>;
    async fn complete_task(
        &self,
        task_id: &TaskId,
        platform_user_id: &str,
    ) -> Result<TaskCompletion, PlatformError>;
    async fn get_allowlist(
        &self,
        allowlist_id: &AllowlistId,
    ) -> Result<AllowlistInfo, PlatformError>;
    async fn enter_allowlist(
        &self,
        allowlist_id: &AllowlistId,
        platform_user_id: &str,
    ) -> Result<EntryReceipt, PlatformError>;
}

#[derive(Serialize)]
struct UserRef<'a> {
    user_id: &'a str,
}

#[derive(Deserialize)]
struct OwnershipVerdict {
    #[serde(default)]
    valid: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

pub struct PlatformClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl PlatformClient {
    pub fn new(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|source| PlatformError::Transport {
                endpoint: "<client setup>".to_owned(),
                source,
            })?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let request = self.http.get(self.url(path)).bearer_auth(self.api_key.expose_secret());
        self.execute(path, request).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, PlatformError> {
        let request = self
            .http
            .post(self.url(path))
            .bearer_auth(self.api_key.expose_secret())
            .json(body);
        self.execute(path, request).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PlatformError> {
        let response = request.send().await.map_err(|source| PlatformError::Transport {
            endpoint: path.to_owned(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .filter(|parsed| !parsed.message.is_empty())
                .map(|parsed| parsed.message)
                .unwrap_or(body);
            debug!(
                event_name = "platform_request_failed",
                endpoint = path,
                status = status.as_u16(),
                "Platform returned a non-success status"
            );
            return Err(PlatformError::Status {
                endpoint: path.to_owned(),
                status: status.as_u16(),
                message,
            });
        }

        response.json::<T>().await.map_err(|source| PlatformError::Decode {
            endpoint: path.to_owned(),
            message: source.to_string(),
        })
    }
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn validate_auth(&self) -> Result<(), PlatformError> {
        let _: serde_json::Value = self.post_json("/auth/validate", &serde_json::json!({})).await?;
        Ok(())
    }

    async fn validate_ownership(
        &self,
        community_id: &CommunityId,
        platform_user_id: &str,
    ) -> Result<bool, PlatformError> {
        let path = format!("/communities/{community_id}/validate-ownership");
        let verdict: OwnershipVerdict =
            self.post_json(&path, &UserRef { user_id: platform_user_id }).await?;
        Ok(verdict.valid)
    }

    async fn get_community(&self, community_id: &CommunityId) -> Result<Community, PlatformError> {
        self.get_json(&format!("/communities/{community_id}")).await
    }

    async fn notify(
        &self,
        community_id: &CommunityId,
        payload: &NotificationPayload,
    ) -> Result<(), PlatformError> {
        let path = format!("/communities/{community_id}/notifications");
        let _: serde_json::Value = self.post_json(&path, payload).await?;
        Ok(())
    }

    async fn list_tasks(
        &self,
        community_id: &CommunityId,
    ) -> Result<Vec<PlatformTask>, PlatformError> {
        self.get_json(&format!("/social-tasks?community_id={community_id}")).await
    }

    async fn create_task(&self, task: &NewTask) -> Result<PlatformTask, PlatformError> {
        self.post_json("/social-tasks", task).await
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<PlatformTask, PlatformError> {
        self.get_json(&format!("/social-tasks/{task_id}")).await
    }

    async fn complete_task(
        &self,
        task_id: &TaskId,
        platform_user_id: &str,
    ) -> Result<TaskCompletion, PlatformError> {
        let path = format!("/social-tasks/{task_id}/complete");
        self.post_json(&path, &UserRef { user_id: platform_user_id }).await
    }

    async fn get_allowlist(
        &self,
        allowlist_id: &AllowlistId,
    ) -> Result<AllowlistInfo, PlatformError> {
        self.get_json(&format!("/allowlists/{allowlist_id}")).await
    }

    async fn enter_allowlist(
        &self,
        allowlist_id: &AllowlistId,
        platform_user_id: &str,
    ) -> Result<EntryReceipt, PlatformError> {
        let path = format!("/allowlists/{allowlist_id}/enter");
        self.post_json(&path, &UserRef { user_id: platform_user_id }).await
    }
}
