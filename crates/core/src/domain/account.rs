use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{UserId, SCHEMA_VERSION};
use crate::seal::{SealError, SealedToken, TokenSealer};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentFlags {
    pub data_sharing: bool,
    pub data_sharing_at: Option<DateTime<Utc>>,
    pub notifications: bool,
    pub notifications_at: Option<DateTime<Utc>>,
}

impl Default for ConsentFlags {
    fn default() -> Self {
        Self { data_sharing: false, data_sharing_at: None, notifications: false, notifications_at: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    Unverified,
    Pending,
    Verified,
    Revoked,
}

/// Binds a chat user to a Platform account. OAuth token material is held
/// only in sealed form; plaintext is reachable exclusively through
/// [`UserAccountLink::with_decrypted_token`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccountLink {
    pub chat_user_id: UserId,
    pub platform_user_id: String,
    sealed_access_token: SealedToken,
    sealed_refresh_token: Option<SealedToken>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub consent: ConsentFlags,
    pub verification: VerificationState,
    pub linked_at: DateTime<Utc>,
    pub active: bool,
    pub commands_handled: u64,
    pub tasks_completed: u64,
    pub schema_version: i64,
}

impl UserAccountLink {
    pub fn new(
        chat_user_id: UserId,
        platform_user_id: impl Into<String>,
        sealer: &TokenSealer,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, SealError> {
        let sealed_access_token = sealer.seal(access_token)?;
        let sealed_refresh_token = refresh_token.map(|t| sealer.seal(t)).transpose()?;
        Ok(Self {
            chat_user_id,
            platform_user_id: platform_user_id.into(),
            sealed_access_token,
            sealed_refresh_token,
            token_expires_at,
            consent: ConsentFlags::default(),
            verification: VerificationState::Pending,
            linked_at: Utc::now(),
            active: true,
            commands_handled: 0,
            tasks_completed: 0,
            schema_version: SCHEMA_VERSION,
        })
    }

    /// Rehydrates a link from persisted sealed material.
    pub fn from_sealed(
        chat_user_id: UserId,
        platform_user_id: impl Into<String>,
        sealed_access_token: SealedToken,
        sealed_refresh_token: Option<SealedToken>,
    ) -> Self {
        Self {
            chat_user_id,
            platform_user_id: platform_user_id.into(),
            sealed_access_token,
            sealed_refresh_token,
            token_expires_at: None,
            consent: ConsentFlags::default(),
            verification: VerificationState::Pending,
            linked_at: Utc::now(),
            active: true,
            commands_handled: 0,
            tasks_completed: 0,
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn sealed_access_token(&self) -> &SealedToken {
        &self.sealed_access_token
    }

    pub fn sealed_refresh_token(&self) -> Option<&SealedToken> {
        self.sealed_refresh_token.as_ref()
    }

    /// Runs `f` over the decrypted access token. The plaintext lives only
    /// for the duration of the closure and is never returned or logged.
    pub fn with_decrypted_token<T, F>(&self, sealer: &TokenSealer, f: F) -> Result<T, SealError>
    where
        F: FnOnce(&str) -> T,
    {
        let plaintext = sealer.unseal(&self.sealed_access_token)?;
        Ok(f(&plaintext))
    }

    /// True once the token expiry has passed the refresh window.
    pub fn past_refresh_window(&self, now: DateTime<Utc>, refresh_window: chrono::Duration) -> bool {
        match self.token_expires_at {
            Some(expires_at) => now > expires_at + refresh_window,
            None => false,
        }
    }

    pub fn revoke(&mut self) {
        self.active = false;
        self.verification = VerificationState::Revoked;
    }
}
