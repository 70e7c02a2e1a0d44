use chrono::{DateTime, Utc};
use sqlx::Row;

use taskbridge_core::domain::account::{ConsentFlags, UserAccountLink, VerificationState};
use taskbridge_core::domain::UserId;
use taskbridge_core::seal::SealedToken;

use super::server_link::parse_ts;
use super::{RepositoryError, UserLinkRepository};
use crate::DbPool;

pub struct SqlUserLinkRepository {
    pool: DbPool,
}

impl SqlUserLinkRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_verification(value: &str) -> VerificationState {
    match value {
        "verified" => VerificationState::Verified,
        "pending" => VerificationState::Pending,
        "revoked" => VerificationState::Revoked,
        _ => VerificationState::Unverified,
    }
}

pub fn verification_as_str(state: &VerificationState) -> &'static str {
    match state {
        VerificationState::Unverified => "unverified",
        VerificationState::Pending => "pending",
        VerificationState::Verified => "verified",
        VerificationState::Revoked => "revoked",
    }
}

fn blob_to_nonce(blob: Vec<u8>) -> Result<[u8; 12], RepositoryError> {
    blob.try_into().map_err(|_| RepositoryError::Decode("nonce must be 12 bytes".to_owned()))
}

fn row_to_user_link(row: &sqlx::sqlite::SqliteRow) -> Result<UserAccountLink, RepositoryError> {
    let chat_user_id: String =
        row.try_get("chat_user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let platform_user_id: String =
        row.try_get("platform_user_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let access_ciphertext: Vec<u8> =
        row.try_get("access_ciphertext").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let access_nonce: Vec<u8> =
        row.try_get("access_nonce").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let refresh_ciphertext: Option<Vec<u8>> =
        row.try_get("refresh_ciphertext").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let refresh_nonce: Option<Vec<u8>> =
        row.try_get("refresh_nonce").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let token_expires_at: Option<String> =
        row.try_get("token_expires_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let consent: String =
        row.try_get("consent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let verification: String =
        row.try_get("verification").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let linked_at: String =
        row.try_get("linked_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active: i64 = row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let commands_handled: i64 =
        row.try_get("commands_handled").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tasks_completed: i64 =
        row.try_get("tasks_completed").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let schema_version: i64 =
        row.try_get("schema_version").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let sealed_access = SealedToken::from_parts(access_ciphertext, blob_to_nonce(access_nonce)?);
    let sealed_refresh = match (refresh_ciphertext, refresh_nonce) {
        (Some(ciphertext), Some(nonce)) => {
            Some(SealedToken::from_parts(ciphertext, blob_to_nonce(nonce)?))
        }
        _ => None,
    };
    let consent: ConsentFlags =
        serde_json::from_str(&consent).map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let mut link = UserAccountLink::from_sealed(
        UserId(chat_user_id),
        platform_user_id,
        sealed_access,
        sealed_refresh,
    );
    link.token_expires_at = token_expires_at.as_deref().map(parse_ts);
    link.consent = consent;
    link.verification = parse_verification(&verification);
    link.linked_at = parse_ts(&linked_at);
    link.active = active != 0;
    link.commands_handled = commands_handled.max(0) as u64;
    link.tasks_completed = tasks_completed.max(0) as u64;
    link.schema_version = schema_version;

    Ok(link)
}

const USER_LINK_COLUMNS: &str =
    "chat_user_id, platform_user_id, access_ciphertext, access_nonce, refresh_ciphertext,
     refresh_nonce, token_expires_at, consent, verification, linked_at, active,
     commands_handled, tasks_completed, schema_version";

#[async_trait::async_trait]
impl UserLinkRepository for SqlUserLinkRepository {
    async fn create(&self, link: &UserAccountLink) -> Result<(), RepositoryError> {
        let consent = serde_json::to_string(&link.consent)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let refresh = link.sealed_refresh_token();

        sqlx::query(
            "INSERT INTO user_links (chat_user_id, platform_user_id, access_ciphertext,
                                     access_nonce, refresh_ciphertext, refresh_nonce,
                                     token_expires_at, consent, verification, linked_at,
                                     active, commands_handled, tasks_completed, schema_version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(link.chat_user_id.as_str())
        .bind(&link.platform_user_id)
        .bind(link.sealed_access_token().ciphertext())
        .bind(&link.sealed_access_token().nonce()[..])
        .bind(refresh.map(|t| t.ciphertext().to_vec()))
        .bind(refresh.map(|t| t.nonce().to_vec()))
        .bind(link.token_expires_at.map(|dt| dt.to_rfc3339()))
        .bind(&consent)
        .bind(verification_as_str(&link.verification))
        .bind(link.linked_at.to_rfc3339())
        .bind(link.active as i64)
        .bind(link.commands_handled as i64)
        .bind(link.tasks_completed as i64)
        .bind(link.schema_version)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "an active account link already exists"))?;

        Ok(())
    }

    async fn find_active_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserAccountLink>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_LINK_COLUMNS} FROM user_links WHERE chat_user_id = ? AND active = 1"
        ))
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_user_link(r)?)),
            None => Ok(None),
        }
    }

    async fn deactivate_prior(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("UPDATE user_links SET active = 0 WHERE chat_user_id = ? AND active = 1")
                .bind(user_id.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn update(&self, link: &UserAccountLink) -> Result<(), RepositoryError> {
        let consent = serde_json::to_string(&link.consent)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let refresh = link.sealed_refresh_token();

        sqlx::query(
            "UPDATE user_links
             SET platform_user_id = ?, access_ciphertext = ?, access_nonce = ?,
                 refresh_ciphertext = ?, refresh_nonce = ?, token_expires_at = ?, consent = ?,
                 verification = ?, active = ?, commands_handled = ?, tasks_completed = ?,
                 schema_version = ?
             WHERE chat_user_id = ? AND linked_at = ?",
        )
        .bind(&link.platform_user_id)
        .bind(link.sealed_access_token().ciphertext())
        .bind(&link.sealed_access_token().nonce()[..])
        .bind(refresh.map(|t| t.ciphertext().to_vec()))
        .bind(refresh.map(|t| t.nonce().to_vec()))
        .bind(link.token_expires_at.map(|dt| dt.to_rfc3339()))
        .bind(&consent)
        .bind(verification_as_str(&link.verification))
        .bind(link.active as i64)
        .bind(link.commands_handled as i64)
        .bind(link.tasks_completed as i64)
        .bind(link.schema_version)
        .bind(link.chat_user_id.as_str())
        .bind(link.linked_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deactivate_expired_unverified(
        &self,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE user_links
             SET active = 0, verification = 'revoked'
             WHERE active = 1 AND verification != 'verified'
               AND token_expires_at IS NOT NULL AND token_expires_at < ?",
        )
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use taskbridge_core::seal::TokenSealer;

    use super::*;
    use crate::connect_with_settings;
    use crate::migrations::run_pending;

    async fn repo() -> SqlUserLinkRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        SqlUserLinkRepository::new(pool)
    }

    fn sealer() -> TokenSealer {
        TokenSealer::from_key_material(&[9u8; 32])
    }

    fn account(user: &str, expires_at: Option<DateTime<Utc>>) -> UserAccountLink {
        UserAccountLink::new(
            UserId::from(user),
            "platform-1",
            &sealer(),
            "the-access-token",
            Some("the-refresh-token"),
            expires_at,
        )
        .expect("seal")
    }

    #[tokio::test]
    async fn tokens_survive_persistence_sealed() {
        let repo = repo().await;
        repo.create(&account("U1", None)).await.expect("create");

        let found = repo
            .find_active_by_user(&UserId::from("U1"))
            .await
            .expect("find")
            .expect("present");

        assert_ne!(found.sealed_access_token().ciphertext(), b"the-access-token");
        let plaintext = found
            .with_decrypted_token(&sealer(), |t| t.to_owned())
            .expect("unseal");
        assert_eq!(plaintext, "the-access-token");
    }

    #[tokio::test]
    async fn duplicate_active_user_link_conflicts() {
        let repo = repo().await;
        repo.create(&account("U1", None)).await.expect("create");
        let error = repo.create(&account("U1", None)).await.expect_err("should conflict");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn deactivate_prior_then_create_relinks() {
        let repo = repo().await;
        repo.create(&account("U1", None)).await.expect("create");
        repo.deactivate_prior(&UserId::from("U1")).await.expect("deactivate");
        repo.create(&account("U1", None)).await.expect("relink");
    }

    #[tokio::test]
    async fn expired_unverified_tokens_are_cleared() {
        let repo = repo().await;
        let now = Utc::now();

        repo.create(&account("U1", Some(now - Duration::hours(1)))).await.expect("create");
        let mut verified = account("U2", Some(now - Duration::hours(1)));
        verified.verification = VerificationState::Verified;
        repo.create(&verified).await.expect("create verified");
        repo.create(&account("U3", Some(now + Duration::hours(1)))).await.expect("create fresh");

        let cleared = repo.deactivate_expired_unverified(now).await.expect("clear");
        assert_eq!(cleared, 1);

        assert!(repo.find_active_by_user(&UserId::from("U1")).await.expect("find").is_none());
        assert!(repo.find_active_by_user(&UserId::from("U2")).await.expect("find").is_some());
        assert!(repo.find_active_by_user(&UserId::from("U3")).await.expect("find").is_some());
    }
}
