use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Account, Credential, NewCredential, NewRecoveryRequest, RecoveryRequest};

use super::{AccountStore, CredentialStore, RecoveryStore};

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn generate_webauthn_handle() -> String {
        // 64 random bytes, the maximum user-handle size WebAuthn allows.
        let mut bytes = [0u8; 64];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn create_account(&self, email: &str) -> Result<Account> {
        let account = Account {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            webauthn_handle: Self::generate_webauthn_handle(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, webauthn_handle, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.email)
        .bind(&account.webauthn_handle)
        .bind(account.created_at)
        .execute(self.db.pool())
        .await?;

        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as("SELECT * FROM accounts WHERE email = ?")
            .bind(email)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(account)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Account>> {
        let account = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(account)
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn insert(&self, credential: NewCredential) -> Result<Credential> {
        let stored = Credential {
            id: Uuid::new_v4().to_string(),
            account_id: credential.account_id,
            external_id: credential.external_id,
            public_key: credential.public_key,
            sign_count: credential.sign_count,
            label: credential.label,
            last_used_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO passkeys (id, account_id, external_id, public_key, sign_count, label, last_used_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
            "#,
        )
        .bind(&stored.id)
        .bind(&stored.account_id)
        .bind(&stored.external_id)
        .bind(&stored.public_key)
        .bind(stored.sign_count)
        .bind(&stored.label)
        .bind(stored.created_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::CredentialExists
            } else {
                Error::Database(e)
            }
        })?;

        Ok(stored)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Credential>> {
        let credential = sqlx::query_as("SELECT * FROM passkeys WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(credential)
    }

    async fn list_for_account(&self, account_id: &str) -> Result<Vec<Credential>> {
        let credentials =
            sqlx::query_as("SELECT * FROM passkeys WHERE account_id = ? ORDER BY created_at")
                .bind(account_id)
                .fetch_all(self.db.pool())
                .await?;
        Ok(credentials)
    }

    async fn apply_assertion(
        &self,
        credential_id: &str,
        expected_sign_count: i64,
        new_sign_count: i64,
        used_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE passkeys
            SET sign_count = ?, last_used_at = ?
            WHERE id = ? AND sign_count = ?
            "#,
        )
        .bind(new_sign_count)
        .bind(used_at)
        .bind(credential_id)
        .bind(expected_sign_count)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, account_id: &str, credential_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM passkeys WHERE id = ? AND account_id = ?")
            .bind(credential_id)
            .bind(account_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RecoveryStore for SqliteStore {
    async fn insert(&self, request: NewRecoveryRequest) -> Result<RecoveryRequest> {
        let stored = RecoveryRequest {
            id: Uuid::new_v4().to_string(),
            account_id: request.account_id,
            token_digest: request.token_digest,
            expires_at: request.expires_at,
            used_at: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO recovery_requests (id, account_id, token_digest, expires_at, used_at, created_at)
            VALUES (?, ?, ?, ?, NULL, ?)
            "#,
        )
        .bind(&stored.id)
        .bind(&stored.account_id)
        .bind(&stored.token_digest)
        .bind(stored.expires_at)
        .bind(stored.created_at)
        .execute(self.db.pool())
        .await?;

        Ok(stored)
    }

    async fn find_by_digest(&self, token_digest: &str) -> Result<Option<RecoveryRequest>> {
        let request = sqlx::query_as("SELECT * FROM recovery_requests WHERE token_digest = ?")
            .bind(token_digest)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(request)
    }

    async fn consume_and_attach(
        &self,
        request_id: &str,
        credential: NewCredential,
    ) -> Result<Credential> {
        let mut tx = self.db.pool().begin().await?;
        let now = Utc::now();

        // Single atomic claim: the precondition is that nobody has consumed
        // the request yet.
        let claimed = sqlx::query(
            "UPDATE recovery_requests SET used_at = ? WHERE id = ? AND used_at IS NULL",
        )
        .bind(now)
        .bind(request_id)
        .execute(tx.as_mut())
        .await?;

        if claimed.rows_affected() != 1 {
            return Err(Error::TokenAlreadyUsed);
        }

        let stored = Credential {
            id: Uuid::new_v4().to_string(),
            account_id: credential.account_id,
            external_id: credential.external_id,
            public_key: credential.public_key,
            sign_count: credential.sign_count,
            label: credential.label,
            last_used_at: None,
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO passkeys (id, account_id, external_id, public_key, sign_count, label, last_used_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, NULL, ?)
            "#,
        )
        .bind(&stored.id)
        .bind(&stored.account_id)
        .bind(&stored.external_id)
        .bind(&stored.public_key)
        .bind(stored.sign_count)
        .bind(&stored.label)
        .bind(stored.created_at)
        .execute(tx.as_mut())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::CredentialExists
            } else {
                Error::Database(e)
            }
        })?;

        tx.commit().await?;

        Ok(stored)
    }
}
