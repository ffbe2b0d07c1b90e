//! Record-store interfaces the engine consumes.
//!
//! The protocol engine only requires find-by-unique-field, create, and
//! atomic conditional update; anything beyond that lives with the backend.
//! Two implementations ship with the crate: [`SqliteStore`] and the
//! test-oriented [`MemoryStore`].

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Account, Credential, NewCredential, NewRecoveryRequest, RecoveryRequest};
use crate::webauthn::CredentialSource;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_account(&self, email: &str) -> Result<Account>;
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Account>>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a credential. Fails with [`crate::Error::CredentialExists`]
    /// when the external id is already registered.
    async fn insert(&self, credential: NewCredential) -> Result<Credential>;

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Credential>>;

    async fn list_for_account(&self, account_id: &str) -> Result<Vec<Credential>>;

    /// Persist the result of a successful assertion: advance `sign_count`
    /// and stamp `last_used_at`, but only if the stored counter still equals
    /// `expected_sign_count`. Returns false when another attempt won the
    /// race; the caller must then fail the authentication.
    async fn apply_assertion(
        &self,
        credential_id: &str,
        expected_sign_count: i64,
        new_sign_count: i64,
        used_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete a credential owned by `account_id`. Returns false when no such
    /// credential exists.
    async fn delete(&self, account_id: &str, credential_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait RecoveryStore: Send + Sync {
    async fn insert(&self, request: NewRecoveryRequest) -> Result<RecoveryRequest>;

    async fn find_by_digest(&self, token_digest: &str) -> Result<Option<RecoveryRequest>>;

    /// Atomically claim the request (`used_at` must still be null) and
    /// attach the new credential, as one transaction. Fails with
    /// [`crate::Error::TokenAlreadyUsed`] when the claim loses, leaving no
    /// credential behind.
    async fn consume_and_attach(
        &self,
        request_id: &str,
        credential: NewCredential,
    ) -> Result<Credential>;
}

/// Any credential store can back assertion verification directly.
#[async_trait]
impl<S> CredentialSource for S
where
    S: CredentialStore + ?Sized,
{
    async fn lookup(&self, raw_credential_id: &[u8]) -> Result<Option<Credential>> {
        let external_id = URL_SAFE_NO_PAD.encode(raw_credential_id);
        self.find_by_external_id(&external_id).await
    }
}
