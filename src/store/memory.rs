use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Account, Credential, NewCredential, NewRecoveryRequest, RecoveryRequest};

use super::{AccountStore, CredentialStore, RecoveryStore};

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    credentials: HashMap<String, Credential>,
    recovery_requests: HashMap<String, RecoveryRequest>,
}

/// In-memory record store with the same conditional-update semantics as the
/// SQLite backend. Intended for tests and ephemeral embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct insertion of a recovery request, letting tests back-date
    /// `expires_at` without a clock abstraction.
    pub fn insert_recovery_request_raw(&self, request: RecoveryRequest) {
        self.inner
            .lock()
            .unwrap()
            .recovery_requests
            .insert(request.id.clone(), request);
    }

    pub fn get_recovery_request(&self, id: &str) -> Option<RecoveryRequest> {
        self.inner.lock().unwrap().recovery_requests.get(id).cloned()
    }

    pub fn get_credential(&self, id: &str) -> Option<Credential> {
        self.inner.lock().unwrap().credentials.get(id).cloned()
    }

    pub fn credential_count(&self) -> usize {
        self.inner.lock().unwrap().credentials.len()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, email: &str) -> Result<Account> {
        let mut handle = [0u8; 64];
        OsRng.fill_bytes(&mut handle);

        let account = Account {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            webauthn_handle: URL_SAFE_NO_PAD.encode(handle),
            created_at: Utc::now(),
        };

        let mut inner = self.inner.lock().unwrap();
        if inner.accounts.values().any(|a| a.email == account.email) {
            return Err(Error::Internal("email already registered".to_string()));
        }
        inner.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.inner.lock().unwrap().accounts.get(id).cloned())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert(&self, credential: NewCredential) -> Result<Credential> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .credentials
            .values()
            .any(|c| c.external_id == credential.external_id)
        {
            return Err(Error::CredentialExists);
        }

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
        inner.credentials.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Credential>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .credentials
            .values()
            .find(|c| c.external_id == external_id)
            .cloned())
    }

    async fn list_for_account(&self, account_id: &str) -> Result<Vec<Credential>> {
        let inner = self.inner.lock().unwrap();
        let mut credentials: Vec<Credential> = inner
            .credentials
            .values()
            .filter(|c| c.account_id == account_id)
            .cloned()
            .collect();
        credentials.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(credentials)
    }

    async fn apply_assertion(
        &self,
        credential_id: &str,
        expected_sign_count: i64,
        new_sign_count: i64,
        used_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.credentials.get_mut(credential_id) {
            Some(credential) if credential.sign_count == expected_sign_count => {
                credential.sign_count = new_sign_count;
                credential.last_used_at = Some(used_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, account_id: &str, credential_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.credentials.get(credential_id) {
            Some(credential) if credential.account_id == account_id => {
                inner.credentials.remove(credential_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl RecoveryStore for MemoryStore {
    async fn insert(&self, request: NewRecoveryRequest) -> Result<RecoveryRequest> {
        let stored = RecoveryRequest {
            id: Uuid::new_v4().to_string(),
            account_id: request.account_id,
            token_digest: request.token_digest,
            expires_at: request.expires_at,
            used_at: None,
            created_at: Utc::now(),
        };
        self.inner
            .lock()
            .unwrap()
            .recovery_requests
            .insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_by_digest(&self, token_digest: &str) -> Result<Option<RecoveryRequest>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .recovery_requests
            .values()
            .find(|r| r.token_digest == token_digest)
            .cloned())
    }

    async fn consume_and_attach(
        &self,
        request_id: &str,
        credential: NewCredential,
    ) -> Result<Credential> {
        // One lock span covers the claim and the insert, mirroring the
        // SQLite transaction.
        let mut inner = self.inner.lock().unwrap();

        let request = inner
            .recovery_requests
            .get(request_id)
            .ok_or(Error::TokenNotFound)?;
        if request.used_at.is_some() {
            return Err(Error::TokenAlreadyUsed);
        }
        if inner
            .credentials
            .values()
            .any(|c| c.external_id == credential.external_id)
        {
            return Err(Error::CredentialExists);
        }

        let now = Utc::now();
        if let Some(request) = inner.recovery_requests.get_mut(request_id) {
            request.used_at = Some(now);
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
        inner.credentials.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }
}
