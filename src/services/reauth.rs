//! Step-up reauthentication for sensitive actions.
//!
//! A fresh passkey check mints a short-lived proof token stored in the
//! session; destructive operations present it back and are denied on any
//! mismatch. Comparison is constant-time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::models::Account;
use crate::session::{CeremonyKind, SessionKey, SessionStore};
use crate::webauthn::types::RequestOptions;

use super::strategy::PasskeyStrategy;

/// Issues and checks session-scoped reauthentication proofs.
pub struct ReauthenticationGate;

impl ReauthenticationGate {
    /// Store a fresh high-entropy proof token in the session and return it.
    /// Only call after a successful step-up passkey check.
    pub fn issue_proof(session: &dyn SessionStore) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);
        session.put(SessionKey::ReauthenticationProof, token.clone());
        token
    }

    /// Constant-time comparison against the stored proof. Absence or
    /// mismatch fails closed.
    pub fn verify_proof(session: &dyn SessionStore, supplied: &str) -> bool {
        let Some(stored) = session.get(SessionKey::ReauthenticationProof) else {
            return false;
        };
        stored.as_bytes().ct_eq(supplied.as_bytes()).into()
    }

    /// Drop the stored proof so one step-up cannot gate further actions.
    pub fn consume_proof(session: &dyn SessionStore) {
        session.take(SessionKey::ReauthenticationProof);
    }
}

/// The step-up flow: challenge, fresh passkey check, proof issuance.
pub struct ReauthenticationService {
    strategy: Arc<PasskeyStrategy>,
}

impl ReauthenticationService {
    pub fn new(strategy: Arc<PasskeyStrategy>) -> Self {
        Self { strategy }
    }

    /// Issue the step-up authentication challenge for this session.
    pub fn begin(&self, session: &dyn SessionStore) -> RequestOptions {
        self.strategy.begin(session, CeremonyKind::Reauthentication)
    }

    /// Run the fresh passkey check and mint a proof on success. The
    /// asserting credential must belong to the already signed-in account.
    pub async fn reauthenticate(
        &self,
        session: &dyn SessionStore,
        current_account: &Account,
        payload: &serde_json::Value,
    ) -> Result<String> {
        let account = self
            .strategy
            .authenticate(session, CeremonyKind::Reauthentication, payload)
            .await?;
        if account.id != current_account.id {
            tracing::warn!(
                account_id = %current_account.id,
                asserted_account_id = %account.id,
                "step-up assertion resolved to a different account"
            );
            return Err(Error::InvalidCredential);
        }

        Ok(ReauthenticationGate::issue_proof(session))
    }
}
