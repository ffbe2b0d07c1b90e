//! Passkey lifecycle for a signed-in account: adding, listing, and
//! deleting credentials. Deletion is gated on a fresh reauthentication
//! proof.

use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Account, Credential, NewCredential};
use crate::session::{CeremonyKind, ChallengeStore, SessionStore};
use crate::store::CredentialStore;
use crate::webauthn::types::{CreationOptions, RequestOptions};
use crate::webauthn::RelyingParty;

use super::reauth::ReauthenticationGate;

pub struct PasskeyService {
    relying_party: Arc<RelyingParty>,
    credentials: Arc<dyn CredentialStore>,
    user_verification_required: bool,
}

impl PasskeyService {
    pub fn new(
        relying_party: Arc<RelyingParty>,
        credentials: Arc<dyn CredentialStore>,
        config: &Config,
    ) -> Self {
        Self {
            relying_party,
            credentials,
            user_verification_required: config.auth.user_verification_required,
        }
    }

    /// Issue a registration challenge for adding a passkey to `account`.
    /// Existing credentials are excluded so the authenticator refuses to
    /// create a duplicate.
    pub async fn begin_registration(
        &self,
        session: &dyn SessionStore,
        account: &Account,
    ) -> Result<CreationOptions> {
        let exclude = self.credentials.list_for_account(&account.id).await?;
        let options = self.relying_party.options_for_registration(
            account,
            &exclude,
            self.user_verification_required,
        );
        ChallengeStore::put(session, CeremonyKind::Registration, &options.challenge);
        Ok(options)
    }

    /// Verify the attestation response and store the new credential.
    pub async fn finish_registration(
        &self,
        session: &dyn SessionStore,
        account: &Account,
        payload: &serde_json::Value,
        label: &str,
    ) -> Result<Credential> {
        let challenge = ChallengeStore::take(session, CeremonyKind::Registration)
            .ok_or(Error::ChallengeMissing)?;

        let verified = self.relying_party.verify_registration(
            payload,
            &challenge,
            self.user_verification_required,
        )?;

        let credential = self
            .credentials
            .insert(NewCredential::from_verified(
                &account.id,
                &verified.external_id,
                &verified.public_key,
                verified.sign_count,
                label,
            ))
            .await?;

        tracing::info!(
            account_id = %account.id,
            credential_id = %credential.id,
            "passkey registered"
        );
        Ok(credential)
    }

    pub async fn list(&self, account: &Account) -> Result<Vec<Credential>> {
        self.credentials.list_for_account(&account.id).await
    }

    /// Issue the step-up challenge preceding a credential deletion. The
    /// allow-list covers the account's other credentials; the one being
    /// deleted cannot vouch for its own removal.
    pub async fn begin_removal(
        &self,
        session: &dyn SessionStore,
        account: &Account,
        credential_id: &str,
    ) -> Result<RequestOptions> {
        let all = self.credentials.list_for_account(&account.id).await?;
        if !all.iter().any(|c| c.id == credential_id) {
            return Err(Error::CredentialNotFound);
        }

        let allow: Vec<Credential> = all.into_iter().filter(|c| c.id != credential_id).collect();
        let options = self
            .relying_party
            .options_for_authentication(&allow, self.user_verification_required);
        ChallengeStore::put(session, CeremonyKind::Reauthentication, &options.challenge);
        Ok(options)
    }

    /// Delete a credential. Denied unless the supplied reauthentication
    /// proof matches the session's stored proof.
    pub async fn remove(
        &self,
        session: &dyn SessionStore,
        account: &Account,
        credential_id: &str,
        reauthentication_token: &str,
    ) -> Result<()> {
        if !ReauthenticationGate::verify_proof(session, reauthentication_token) {
            return Err(Error::ReauthenticationRequired);
        }

        if !self.credentials.delete(&account.id, credential_id).await? {
            return Err(Error::CredentialNotFound);
        }

        tracing::info!(
            account_id = %account.id,
            credential_id = %credential_id,
            "passkey deleted"
        );
        Ok(())
    }
}
