//! Emergency passkey recovery.
//!
//! When every passkey is lost, the account holder requests a single-use,
//! time-limited recovery token delivered out-of-band. Redeeming it opens a
//! registration ceremony; completing that ceremony consumes the token and
//! attaches the new credential in one transaction.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Account, Credential, NewCredential, NewRecoveryRequest, RecoveryRequest};
use crate::notify::RecoveryNotifier;
use crate::session::{CeremonyKind, ChallengeStore, SessionStore};
use crate::store::{AccountStore, CredentialStore, RecoveryStore};
use crate::webauthn::types::CreationOptions;
use crate::webauthn::RelyingParty;

use super::strategy::{AccountHooks, NoopHooks};

/// Result of a completed recovery: the attached credential and whether the
/// caller should establish a session right away.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub credential: Credential,
    pub account: Account,
    pub establish_session: bool,
}

pub struct RecoveryService {
    relying_party: Arc<RelyingParty>,
    accounts: Arc<dyn AccountStore>,
    credentials: Arc<dyn CredentialStore>,
    recovery_requests: Arc<dyn RecoveryStore>,
    notifier: Arc<dyn RecoveryNotifier>,
    hooks: Arc<dyn AccountHooks>,
    window: Duration,
    sign_in_after_recovery: bool,
    user_verification_required: bool,
}

impl RecoveryService {
    pub fn new(
        relying_party: Arc<RelyingParty>,
        accounts: Arc<dyn AccountStore>,
        credentials: Arc<dyn CredentialStore>,
        recovery_requests: Arc<dyn RecoveryStore>,
        notifier: Arc<dyn RecoveryNotifier>,
        config: &Config,
    ) -> Self {
        Self {
            relying_party,
            accounts,
            credentials,
            recovery_requests,
            notifier,
            hooks: Arc::new(NoopHooks),
            window: Duration::minutes(config.recovery.window_minutes as i64),
            sign_in_after_recovery: config.recovery.sign_in_after_recovery,
            user_verification_required: config.auth.user_verification_required,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AccountHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// SHA-256 hex digest of a raw token; only digests are ever stored.
    fn digest_token(raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Create a recovery request for the account matching `email` and hand
    /// the raw token to the notifier. Returns the raw token; it is never
    /// persisted.
    ///
    /// Delivery is fire-and-forget: a notifier failure is logged and does
    /// not roll back issuance. Callers presenting an outward API should
    /// answer with an opaque "instructions sent" response regardless of
    /// whether `AccountNotFound` is returned here.
    pub async fn send_recovery_instructions(&self, email: &str) -> Result<String> {
        let account = self
            .accounts
            .find_by_email(email)
            .await?
            .ok_or(Error::AccountNotFound)?;

        let raw_token = Self::generate_token();
        let request = self
            .recovery_requests
            .insert(NewRecoveryRequest {
                account_id: account.id.clone(),
                token_digest: Self::digest_token(&raw_token),
                expires_at: Utc::now() + self.window,
            })
            .await?;

        tracing::info!(
            account_id = %account.id,
            request_id = %request.id,
            "emergency passkey registration requested"
        );

        if let Err(error) = self
            .notifier
            .deliver_recovery_instructions(&account, &raw_token)
            .await
        {
            tracing::error!(
                account_id = %account.id,
                error = %error,
                "recovery instruction delivery failed"
            );
        }

        Ok(raw_token)
    }

    /// Look up a recovery request by its raw token and check it is still
    /// usable. Does not consume the token: a failed registration attempt
    /// can be retried within the validity window.
    pub async fn redeem(&self, raw_token: &str) -> Result<(RecoveryRequest, Account)> {
        let request = self
            .recovery_requests
            .find_by_digest(&Self::digest_token(raw_token))
            .await?
            .ok_or(Error::TokenNotFound)?;

        Self::check_usable(&request)?;

        let account = self
            .accounts
            .find_by_id(&request.account_id)
            .await?
            .ok_or(Error::AccountNotFound)?;

        Ok((request, account))
    }

    /// Issue the registration challenge for the recovery ceremony,
    /// excluding whatever credentials the account still has on file.
    ///
    /// The raw token accompanies every recovery action; the request state
    /// is always re-resolved from the store rather than trusted from a
    /// caller-held copy.
    pub async fn new_challenge(
        &self,
        session: &dyn SessionStore,
        raw_token: &str,
    ) -> Result<CreationOptions> {
        let (_, account) = self.redeem(raw_token).await?;
        let exclude = self.credentials.list_for_account(&account.id).await?;

        let options = self.relying_party.options_for_registration(
            &account,
            &exclude,
            self.user_verification_required,
        );
        ChallengeStore::put(session, CeremonyKind::Recovery, &options.challenge);
        Ok(options)
    }

    /// Verify the registration response, then consume the request and
    /// attach the credential as one logical transaction. A second
    /// completion with the same token fails with `TokenAlreadyUsed` and
    /// creates nothing.
    pub async fn complete(
        &self,
        session: &dyn SessionStore,
        raw_token: &str,
        payload: &serde_json::Value,
        label: &str,
    ) -> Result<RecoveryOutcome> {
        let challenge = ChallengeStore::take(session, CeremonyKind::Recovery)
            .ok_or(Error::ChallengeMissing)?;

        let (request, account) = self.redeem(raw_token).await?;

        let verified = self.relying_party.verify_registration(
            payload,
            &challenge,
            self.user_verification_required,
        )?;

        let credential = self
            .recovery_requests
            .consume_and_attach(
                &request.id,
                NewCredential::from_verified(
                    &account.id,
                    &verified.external_id,
                    &verified.public_key,
                    verified.sign_count,
                    label,
                ),
            )
            .await
            .inspect_err(crate::policy::audit_failure)?;

        tracing::info!(
            account_id = %account.id,
            credential_id = %credential.id,
            request_id = %request.id,
            "emergency passkey registration completed"
        );

        if self.sign_in_after_recovery {
            self.hooks.after_passkey_authentication(&account).await;
        }

        Ok(RecoveryOutcome {
            credential,
            account,
            establish_session: self.sign_in_after_recovery,
        })
    }

    /// Usable iff never consumed and strictly inside the validity window;
    /// the used check comes first so a consumed token always reports reuse.
    fn check_usable(request: &RecoveryRequest) -> Result<()> {
        if request.used_at.is_some() {
            return Err(Error::TokenAlreadyUsed);
        }
        if Utc::now() >= request.expires_at {
            return Err(Error::TokenExpired);
        }
        Ok(())
    }
}
