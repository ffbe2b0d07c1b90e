//! The passkey authentication strategy.
//!
//! Orchestrates one login attempt: pulls the stored challenge, delegates to
//! the relying-party verifier with a store-backed credential lookup,
//! persists the advanced signature counter, and signals success or failure
//! to the caller. Failure detail passes through the paranoid-mode policy.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::Account;
use crate::policy;
use crate::session::{CeremonyKind, ChallengeStore, SessionStore};
use crate::store::{AccountStore, CredentialStore};
use crate::webauthn::types::RequestOptions;
use crate::webauthn::RelyingParty;

/// Extension point invoked after a successful passkey authentication,
/// before success is signalled to the session layer.
#[async_trait]
pub trait AccountHooks: Send + Sync {
    async fn after_passkey_authentication(&self, _account: &Account) {}
}

/// Default hook implementation that does nothing.
pub struct NoopHooks;

#[async_trait]
impl AccountHooks for NoopHooks {}

/// States of one authentication attempt. Each submitted payload is an
/// independent attempt with a fresh challenge requirement; there is no
/// retry loop inside the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    ChallengeIssued,
    Verifying,
    Succeeded,
    Failed,
}

/// One authentication attempt's progress through [`AttemptState`].
#[derive(Debug)]
pub struct Attempt {
    state: AttemptState,
}

impl Attempt {
    fn new() -> Self {
        Self {
            state: AttemptState::Idle,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    fn advance(&mut self, next: AttemptState) {
        let legal = matches!(
            (self.state, next),
            (AttemptState::Idle, AttemptState::ChallengeIssued)
                | (AttemptState::ChallengeIssued, AttemptState::Verifying)
                | (AttemptState::Verifying, AttemptState::Succeeded)
                | (AttemptState::Idle, AttemptState::Failed)
                | (AttemptState::ChallengeIssued, AttemptState::Failed)
                | (AttemptState::Verifying, AttemptState::Failed)
        );
        if !legal {
            tracing::error!(from = ?self.state, to = ?next, "illegal attempt transition");
        }
        tracing::debug!(from = ?self.state, to = ?next, "attempt transition");
        self.state = next;
    }
}

/// Authentication strategy constructed once at startup from configuration
/// and collaborators; no per-class global state.
pub struct PasskeyStrategy {
    relying_party: Arc<RelyingParty>,
    accounts: Arc<dyn AccountStore>,
    credentials: Arc<dyn CredentialStore>,
    hooks: Arc<dyn AccountHooks>,
    user_verification_required: bool,
    paranoid: bool,
}

impl PasskeyStrategy {
    pub fn new(
        relying_party: Arc<RelyingParty>,
        accounts: Arc<dyn AccountStore>,
        credentials: Arc<dyn CredentialStore>,
        config: &Config,
    ) -> Self {
        Self {
            relying_party,
            accounts,
            credentials,
            hooks: Arc::new(NoopHooks),
            user_verification_required: config.auth.user_verification_required,
            paranoid: config.auth.paranoid,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AccountHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Issue a fresh authentication challenge for this session. The empty
    /// allow-list requests a discoverable-credential flow.
    pub fn begin(&self, session: &dyn SessionStore, kind: CeremonyKind) -> RequestOptions {
        let options = self
            .relying_party
            .options_for_authentication(&[], self.user_verification_required);
        ChallengeStore::put(session, kind, &options.challenge);
        options
    }

    /// Run one authentication attempt against a submitted credential
    /// payload.
    ///
    /// The stored counter update and the returned success are atomic from
    /// the caller's perspective: a counter that cannot be advanced (another
    /// attempt raced it) fails the attempt with `SignCountRollback`.
    pub async fn authenticate(
        &self,
        session: &dyn SessionStore,
        kind: CeremonyKind,
        payload: &serde_json::Value,
    ) -> Result<Account> {
        let mut attempt = Attempt::new();
        match self.run(&mut attempt, session, kind, payload).await {
            Ok(account) => {
                attempt.advance(AttemptState::Succeeded);
                tracing::info!(account_id = %account.id, "passkey authentication succeeded");
                Ok(account)
            }
            Err(error) => {
                attempt.advance(AttemptState::Failed);
                policy::audit_failure(&error);
                Err(policy::redact(error, self.paranoid))
            }
        }
    }

    async fn run(
        &self,
        attempt: &mut Attempt,
        session: &dyn SessionStore,
        kind: CeremonyKind,
        payload: &serde_json::Value,
    ) -> Result<Account> {
        // The challenge is consumed up front: whether this attempt succeeds
        // or fails, it cannot be replayed against the same value.
        let challenge =
            ChallengeStore::take(session, kind).ok_or(Error::ChallengeMissing)?;
        attempt.advance(AttemptState::ChallengeIssued);
        attempt.advance(AttemptState::Verifying);

        let (assertion, credential) = self
            .relying_party
            .verify_authentication(
                payload,
                &challenge,
                self.user_verification_required,
                self.credentials.as_ref(),
            )
            .await?;

        let account = self
            .accounts
            .find_by_id(&credential.account_id)
            .await?
            .ok_or(Error::AccountNotFound)?;

        let advanced = self
            .credentials
            .apply_assertion(
                &credential.id,
                credential.sign_count,
                i64::from(assertion.sign_count),
                Utc::now(),
            )
            .await?;
        if !advanced {
            // A concurrent attempt with the same credential won the
            // compare-and-set; this one is treated as a clone.
            return Err(Error::SignCountRollback {
                stored: credential.sign_count.try_into().unwrap_or(u32::MAX),
                reported: assertion.sign_count,
            });
        }

        self.hooks.after_passkey_authentication(&account).await;
        Ok(account)
    }
}
