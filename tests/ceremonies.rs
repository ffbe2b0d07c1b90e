//! End-to-end ceremony tests driven by a simulated authenticator.
//!
//! The simulator holds a real signing key (ES256 or Ed25519), builds the
//! same JSON payloads a browser would submit, and signs them properly, so
//! every test exercises the full verification path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use ciborium::value::Value as CborValue;
use p256::ecdsa::signature::Signer as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use passgate::config::Config;
use passgate::db::Database;
use passgate::error::Error;
use passgate::models::{Account, RecoveryRequest};
use passgate::notify::RecoveryNotifier;
use passgate::services::{
    AccountHooks, PasskeyService, PasskeyStrategy, ReauthenticationGate, ReauthenticationService,
    RecoveryService,
};
use passgate::session::{CeremonyKind, MemorySession};
use passgate::store::{AccountStore, CredentialStore, MemoryStore, SqliteStore};
use passgate::webauthn::RelyingParty;

const RP_ID: &str = "localhost";
const ORIGIN: &str = "http://localhost:3000";

const FLAG_UP: u8 = 0x01;
const FLAG_UV: u8 = 0x04;
const FLAG_AT: u8 = 0x40;

enum KeyPair {
    Es256(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl KeyPair {
    fn cose_public_key(&self) -> Vec<u8> {
        let entries = match self {
            KeyPair::Es256(key) => {
                use p256::elliptic_curve::sec1::ToEncodedPoint;
                let point = key.verifying_key().to_encoded_point(false);
                vec![
                    (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
                    (CborValue::Integer(3.into()), CborValue::Integer((-7).into())),
                    (CborValue::Integer((-1).into()), CborValue::Integer(1.into())),
                    (
                        CborValue::Integer((-2).into()),
                        CborValue::Bytes(point.x().unwrap().to_vec()),
                    ),
                    (
                        CborValue::Integer((-3).into()),
                        CborValue::Bytes(point.y().unwrap().to_vec()),
                    ),
                ]
            }
            KeyPair::Ed25519(key) => vec![
                (CborValue::Integer(1.into()), CborValue::Integer(1.into())),
                (CborValue::Integer(3.into()), CborValue::Integer((-8).into())),
                (CborValue::Integer((-1).into()), CborValue::Integer(6.into())),
                (
                    CborValue::Integer((-2).into()),
                    CborValue::Bytes(key.verifying_key().to_bytes().to_vec()),
                ),
            ],
        };
        let mut out = Vec::new();
        ciborium::ser::into_writer(&CborValue::Map(entries), &mut out).unwrap();
        out
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            KeyPair::Es256(key) => {
                let signature: p256::ecdsa::Signature = key.sign(message);
                signature.to_der().as_bytes().to_vec()
            }
            KeyPair::Ed25519(key) => {
                use ed25519_dalek::Signer as _;
                key.sign(message).to_bytes().to_vec()
            }
        }
    }
}

/// A fake authenticator device bound to one credential.
struct Authenticator {
    key: KeyPair,
    credential_id: Vec<u8>,
    sign_count: u32,
    user_verified: bool,
    /// Authenticators without a counter always report 0.
    increments: bool,
}

impl Authenticator {
    fn es256() -> Self {
        let mut credential_id = vec![0u8; 16];
        OsRng.fill_bytes(&mut credential_id);
        Self {
            key: KeyPair::Es256(p256::ecdsa::SigningKey::random(&mut OsRng)),
            credential_id,
            sign_count: 0,
            user_verified: true,
            increments: true,
        }
    }

    fn ed25519() -> Self {
        let mut credential_id = vec![0u8; 16];
        OsRng.fill_bytes(&mut credential_id);
        Self {
            key: KeyPair::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng)),
            credential_id,
            sign_count: 0,
            user_verified: true,
            increments: true,
        }
    }

    fn without_user_verification(mut self) -> Self {
        self.user_verified = false;
        self
    }

    fn without_counter(mut self) -> Self {
        self.increments = false;
        self.sign_count = 0;
        self
    }

    fn flags(&self, attested: bool) -> u8 {
        let mut flags = FLAG_UP;
        if self.user_verified {
            flags |= FLAG_UV;
        }
        if attested {
            flags |= FLAG_AT;
        }
        flags
    }

    fn client_data(&self, typ: &str, challenge: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": typ,
            "challenge": challenge,
            "origin": ORIGIN,
        }))
        .unwrap()
    }

    /// Respond to `navigator.credentials.create()`.
    fn create(&self, challenge: &str) -> serde_json::Value {
        let client_data = self.client_data("webauthn.create", challenge);

        let mut auth_data = Sha256::digest(RP_ID.as_bytes()).to_vec();
        auth_data.push(self.flags(true));
        auth_data.extend_from_slice(&self.sign_count.to_be_bytes());
        auth_data.extend_from_slice(&[0u8; 16]); // aaguid
        auth_data.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
        auth_data.extend_from_slice(&self.credential_id);
        auth_data.extend_from_slice(&self.key.cose_public_key());

        let attestation = CborValue::Map(vec![
            (
                CborValue::Text("fmt".to_string()),
                CborValue::Text("none".to_string()),
            ),
            (
                CborValue::Text("attStmt".to_string()),
                CborValue::Map(Vec::new()),
            ),
            (
                CborValue::Text("authData".to_string()),
                CborValue::Bytes(auth_data),
            ),
        ]);
        let mut attestation_object = Vec::new();
        ciborium::ser::into_writer(&attestation, &mut attestation_object).unwrap();

        serde_json::json!({
            "id": URL_SAFE_NO_PAD.encode(&self.credential_id),
            "rawId": URL_SAFE_NO_PAD.encode(&self.credential_id),
            "response": {
                "clientDataJSON": URL_SAFE_NO_PAD.encode(&client_data),
                "attestationObject": URL_SAFE_NO_PAD.encode(&attestation_object),
            }
        })
    }

    /// Respond to `navigator.credentials.get()`, advancing the counter the
    /// way a real device would.
    fn get(&mut self, challenge: &str) -> serde_json::Value {
        if self.increments {
            self.sign_count += 1;
        }
        self.get_with_count(challenge, self.sign_count)
    }

    /// Respond with an explicit counter value (cloned-device scenarios).
    fn get_with_count(&self, challenge: &str, sign_count: u32) -> serde_json::Value {
        let client_data = self.client_data("webauthn.get", challenge);

        let mut auth_data = Sha256::digest(RP_ID.as_bytes()).to_vec();
        auth_data.push(self.flags(false));
        auth_data.extend_from_slice(&sign_count.to_be_bytes());

        let mut signed = auth_data.clone();
        signed.extend_from_slice(&Sha256::digest(&client_data));
        let signature = self.key.sign(&signed);

        serde_json::json!({
            "id": URL_SAFE_NO_PAD.encode(&self.credential_id),
            "rawId": URL_SAFE_NO_PAD.encode(&self.credential_id),
            "response": {
                "clientDataJSON": URL_SAFE_NO_PAD.encode(&client_data),
                "authenticatorData": URL_SAFE_NO_PAD.encode(&auth_data),
                "signature": URL_SAFE_NO_PAD.encode(&signature),
            }
        })
    }
}

/// Notifier that captures the delivered raw token.
#[derive(Default)]
struct CaptureNotifier {
    delivered: Mutex<Option<String>>,
}

#[async_trait]
impl RecoveryNotifier for CaptureNotifier {
    async fn deliver_recovery_instructions(
        &self,
        _account: &Account,
        raw_token: &str,
    ) -> passgate::Result<()> {
        *self.delivered.lock().unwrap() = Some(raw_token.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct CountingHooks {
    calls: AtomicUsize,
}

#[async_trait]
impl AccountHooks for CountingHooks {
    async fn after_passkey_authentication(&self, _account: &Account) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    notifier: Arc<CaptureNotifier>,
    hooks: Arc<CountingHooks>,
    strategy: Arc<PasskeyStrategy>,
    passkeys: PasskeyService,
    recovery: RecoveryService,
    reauth: ReauthenticationService,
}

fn harness_with_config(config: Config) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(CaptureNotifier::default());
    let hooks = Arc::new(CountingHooks::default());
    let relying_party = Arc::new(RelyingParty::from_config(&config).unwrap());

    let strategy = Arc::new(
        PasskeyStrategy::new(
            relying_party.clone(),
            store.clone(),
            store.clone(),
            &config,
        )
        .with_hooks(hooks.clone()),
    );
    let passkeys = PasskeyService::new(relying_party.clone(), store.clone(), &config);
    let recovery = RecoveryService::new(
        relying_party.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        notifier.clone(),
        &config,
    )
    .with_hooks(hooks.clone());
    let reauth = ReauthenticationService::new(strategy.clone());

    Harness {
        store,
        notifier,
        hooks,
        strategy,
        passkeys,
        recovery,
        reauth,
    }
}

fn harness() -> Harness {
    harness_with_config(Config::default())
}

async fn register(
    harness: &Harness,
    session: &MemorySession,
    account: &Account,
    authenticator: &Authenticator,
    label: &str,
) -> passgate::Result<passgate::models::Credential> {
    let options = harness
        .passkeys
        .begin_registration(session, account)
        .await?;
    let payload = authenticator.create(&options.challenge);
    harness
        .passkeys
        .finish_registration(session, account, &payload, label)
        .await
}

#[tokio::test]
async fn register_then_authenticate_advances_the_counter() {
    let harness = harness();
    let session = MemorySession::new();
    let account = harness.store.create_account("a@x.com").await.unwrap();
    let mut authenticator = Authenticator::es256();

    let credential = register(&harness, &session, &account, &authenticator, "laptop")
        .await
        .unwrap();
    assert_eq!(credential.sign_count, 0);
    assert!(credential.last_used_at.is_none());

    let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
    let payload = authenticator.get(&options.challenge);
    let resolved = harness
        .strategy
        .authenticate(&session, CeremonyKind::Authentication, &payload)
        .await
        .unwrap();

    assert_eq!(resolved.id, account.id);
    let stored = harness.store.get_credential(&credential.id).unwrap();
    assert_eq!(stored.sign_count, 1);
    assert!(stored.last_used_at.is_some());
    assert_eq!(harness.hooks.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ed25519_credentials_authenticate() {
    let harness = harness();
    let session = MemorySession::new();
    let account = harness.store.create_account("a@x.com").await.unwrap();
    let mut authenticator = Authenticator::ed25519();

    register(&harness, &session, &account, &authenticator, "yubikey")
        .await
        .unwrap();

    let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
    let payload = authenticator.get(&options.challenge);
    let resolved = harness
        .strategy
        .authenticate(&session, CeremonyKind::Authentication, &payload)
        .await
        .unwrap();
    assert_eq!(resolved.id, account.id);
}

#[tokio::test]
async fn duplicate_external_id_cannot_register_twice() {
    let harness = harness();
    let session = MemorySession::new();
    let account = harness.store.create_account("a@x.com").await.unwrap();
    let authenticator = Authenticator::es256();

    register(&harness, &session, &account, &authenticator, "laptop")
        .await
        .unwrap();
    let second = register(&harness, &session, &account, &authenticator, "again").await;

    assert!(matches!(second, Err(Error::CredentialExists)));
}

#[tokio::test]
async fn cloned_authenticator_counter_fails_and_leaves_state_untouched() {
    let harness = harness();
    let session = MemorySession::new();
    let account = harness.store.create_account("a@x.com").await.unwrap();
    let mut authenticator = Authenticator::es256();

    let credential = register(&harness, &session, &account, &authenticator, "laptop")
        .await
        .unwrap();

    // Advance the stored counter to 5.
    for _ in 0..5 {
        let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
        let payload = authenticator.get(&options.challenge);
        harness
            .strategy
            .authenticate(&session, CeremonyKind::Authentication, &payload)
            .await
            .unwrap();
    }

    // A clone replays the current counter value.
    let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
    let payload = authenticator.get_with_count(&options.challenge, 5);
    let result = harness
        .strategy
        .authenticate(&session, CeremonyKind::Authentication, &payload)
        .await;

    assert!(matches!(
        result,
        Err(Error::SignCountRollback {
            stored: 5,
            reported: 5
        })
    ));
    let stored = harness.store.get_credential(&credential.id).unwrap();
    assert_eq!(stored.sign_count, 5);
}

#[tokio::test]
async fn counterless_authenticators_stay_at_zero_and_keep_working() {
    let harness = harness();
    let session = MemorySession::new();
    let account = harness.store.create_account("a@x.com").await.unwrap();
    let mut authenticator = Authenticator::es256().without_counter();

    register(&harness, &session, &account, &authenticator, "platform")
        .await
        .unwrap();

    for _ in 0..3 {
        let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
        let payload = authenticator.get(&options.challenge);
        harness
            .strategy
            .authenticate(&session, CeremonyKind::Authentication, &payload)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn a_challenge_is_never_accepted_twice() {
    let harness = harness();
    let session = MemorySession::new();
    let account = harness.store.create_account("a@x.com").await.unwrap();
    let mut authenticator = Authenticator::es256();

    register(&harness, &session, &account, &authenticator, "laptop")
        .await
        .unwrap();

    let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
    let payload = authenticator.get(&options.challenge);
    harness
        .strategy
        .authenticate(&session, CeremonyKind::Authentication, &payload)
        .await
        .unwrap();

    // Replaying the same payload: the challenge slot was consumed.
    let replay = harness
        .strategy
        .authenticate(&session, CeremonyKind::Authentication, &payload)
        .await;
    assert!(matches!(replay, Err(Error::ChallengeMissing)));

    // With a fresh challenge outstanding, the stale payload mismatches.
    let _fresh = harness.strategy.begin(&session, CeremonyKind::Authentication);
    let stale = harness
        .strategy
        .authenticate(&session, CeremonyKind::Authentication, &payload)
        .await;
    assert!(matches!(stale, Err(Error::ChallengeMismatch)));
}

#[tokio::test]
async fn unknown_credentials_are_rejected() {
    let harness = harness();
    let session = MemorySession::new();
    let mut stranger = Authenticator::es256();

    let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
    let payload = stranger.get(&options.challenge);
    let result = harness
        .strategy
        .authenticate(&session, CeremonyKind::Authentication, &payload)
        .await;

    assert!(matches!(result, Err(Error::CredentialNotFound)));
}

#[tokio::test]
async fn paranoid_mode_collapses_failure_detail() {
    let mut config = Config::default();
    config.auth.paranoid = true;
    let harness = harness_with_config(config);
    let session = MemorySession::new();
    let account = harness.store.create_account("a@x.com").await.unwrap();
    let mut authenticator = Authenticator::es256();

    register(&harness, &session, &account, &authenticator, "laptop")
        .await
        .unwrap();

    let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
    let _ = harness
        .strategy
        .authenticate(
            &session,
            CeremonyKind::Authentication,
            &authenticator.get(&options.challenge),
        )
        .await
        .unwrap();

    // Counter replay, normally a distinct SignCountRollback.
    let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
    let payload = authenticator.get_with_count(&options.challenge, 1);
    let result = harness
        .strategy
        .authenticate(&session, CeremonyKind::Authentication, &payload)
        .await;
    assert!(matches!(result, Err(Error::InvalidCredential)));

    // Unknown credential, normally CredentialNotFound.
    let mut stranger = Authenticator::es256();
    let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
    let result = harness
        .strategy
        .authenticate(
            &session,
            CeremonyKind::Authentication,
            &stranger.get(&options.challenge),
        )
        .await;
    assert!(matches!(result, Err(Error::InvalidCredential)));
}

#[tokio::test]
async fn user_verification_is_enforced_when_required() {
    let harness = harness();
    let session = MemorySession::new();
    let account = harness.store.create_account("a@x.com").await.unwrap();
    let authenticator = Authenticator::es256().without_user_verification();

    let result = register(&harness, &session, &account, &authenticator, "laptop").await;
    assert!(matches!(result, Err(Error::UserVerificationRequired)));

    // With the requirement disabled the same authenticator is fine.
    let mut config = Config::default();
    config.auth.user_verification_required = false;
    let relaxed = harness_with_config(config);
    let session = MemorySession::new();
    let account = relaxed.store.create_account("b@x.com").await.unwrap();
    let authenticator = Authenticator::es256().without_user_verification();
    register(&relaxed, &session, &account, &authenticator, "laptop")
        .await
        .unwrap();
}

#[tokio::test]
async fn recovery_round_trip_attaches_exactly_one_credential() {
    let harness = harness();
    let session = MemorySession::new();
    let account = harness.store.create_account("a@x.com").await.unwrap();

    let raw_token = harness
        .recovery
        .send_recovery_instructions("a@x.com")
        .await
        .unwrap();
    assert_eq!(
        harness.notifier.delivered.lock().unwrap().as_deref(),
        Some(raw_token.as_str())
    );

    let (request, owner) = harness.recovery.redeem(&raw_token).await.unwrap();
    assert_eq!(owner.id, account.id);
    assert!(request.used_at.is_none());

    let options = harness
        .recovery
        .new_challenge(&session, &raw_token)
        .await
        .unwrap();
    let replacement = Authenticator::es256();
    let payload = replacement.create(&options.challenge);
    let outcome = harness
        .recovery
        .complete(&session, &raw_token, &payload, "recovered key")
        .await
        .unwrap();

    assert_eq!(outcome.account.id, account.id);
    assert!(outcome.establish_session);
    assert_eq!(harness.store.credential_count(), 1);
    assert!(harness
        .store
        .get_recovery_request(&request.id)
        .unwrap()
        .used_at
        .is_some());
    assert_eq!(harness.hooks.calls.load(Ordering::SeqCst), 1);

    // Completing again creates nothing and reports reuse.
    let options_again = harness.recovery.new_challenge(&session, &raw_token).await;
    assert!(matches!(options_again, Err(Error::TokenAlreadyUsed)));

    let second_redeem = harness.recovery.redeem(&raw_token).await;
    assert!(matches!(second_redeem, Err(Error::TokenAlreadyUsed)));
    assert_eq!(harness.store.credential_count(), 1);
}

#[tokio::test]
async fn recovery_tokens_respect_the_validity_window() {
    let harness = harness();
    harness.store.create_account("a@x.com").await.unwrap();
    let account = harness.store.find_by_email("a@x.com").await.unwrap().unwrap();

    let digest = |raw: &str| {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    };

    // One minute of validity left (redemption at T=59min of a 1h window).
    harness.store.insert_recovery_request_raw(RecoveryRequest {
        id: "near-expiry".to_string(),
        account_id: account.id.clone(),
        token_digest: digest("still-valid"),
        expires_at: Utc::now() + Duration::minutes(1),
        used_at: None,
        created_at: Utc::now() - Duration::minutes(59),
    });
    assert!(harness.recovery.redeem("still-valid").await.is_ok());

    // One minute past expiry (redemption at T=61min).
    harness.store.insert_recovery_request_raw(RecoveryRequest {
        id: "expired".to_string(),
        account_id: account.id.clone(),
        token_digest: digest("too-late"),
        expires_at: Utc::now() - Duration::minutes(1),
        used_at: None,
        created_at: Utc::now() - Duration::minutes(61),
    });
    let result = harness.recovery.redeem("too-late").await;
    assert!(matches!(result, Err(Error::TokenExpired)));

    let unknown = harness.recovery.redeem("never-issued").await;
    assert!(matches!(unknown, Err(Error::TokenNotFound)));
}

#[tokio::test]
async fn recovery_request_for_unknown_email_is_distinct_internally() {
    let harness = harness();
    let result = harness
        .recovery
        .send_recovery_instructions("nobody@x.com")
        .await;
    assert!(matches!(result, Err(Error::AccountNotFound)));
    assert!(harness.notifier.delivered.lock().unwrap().is_none());
}

#[tokio::test]
async fn credential_deletion_requires_step_up_proof() {
    let harness = harness();
    let session = MemorySession::new();
    let account = harness.store.create_account("a@x.com").await.unwrap();
    let mut keeper = Authenticator::es256();
    let goner = Authenticator::es256();

    register(&harness, &session, &account, &keeper, "keeper")
        .await
        .unwrap();
    let doomed = register(&harness, &session, &account, &goner, "goner")
        .await
        .unwrap();

    // No proof at all: denied.
    let denied = harness
        .passkeys
        .remove(&session, &account, &doomed.id, "not-a-proof")
        .await;
    assert!(matches!(denied, Err(Error::ReauthenticationRequired)));

    // Step up with the surviving credential, then delete.
    let options = harness
        .passkeys
        .begin_removal(&session, &account, &doomed.id)
        .await
        .unwrap();
    assert_eq!(options.allow_credentials.len(), 1);

    let payload = keeper.get(&options.challenge);
    let proof = harness
        .reauth
        .reauthenticate(&session, &account, &payload)
        .await
        .unwrap();

    harness
        .passkeys
        .remove(&session, &account, &doomed.id, &proof)
        .await
        .unwrap();
    assert_eq!(harness.passkeys.list(&account).await.unwrap().len(), 1);

    // The deleted credential no longer authenticates.
    let mut goner = goner;
    let options = harness.strategy.begin(&session, CeremonyKind::Authentication);
    let result = harness
        .strategy
        .authenticate(
            &session,
            CeremonyKind::Authentication,
            &goner.get(&options.challenge),
        )
        .await;
    assert!(matches!(result, Err(Error::CredentialNotFound)));
}

#[tokio::test]
async fn step_up_proof_is_bound_to_the_signed_in_account() {
    let harness = harness();
    let session = MemorySession::new();
    let alice = harness.store.create_account("alice@x.com").await.unwrap();
    let mallory = harness.store.create_account("mallory@x.com").await.unwrap();
    let mut mallory_key = Authenticator::es256();

    register(&harness, &session, &mallory, &mallory_key, "mallory key")
        .await
        .unwrap();

    // Mallory's credential cannot step up Alice's session.
    let options = harness.reauth.begin(&session);
    let payload = mallory_key.get(&options.challenge);
    let result = harness.reauth.reauthenticate(&session, &alice, &payload).await;

    assert!(matches!(result, Err(Error::InvalidCredential)));
    assert!(!ReauthenticationGate::verify_proof(&session, ""));
}

#[tokio::test]
async fn sqlite_store_runs_the_same_flows() {
    let db = Database::open_in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    let store = Arc::new(SqliteStore::new(db));

    let config = Config::default();
    let relying_party = Arc::new(RelyingParty::from_config(&config).unwrap());
    let strategy = Arc::new(PasskeyStrategy::new(
        relying_party.clone(),
        store.clone(),
        store.clone(),
        &config,
    ));
    let passkeys = PasskeyService::new(relying_party.clone(), store.clone(), &config);
    let recovery = RecoveryService::new(
        relying_party,
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(passgate::notify::LogNotifier),
        &config,
    );

    let session = MemorySession::new();
    let account = store.create_account("a@x.com").await.unwrap();
    let mut authenticator = Authenticator::es256();

    // Register and authenticate.
    let options = passkeys.begin_registration(&session, &account).await.unwrap();
    let credential = passkeys
        .finish_registration(
            &session,
            &account,
            &authenticator.create(&options.challenge),
            "laptop",
        )
        .await
        .unwrap();

    let options = strategy.begin(&session, CeremonyKind::Authentication);
    strategy
        .authenticate(
            &session,
            CeremonyKind::Authentication,
            &authenticator.get(&options.challenge),
        )
        .await
        .unwrap();

    let stored = store
        .find_by_external_id(&credential.external_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.sign_count, 1);
    assert!(stored.last_used_at.is_some());

    // Compare-and-set: a stale expected counter loses.
    assert!(!store
        .apply_assertion(&credential.id, 0, 9, Utc::now())
        .await
        .unwrap());

    // Duplicate external id is refused by the unique index.
    let options = passkeys.begin_registration(&session, &account).await.unwrap();
    let duplicate = passkeys
        .finish_registration(
            &session,
            &account,
            &authenticator.create(&options.challenge),
            "again",
        )
        .await;
    assert!(matches!(duplicate, Err(Error::CredentialExists)));

    // Recovery completes exactly once.
    let raw_token = recovery.send_recovery_instructions("a@x.com").await.unwrap();
    recovery.redeem(&raw_token).await.unwrap();
    let options = recovery.new_challenge(&session, &raw_token).await.unwrap();
    let replacement = Authenticator::es256();
    recovery
        .complete(
            &session,
            &raw_token,
            &replacement.create(&options.challenge),
            "recovered",
        )
        .await
        .unwrap();

    let again = recovery.redeem(&raw_token).await;
    assert!(matches!(again, Err(Error::TokenAlreadyUsed)));
}
