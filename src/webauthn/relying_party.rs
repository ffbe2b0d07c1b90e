use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Account, Credential};

use super::authenticator_data;
use super::cose;
use super::types::{
    decode_base64_any, AssertionCredential, AuthenticatorSelection, ClientData, CreationOptions,
    CredentialDescriptor, PubKeyCredParam, RegistrationCredential, RequestOptions, RpEntity,
    UserEntity, VerifiedAssertion, VerifiedRegistration,
};

const CLIENT_DATA_TYPE_CREATE: &str = "webauthn.create";
const CLIENT_DATA_TYPE_GET: &str = "webauthn.get";
const CEREMONY_TIMEOUT_MS: u64 = 120_000;

/// Resolves an assertion's raw credential id to a stored credential.
///
/// Injected into [`RelyingParty::verify_authentication`] so the verifier
/// stays independent of the persistence backend and tests can substitute a
/// fake repository.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn lookup(&self, raw_credential_id: &[u8]) -> Result<Option<Credential>>;
}

/// The service verifying credentials, as opposed to the authenticator.
#[derive(Debug, Clone)]
pub struct RelyingParty {
    rp_id: String,
    rp_name: String,
    origin: Url,
}

impl RelyingParty {
    pub fn new(rp_id: &str, rp_name: &str, rp_origin: &str) -> Result<Self> {
        let raw = rp_origin.trim();
        let origin = Url::parse(raw).or_else(|_| {
            if raw.contains("://") {
                Err(url::ParseError::RelativeUrlWithoutBase)
            } else {
                Url::parse(&format!("http://{raw}"))
            }
        });
        let origin = origin.map_err(|_| {
            Error::Internal(format!(
                "invalid rp_origin: {raw} (expected like http://localhost:3000)"
            ))
        })?;

        Ok(Self {
            rp_id: rp_id.to_string(),
            rp_name: rp_name.to_string(),
            origin,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.relying_party.rp_id,
            &config.relying_party.rp_name,
            &config.relying_party.rp_origin,
        )
    }

    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    /// Mint a fresh 32-byte challenge, base64url-encoded.
    pub fn generate_challenge() -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Options document for registering a passkey to `account`. The embedded
    /// challenge must be stored by the caller for the matching ceremony.
    pub fn options_for_registration(
        &self,
        account: &Account,
        exclude: &[Credential],
        user_verification_required: bool,
    ) -> CreationOptions {
        CreationOptions {
            challenge: Self::generate_challenge(),
            rp: RpEntity {
                id: self.rp_id.clone(),
                name: self.rp_name.clone(),
            },
            user: UserEntity {
                id: account.webauthn_handle.clone(),
                name: account.email.clone(),
                display_name: account.email.clone(),
            },
            pub_key_cred_params: cose::SUPPORTED_ALGORITHMS
                .iter()
                .map(|&alg| PubKeyCredParam {
                    type_: "public-key".to_string(),
                    alg,
                })
                .collect(),
            exclude_credentials: exclude
                .iter()
                .map(|credential| CredentialDescriptor::public_key(&credential.external_id))
                .collect(),
            authenticator_selection: AuthenticatorSelection {
                user_verification: user_verification(user_verification_required),
            },
            timeout: CEREMONY_TIMEOUT_MS,
        }
    }

    /// Options document for an authentication ceremony. An empty `allow`
    /// list requests a discoverable-credential flow.
    pub fn options_for_authentication(
        &self,
        allow: &[Credential],
        user_verification_required: bool,
    ) -> RequestOptions {
        RequestOptions {
            challenge: Self::generate_challenge(),
            rp_id: self.rp_id.clone(),
            allow_credentials: allow
                .iter()
                .map(|credential| CredentialDescriptor::public_key(&credential.external_id))
                .collect(),
            user_verification: user_verification(user_verification_required),
            timeout: CEREMONY_TIMEOUT_MS,
        }
    }

    /// Verify a registration (attestation) payload against the expected
    /// challenge.
    pub fn verify_registration(
        &self,
        payload: &serde_json::Value,
        expected_challenge: &str,
        require_user_verification: bool,
    ) -> Result<VerifiedRegistration> {
        let credential: RegistrationCredential = serde_json::from_value(payload.clone())
            .map_err(|_| Error::Payload("not a registration credential".to_string()))?;

        let client_data_bytes = decode_base64_any(&credential.response.client_data_json)
            .ok_or_else(|| Error::Payload("clientDataJSON is not valid base64".to_string()))?;
        let client_data: ClientData = serde_json::from_slice(&client_data_bytes)
            .map_err(|_| Error::Payload("clientDataJSON is not valid JSON".to_string()))?;

        if client_data.typ != CLIENT_DATA_TYPE_CREATE {
            return Err(Error::InvalidAttestation(format!(
                "unexpected client data type {:?}",
                client_data.typ
            )));
        }
        self.check_challenge(expected_challenge, &client_data.challenge)?;
        self.check_origin(&client_data.origin)?;

        let attestation_object = decode_base64_any(&credential.response.attestation_object)
            .ok_or_else(|| Error::Payload("attestationObject is not valid base64".to_string()))?;
        let auth_data = parse_attestation_object(&attestation_object)?;

        self.check_rp_id_hash(&auth_data.rp_id_hash)
            .map_err(|_| Error::InvalidAttestation("rpIdHash mismatch".to_string()))?;
        if !auth_data.user_present() {
            return Err(Error::InvalidAttestation(
                "user presence not asserted".to_string(),
            ));
        }
        if require_user_verification && !auth_data.user_verified() {
            return Err(Error::UserVerificationRequired);
        }

        let user_verified = auth_data.user_verified();
        let sign_count = auth_data.sign_count;
        let external_id = auth_data
            .credential_id
            .ok_or_else(|| Error::InvalidAttestation("credential id missing".to_string()))?;
        let public_key = auth_data
            .credential_public_key
            .ok_or_else(|| Error::InvalidAttestation("credential public key missing".to_string()))?;

        // Reject unparseable or unsupported keys now rather than at first
        // authentication.
        cose::parse_public_key(&public_key)?;

        Ok(VerifiedRegistration {
            external_id,
            public_key,
            sign_count,
            user_verified,
        })
    }

    /// Verify an authentication (assertion) payload against the expected
    /// challenge, resolving the credential through `source`.
    ///
    /// The counter rule is strict: the reported count must exceed the stored
    /// one, except when both are exactly 0 (authenticators that never
    /// increment). Anything else is a rollback and fails with the distinct
    /// [`Error::SignCountRollback`] so the caller can audit or lock.
    pub async fn verify_authentication<S>(
        &self,
        payload: &serde_json::Value,
        expected_challenge: &str,
        require_user_verification: bool,
        source: &S,
    ) -> Result<(VerifiedAssertion, Credential)>
    where
        S: CredentialSource + ?Sized,
    {
        let credential: AssertionCredential = serde_json::from_value(payload.clone())
            .map_err(|_| Error::Payload("not an assertion credential".to_string()))?;

        let client_data_bytes = decode_base64_any(&credential.response.client_data_json)
            .ok_or_else(|| Error::Payload("clientDataJSON is not valid base64".to_string()))?;
        let client_data: ClientData = serde_json::from_slice(&client_data_bytes)
            .map_err(|_| Error::Payload("clientDataJSON is not valid JSON".to_string()))?;

        if client_data.typ != CLIENT_DATA_TYPE_GET {
            return Err(Error::Payload(format!(
                "unexpected client data type {:?}",
                client_data.typ
            )));
        }
        self.check_challenge(expected_challenge, &client_data.challenge)?;
        self.check_origin(&client_data.origin)?;

        let auth_data_bytes = decode_base64_any(&credential.response.authenticator_data)
            .ok_or_else(|| Error::Payload("authenticatorData is not valid base64".to_string()))?;
        let auth_data = authenticator_data::parse(&auth_data_bytes, false)?;

        self.check_rp_id_hash(&auth_data.rp_id_hash)?;
        if !auth_data.user_present() {
            return Err(Error::SignatureInvalid);
        }
        if require_user_verification && !auth_data.user_verified() {
            return Err(Error::UserVerificationRequired);
        }

        let raw_credential_id = credential
            .raw_id
            .as_deref()
            .or(Some(credential.id.as_str()))
            .and_then(decode_base64_any)
            .ok_or_else(|| Error::Payload("credential id is not valid base64".to_string()))?;

        let stored = source
            .lookup(&raw_credential_id)
            .await?
            .ok_or(Error::CredentialNotFound)?;

        let public_key = cose::parse_public_key(&stored.public_key_bytes()?)
            .map_err(|_| Error::Internal("stored public key is not parseable".to_string()))?;

        let signature = decode_base64_any(&credential.response.signature)
            .ok_or_else(|| Error::Payload("signature is not valid base64".to_string()))?;

        let mut signed_data = Vec::with_capacity(auth_data_bytes.len() + 32);
        signed_data.extend_from_slice(&auth_data_bytes);
        signed_data.extend_from_slice(&Sha256::digest(&client_data_bytes));
        public_key.verify(&signed_data, &signature)?;

        let stored_count = u32::try_from(stored.sign_count)
            .map_err(|_| Error::Internal("stored sign count out of range".to_string()))?;
        if !sign_count_advances(stored_count, auth_data.sign_count) {
            return Err(Error::SignCountRollback {
                stored: stored_count,
                reported: auth_data.sign_count,
            });
        }

        Ok((
            VerifiedAssertion {
                external_id: raw_credential_id,
                sign_count: auth_data.sign_count,
                user_verified: auth_data.user_verified(),
            },
            stored,
        ))
    }

    fn check_challenge(&self, expected: &str, reported: &str) -> Result<()> {
        let expected_bytes =
            decode_base64_any(expected).ok_or_else(|| Error::Internal(
                "stored challenge is not valid base64".to_string(),
            ))?;
        let reported_bytes = decode_base64_any(reported).ok_or(Error::ChallengeMismatch)?;
        if expected_bytes != reported_bytes {
            return Err(Error::ChallengeMismatch);
        }
        Ok(())
    }

    fn check_origin(&self, reported: &str) -> Result<()> {
        let reported = Url::parse(reported).map_err(|_| Error::OriginMismatch)?;
        if reported.origin() != self.origin.origin() {
            return Err(Error::OriginMismatch);
        }
        Ok(())
    }

    fn check_rp_id_hash(&self, reported: &[u8; 32]) -> Result<()> {
        let expected = Sha256::digest(self.rp_id.as_bytes());
        if expected.as_slice() != reported {
            return Err(Error::SignatureInvalid);
        }
        Ok(())
    }
}

/// Whether a reported signature counter is acceptable given the stored one.
fn sign_count_advances(stored: u32, reported: u32) -> bool {
    reported > stored || (reported == 0 && stored == 0)
}

fn user_verification(required: bool) -> String {
    if required { "required" } else { "preferred" }.to_string()
}

fn parse_attestation_object(bytes: &[u8]) -> Result<authenticator_data::AuthenticatorData> {
    let value: ciborium::value::Value = ciborium::de::from_reader(std::io::Cursor::new(bytes))
        .map_err(|_| Error::InvalidAttestation("attestation object is not valid CBOR".to_string()))?;
    let map = value
        .as_map()
        .ok_or_else(|| Error::InvalidAttestation("attestation object is not a map".to_string()))?;
    let auth_data = map
        .iter()
        .find_map(|(k, v)| match k {
            ciborium::value::Value::Text(t) if t == "authData" => v.as_bytes(),
            _ => None,
        })
        .ok_or_else(|| Error::InvalidAttestation("authData missing".to_string()))?;

    authenticator_data::parse(auth_data, true)
        .map_err(|e| Error::InvalidAttestation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_count_rule_accepts_strict_increase() {
        assert!(sign_count_advances(4, 5));
        assert!(sign_count_advances(0, 1));
    }

    #[test]
    fn sign_count_rule_accepts_both_zero() {
        assert!(sign_count_advances(0, 0));
    }

    #[test]
    fn sign_count_rule_rejects_equal_and_regressed() {
        assert!(!sign_count_advances(5, 5));
        assert!(!sign_count_advances(5, 4));
        assert!(!sign_count_advances(5, 0));
    }

    #[test]
    fn origin_comparison_ignores_path_and_fragment() {
        let rp = RelyingParty::new("localhost", "Test", "http://localhost:3000").unwrap();
        assert!(rp.check_origin("http://localhost:3000").is_ok());
        assert!(rp.check_origin("http://localhost:3000/").is_ok());
        assert!(matches!(
            rp.check_origin("http://localhost:4000"),
            Err(Error::OriginMismatch)
        ));
        assert!(matches!(
            rp.check_origin("https://localhost:3000"),
            Err(Error::OriginMismatch)
        ));
    }

    #[test]
    fn origin_parse_falls_back_to_http_scheme() {
        let rp = RelyingParty::new("localhost", "Test", "localhost:3000");
        assert!(rp.is_ok());
    }

    #[test]
    fn challenge_comparison_normalizes_encoding() {
        let rp = RelyingParty::new("localhost", "Test", "http://localhost:3000").unwrap();
        // Same bytes, padded vs unpadded encodings.
        assert!(rp.check_challenge("AQIDBA", "AQIDBA==").is_ok());
        assert!(matches!(
            rp.check_challenge("AQIDBA", "AQIDBQ"),
            Err(Error::ChallengeMismatch)
        ));
    }
}
