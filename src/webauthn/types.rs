//! Wire payloads exchanged with the browser credential API.
//!
//! Incoming structures mirror the JSON serialization of
//! `PublicKeyCredential`; outgoing option documents mirror
//! `CredentialCreationOptions` / `CredentialRequestOptions`. All binary
//! fields are base64url strings.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Credential returned by `navigator.credentials.create()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationCredential {
    pub id: String,
    #[serde(rename = "rawId", skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<String>,
    pub response: RegistrationResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    #[serde(rename = "clientDataJSON", alias = "clientDataJson")]
    pub client_data_json: String,
    #[serde(rename = "attestationObject")]
    pub attestation_object: String,
}

/// Credential returned by `navigator.credentials.get()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionCredential {
    pub id: String,
    #[serde(rename = "rawId", skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<String>,
    pub response: AssertionResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionResponse {
    #[serde(rename = "clientDataJSON", alias = "clientDataJson")]
    pub client_data_json: String,
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String,
    pub signature: String,
    #[serde(rename = "userHandle", skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
}

/// The decoded `clientDataJSON` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub typ: String,
    pub challenge: String,
    pub origin: String,
}

/// Output of a successful registration verification.
#[derive(Debug, Clone)]
pub struct VerifiedRegistration {
    /// Raw credential id bytes, globally unique per authenticator credential.
    pub external_id: Vec<u8>,
    /// COSE-encoded public key bytes.
    pub public_key: Vec<u8>,
    /// Initial signature counter, usually 0.
    pub sign_count: u32,
    pub user_verified: bool,
}

/// Output of a successful assertion verification.
#[derive(Debug, Clone)]
pub struct VerifiedAssertion {
    pub external_id: Vec<u8>,
    pub sign_count: u32,
    pub user_verified: bool,
}

// Outgoing option documents

#[derive(Debug, Clone, Serialize)]
pub struct RpEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub type_: String,
    pub alg: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: String,
}

impl CredentialDescriptor {
    pub fn public_key(id: &str) -> Self {
        Self {
            type_: "public-key".to_string(),
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatorSelection {
    #[serde(rename = "userVerification")]
    pub user_verification: String,
}

/// Options document for `navigator.credentials.create()`.
#[derive(Debug, Clone, Serialize)]
pub struct CreationOptions {
    pub challenge: String,
    pub rp: RpEntity,
    pub user: UserEntity,
    #[serde(rename = "pubKeyCredParams")]
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    #[serde(rename = "excludeCredentials", skip_serializing_if = "Vec::is_empty")]
    pub exclude_credentials: Vec<CredentialDescriptor>,
    #[serde(rename = "authenticatorSelection")]
    pub authenticator_selection: AuthenticatorSelection,
    pub timeout: u64,
}

/// Options document for `navigator.credentials.get()`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestOptions {
    pub challenge: String,
    #[serde(rename = "rpId")]
    pub rp_id: String,
    #[serde(rename = "allowCredentials", skip_serializing_if = "Vec::is_empty")]
    pub allow_credentials: Vec<CredentialDescriptor>,
    #[serde(rename = "userVerification")]
    pub user_verification: String,
    pub timeout: u64,
}

/// Decode base64 in any of the encodings browsers emit: base64url with or
/// without padding, or standard base64.
pub(crate) fn decode_base64_any(input: &str) -> Option<Vec<u8>> {
    let trimmed = input.trim();
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| URL_SAFE.decode(trimmed))
        .or_else(|_| STANDARD.decode(trimmed))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_base64_any_accepts_url_safe_and_standard() {
        let bytes = vec![0xfb, 0xef, 0x01, 0x02, 0x03];
        assert_eq!(
            decode_base64_any(&URL_SAFE_NO_PAD.encode(&bytes)),
            Some(bytes.clone())
        );
        assert_eq!(
            decode_base64_any(&STANDARD.encode(&bytes)),
            Some(bytes.clone())
        );
        assert_eq!(decode_base64_any(&URL_SAFE.encode(&bytes)), Some(bytes));
    }

    #[test]
    fn assertion_payload_round_trips_through_json() {
        let payload = serde_json::json!({
            "id": "Y3JlZA",
            "rawId": "Y3JlZA",
            "response": {
                "clientDataJSON": "e30",
                "authenticatorData": "AAAA",
                "signature": "c2ln",
            }
        });

        let parsed: AssertionCredential = serde_json::from_value(payload).unwrap();
        assert_eq!(parsed.raw_id.as_deref(), Some("Y3JlZA"));
        assert!(parsed.response.user_handle.is_none());
    }
}
