use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{Error, Result};

/// One registered passkey.
///
/// `external_id` is the base64url-encoded raw credential id reported by the
/// authenticator and is unique across the whole system. `sign_count` only
/// ever moves forward; regressions are treated as cloned-authenticator
/// evidence and fail the authentication attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Credential {
    pub id: String,
    pub account_id: String,
    pub external_id: String,
    /// Base64-encoded COSE public key bytes, opaque to the store.
    pub public_key: String,
    pub sign_count: i64,
    pub label: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn public_key_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.public_key)
            .map_err(|_| Error::Internal("stored public key is not valid base64".to_string()))
    }

    pub fn external_id_bytes(&self) -> Result<Vec<u8>> {
        URL_SAFE_NO_PAD
            .decode(&self.external_id)
            .map_err(|_| Error::Internal("stored credential id is not valid base64url".to_string()))
    }
}

/// Field set for inserting a credential after a verified registration.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub account_id: String,
    pub external_id: String,
    pub public_key: String,
    pub sign_count: i64,
    pub label: String,
}

impl NewCredential {
    /// Build an insertable credential from verified registration output.
    pub fn from_verified(
        account_id: &str,
        external_id: &[u8],
        public_key: &[u8],
        sign_count: u32,
        label: &str,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            external_id: URL_SAFE_NO_PAD.encode(external_id),
            public_key: STANDARD.encode(public_key),
            sign_count: i64::from(sign_count),
            label: label.to_string(),
        }
    }
}
