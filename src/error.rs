use thiserror::Error;

/// Application error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("no pending ceremony for this session")]
    ChallengeMissing,

    #[error("challenge does not match the pending ceremony")]
    ChallengeMismatch,

    #[error("invalid attestation: {0}")]
    InvalidAttestation(String),

    #[error("assertion signature verification failed")]
    SignatureInvalid,

    #[error("signature counter regressed (stored {stored}, reported {reported})")]
    SignCountRollback { stored: u32, reported: u32 },

    #[error("credential not found")]
    CredentialNotFound,

    #[error("user verification required but not asserted by the authenticator")]
    UserVerificationRequired,

    #[error("origin mismatch")]
    OriginMismatch,

    #[error("recovery token not found")]
    TokenNotFound,

    #[error("recovery token expired")]
    TokenExpired,

    #[error("recovery token already used")]
    TokenAlreadyUsed,

    #[error("account not found")]
    AccountNotFound,

    #[error("credential already registered")]
    CredentialExists,

    #[error("reauthentication required")]
    ReauthenticationRequired,

    #[error("invalid credentials")]
    InvalidCredential,

    #[error("malformed credential payload: {0}")]
    Payload(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this variant reports an infrastructure fault rather than a
    /// protocol-level authentication failure.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Serialization(_) | Error::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
