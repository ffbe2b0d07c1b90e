use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An account owning zero or more passkey credentials.
///
/// `webauthn_handle` is the stable, random user handle presented to
/// authenticators; it never changes after creation and carries no
/// personally identifying information.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub webauthn_handle: String,
    pub created_at: DateTime<Utc>,
}
