use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A pending emergency passkey registration.
///
/// Only the digest of the recovery token is stored; the raw token is handed
/// to the notifier once and never persisted. Requests are kept after use as
/// an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecoveryRequest {
    pub id: String,
    pub account_id: String,
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RecoveryRequest {
    /// A request is usable iff it has never been consumed and the current
    /// time is strictly before its expiry.
    pub fn period_valid(&self) -> bool {
        self.used_at.is_none() && Utc::now() < self.expires_at
    }
}

/// Field set for creating a recovery request.
#[derive(Debug, Clone)]
pub struct NewRecoveryRequest {
    pub account_id: String,
    pub token_digest: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(expires_at: DateTime<Utc>, used_at: Option<DateTime<Utc>>) -> RecoveryRequest {
        RecoveryRequest {
            id: "r1".to_string(),
            account_id: "a1".to_string(),
            token_digest: "digest".to_string(),
            expires_at,
            used_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn valid_before_expiry_when_unused() {
        let r = request(Utc::now() + Duration::minutes(59), None);
        assert!(r.period_valid());
    }

    #[test]
    fn invalid_after_expiry() {
        let r = request(Utc::now() - Duration::minutes(1), None);
        assert!(!r.period_valid());
    }

    #[test]
    fn invalid_once_used_even_inside_window() {
        let r = request(Utc::now() + Duration::minutes(30), Some(Utc::now()));
        assert!(!r.period_valid());
    }
}
