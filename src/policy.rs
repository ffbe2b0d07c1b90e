//! Security-sensitive failure policy.
//!
//! Paranoid-mode error collapsing and rollback audit logging live here as
//! standalone functions so the authentication flow stays free of inline
//! policy branches and tests can pin the behavior directly.

use crate::error::Error;

/// Record an authentication failure for audit purposes.
///
/// Counter rollbacks and recovery-token reuse indicate a cloned
/// authenticator or a replayed link and are logged at `warn` with the true
/// reason even when paranoid mode later hides it from the caller.
pub fn audit_failure(error: &Error) {
    match error {
        Error::SignCountRollback { stored, reported } => {
            tracing::warn!(
                stored,
                reported,
                "sign count rollback detected, possible cloned authenticator"
            );
        }
        Error::TokenAlreadyUsed => {
            tracing::warn!("recovery token replay attempt");
        }
        _ => {
            tracing::debug!(error = %error, "authentication failure");
        }
    }
}

/// Collapse an authentication failure according to paranoid mode.
///
/// When paranoid, every protocol-level failure becomes the generic
/// [`Error::InvalidCredential`] so error detail cannot be used for account
/// enumeration. Infrastructure faults pass through untouched, they map to
/// server errors rather than user-visible authentication feedback.
pub fn redact(error: Error, paranoid: bool) -> Error {
    if !paranoid || error.is_infrastructure() {
        return error;
    }
    Error::InvalidCredential
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_collapses_protocol_failures_when_paranoid() {
        let collapsed = redact(
            Error::SignCountRollback {
                stored: 5,
                reported: 5,
            },
            true,
        );
        assert!(matches!(collapsed, Error::InvalidCredential));

        let collapsed = redact(Error::CredentialNotFound, true);
        assert!(matches!(collapsed, Error::InvalidCredential));
    }

    #[test]
    fn redact_passes_through_when_not_paranoid() {
        let kept = redact(Error::CredentialNotFound, false);
        assert!(matches!(kept, Error::CredentialNotFound));
    }

    #[test]
    fn redact_never_hides_infrastructure_faults() {
        let kept = redact(Error::Internal("pool exhausted".to_string()), true);
        assert!(matches!(kept, Error::Internal(_)));
    }
}
