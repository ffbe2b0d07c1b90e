//! Outbound notification boundary.
//!
//! Actual delivery (email, SMS) lives outside the engine; implementations
//! receive the raw recovery token exactly once.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Account;

#[async_trait]
pub trait RecoveryNotifier: Send + Sync {
    async fn deliver_recovery_instructions(&self, account: &Account, raw_token: &str)
        -> Result<()>;
}

/// Notifier that only records that instructions were issued. The raw token
/// is deliberately not logged.
pub struct LogNotifier;

#[async_trait]
impl RecoveryNotifier for LogNotifier {
    async fn deliver_recovery_instructions(
        &self,
        account: &Account,
        _raw_token: &str,
    ) -> Result<()> {
        tracing::info!(
            account_id = %account.id,
            "recovery instructions ready for delivery"
        );
        Ok(())
    }
}
