mod passkeys;
mod reauth;
mod recovery;
mod strategy;

pub use passkeys::PasskeyService;
pub use reauth::{ReauthenticationGate, ReauthenticationService};
pub use recovery::{RecoveryOutcome, RecoveryService};
pub use strategy::{AccountHooks, Attempt, AttemptState, NoopHooks, PasskeyStrategy};
