mod account;
mod credential;
mod recovery;

pub use account::Account;
pub use credential::{Credential, NewCredential};
pub use recovery::{NewRecoveryRequest, RecoveryRequest};
